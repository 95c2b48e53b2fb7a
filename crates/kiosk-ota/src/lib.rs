mod backup;
mod checksum;
mod command;
mod executor;
mod fs_utils;
mod git;
mod guard;
mod journal;
mod layout;
mod maintenance;
mod manager;
mod planner;
mod restore;
mod schedule;

pub use backup::{validate_backup_name, BackupArchiver, MAX_BACKUP_NAME_LEN};
pub use checksum::{parse_checksum_sidecar, sha256_file_hex};
pub use command::{
    CommandClass, CommandError, CommandRunner, CommandTimeouts, Invocation, SystemRunner,
    DEFAULT_LOCAL_TIMEOUT, DEFAULT_NETWORK_TIMEOUT,
};
pub use executor::UpdateExecutor;
pub use git::{validate_branch_name, GitCli, SourceControl, DEFAULT_REMOTE};
pub use guard::UpdateGuard;
pub use journal::OtaJournal;
pub use layout::{
    OtaLayout, BACKUP_EXTENSION, CHECKSUM_EXTENSION, DEFAULT_BACKUP_DIR_NAME, DEFAULT_LOG_FILE,
    EXCLUDED_DIR_NAMES,
};
pub use maintenance::{
    CacheCleanReport, DiskUsage, RestartReport, ServiceOptions, DEFAULT_BACKEND_SERVICE,
    DEFAULT_KIOSK_SERVICE, DEFAULT_REBOOT_DELAY_SECS,
};
pub use manager::{ConnectionReport, ManagerOptions, OtaManager, DEFAULT_BOOT_COMMAND};
pub use planner::UpdatePlanner;
pub use restore::{resolve_backup, restore_backup, RestoredBackup};
pub use schedule::{
    install_schedule, render_entry, rewrite_table, shell_quote, validate_schedule, CronTable,
    FileCronTable, SystemCrontab, CRON_MARKER,
};
