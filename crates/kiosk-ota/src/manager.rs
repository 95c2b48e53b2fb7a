use std::sync::Arc;

use kiosk_core::{
    abbreviate_commit, BackupRecord, BootUpdateOutcome, BranchListing, BranchSwitch,
    CreatedBackup, Failure, MissingTarget, OtaError, PolicyPatch, PolicyStore,
    PreconditionFailure, RepositoryState, RollbackOutcome, StatusReport, UpdateCheckResult,
    UpdateOutcome, UpdatePolicy,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::backup::BackupArchiver;
use crate::command::{CommandRunner, CommandTimeouts};
use crate::executor::UpdateExecutor;
use crate::git::{validate_branch_name, SourceControl};
use crate::guard::UpdateGuard;
use crate::journal::OtaJournal;
use crate::layout::OtaLayout;
use crate::maintenance::{self, CacheCleanReport, DiskUsage, RestartReport, ServiceOptions};
use crate::planner::UpdatePlanner;
use crate::restore::{resolve_backup, restore_backup};
use crate::schedule::{install_schedule, validate_schedule, CronTable};

pub const DEFAULT_BOOT_COMMAND: &str = "/usr/local/bin/kiosk-ota boot-update";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerOptions {
    pub timeouts: CommandTimeouts,
    pub services: ServiceOptions,
    pub boot_command: String,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            timeouts: CommandTimeouts::default(),
            services: ServiceOptions::default(),
            boot_command: DEFAULT_BOOT_COMMAND.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionReport {
    pub reachable: bool,
    pub remote: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Failure>,
}

/// Entry point for every update operation on one working tree.
pub struct OtaManager {
    layout: OtaLayout,
    store: Arc<dyn PolicyStore>,
    git: Arc<dyn SourceControl>,
    runner: Arc<dyn CommandRunner>,
    cron: Arc<dyn CronTable>,
    archiver: BackupArchiver,
    journal: OtaJournal,
    options: ManagerOptions,
}

impl OtaManager {
    pub fn new(
        layout: OtaLayout,
        store: Arc<dyn PolicyStore>,
        git: Arc<dyn SourceControl>,
        runner: Arc<dyn CommandRunner>,
        cron: Arc<dyn CronTable>,
    ) -> Self {
        let layout = layout.resolved();
        Self {
            archiver: BackupArchiver::new(layout.clone()),
            journal: OtaJournal::new(layout.log_file()),
            layout,
            store,
            git,
            runner,
            cron,
            options: ManagerOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ManagerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn layout(&self) -> &OtaLayout {
        &self.layout
    }

    pub fn get_status(&self) -> Result<StatusReport, OtaError> {
        let policy = self.load_policy()?;
        let (repository, repository_error) = match self.repository_state() {
            Ok(state) => (Some(state), None),
            Err(err) => {
                warn!(target: "kiosk::ota", error = %err, "failed to inspect repository");
                (None, Some(err.to_string()))
            }
        };
        Ok(StatusReport {
            policy,
            repository,
            repository_error,
        })
    }

    fn repository_state(&self) -> Result<RepositoryState, OtaError> {
        Ok(RepositoryState {
            current_branch: self.git.current_branch()?,
            current_commit: abbreviate_commit(&self.git.head_commit()?),
            has_uncommitted_changes: self.git.has_uncommitted_changes()?,
        })
    }

    pub fn check_for_updates(&self) -> UpdateCheckResult {
        UpdatePlanner::new(self.git.as_ref(), self.store.as_ref()).check()
    }

    pub fn apply_update(&self, force: bool) -> Result<UpdateOutcome, OtaError> {
        let _guard = self.guard("update")?;
        UpdateExecutor::new(
            self.git.as_ref(),
            self.store.as_ref(),
            &self.archiver,
            &self.journal,
        )
        .apply(force)
    }

    pub fn perform_boot_update(&self) -> Result<BootUpdateOutcome, OtaError> {
        let policy = self.load_policy()?;
        if !policy.enabled {
            return Ok(self.skip_boot_update("updates disabled"));
        }
        if !policy.check_on_boot {
            return Ok(self.skip_boot_update("update check on boot disabled"));
        }

        let check = self.check_for_updates();
        if check.is_error() {
            self.journal.append(&format!(
                "boot update check failed: {}",
                check
                    .error
                    .as_ref()
                    .map(|failure| failure.message.as_str())
                    .unwrap_or("unknown error")
            ));
            return Ok(BootUpdateOutcome::Checked { check });
        }
        if !check.update_available {
            self.journal.append("boot update check: up to date");
            return Ok(BootUpdateOutcome::Checked { check });
        }
        if !policy.auto_pull {
            self.journal.append(&format!(
                "boot update check: {} commit(s) available, auto pull disabled",
                check.behind_count
            ));
            return Ok(BootUpdateOutcome::Checked { check });
        }

        self.journal.append(&format!(
            "boot update: applying {} commit(s)",
            check.behind_count
        ));
        let outcome = self.apply_update(false)?;
        Ok(BootUpdateOutcome::Updated { outcome })
    }

    fn skip_boot_update(&self, reason: &str) -> BootUpdateOutcome {
        info!(target: "kiosk::ota", reason, "boot update skipped");
        self.journal.append(&format!("boot update skipped: {reason}"));
        BootUpdateOutcome::Skipped {
            message: reason.to_string(),
        }
    }

    pub fn switch_branch(&self, branch: &str) -> Result<BranchSwitch, OtaError> {
        validate_branch_name(branch)?;
        let _guard = self.guard("switch-branch")?;

        if self.git.has_uncommitted_changes()? {
            return Err(OtaError::Precondition(
                PreconditionFailure::UncommittedChangesBlockSwitch,
            ));
        }
        self.git.fetch()?;
        if self.git.resolve_ref(&self.git.remote_ref(branch))?.is_none() {
            return Err(OtaError::NotFound(MissingTarget::Branch(branch.to_string())));
        }

        let mut output = self.git.checkout(branch)?.trim().to_string();
        let pulled = self.git.pull(branch)?;
        if !pulled.trim().is_empty() {
            if !output.is_empty() {
                output.push('\n');
            }
            output.push_str(pulled.trim());
        }
        self.store
            .update_policy(&PolicyPatch::branch(branch))
            .map_err(|err| OtaError::config(&err))?;

        info!(target: "kiosk::ota", branch, "switched branch");
        self.journal.append(&format!("switched to branch {branch}"));
        Ok(BranchSwitch {
            success: true,
            branch: branch.to_string(),
            output,
            message: format!("switched to branch {branch}"),
        })
    }

    pub fn get_available_branches(&self) -> Result<BranchListing, OtaError> {
        let mut branches = self.git.remote_branches()?;
        let current = self.git.current_branch()?;
        if !current.is_empty() && !branches.contains(&current) {
            branches.push(current.clone());
            branches.sort();
        }
        Ok(BranchListing { branches, current })
    }

    pub fn create_backup(&self, name: Option<&str>) -> Result<CreatedBackup, OtaError> {
        let _guard = self.guard("backup")?;
        let policy = self.load_policy()?;
        let created = self.archiver.create(name, policy.max_backups)?;
        self.journal
            .append(&format!("backup created: {}", created.name));
        Ok(created)
    }

    pub fn list_backups(&self) -> Result<Vec<BackupRecord>, OtaError> {
        self.archiver.list()
    }

    pub fn rollback(&self, name: Option<&str>) -> Result<RollbackOutcome, OtaError> {
        let _guard = self.guard("rollback")?;
        let record = resolve_backup(&self.archiver, name)?;
        let restored = match restore_backup(&self.archiver, &record) {
            Ok(restored) => restored,
            Err(err) => {
                self.journal
                    .append(&format!("rollback to {} failed: {err}", record.name));
                return Err(err);
            }
        };
        self.journal
            .append(&format!("rolled back to backup {}", restored.name));
        Ok(RollbackOutcome {
            success: true,
            needs_restart: true,
            message: format!("restored backup {}", restored.name),
            backup_name: restored.name,
            restored_entries: restored.entries,
        })
    }

    /// Persists the schedule, then rewrites the cron entry. Returns the entry.
    pub fn update_cron_schedule(&self, schedule: &str) -> Result<String, OtaError> {
        validate_schedule(schedule)?;
        self.store
            .update_policy(&PolicyPatch::update_schedule(schedule.trim()))
            .map_err(|err| OtaError::config(&err))?;
        let entry = install_schedule(
            self.cron.as_ref(),
            schedule,
            self.layout.repo_root(),
            &self.options.boot_command,
        )?;
        self.journal
            .append(&format!("update schedule set to '{}'", schedule.trim()));
        Ok(entry)
    }

    pub fn test_connection(&self) -> ConnectionReport {
        let remote = self.git.remote().to_string();
        match self.git.ls_remote() {
            Ok(_) => ConnectionReport {
                reachable: true,
                remote,
                error: None,
            },
            Err(err) => {
                warn!(target: "kiosk::ota", remote = %remote, error = %err, "remote unreachable");
                ConnectionReport {
                    reachable: false,
                    remote,
                    error: Some(err.failure()),
                }
            }
        }
    }

    pub fn get_logs(&self, lines: usize) -> Vec<String> {
        self.journal.tail(lines).unwrap_or_else(|err| {
            warn!(target: "kiosk::ota", log = %self.journal.path().display(), error = %err, "failed to read update log");
            Vec::new()
        })
    }

    pub fn clean_cache(&self) -> CacheCleanReport {
        let report = maintenance::clean_cache(
            &self.layout,
            self.runner.as_ref(),
            self.options.timeouts,
        );
        if report.cleaned_anything() {
            self.journal.append(&format!(
                "cache cleaned: {} python cache dir(s), npm cache {}",
                report.removed.len(),
                if report.npm_cache_cleaned { "cleaned" } else { "untouched" }
            ));
        }
        report
    }

    pub fn get_policy(&self) -> Result<UpdatePolicy, OtaError> {
        self.load_policy()
    }

    pub fn update_policy(&self, patch: &PolicyPatch) -> Result<UpdatePolicy, OtaError> {
        if patch.is_empty() {
            return Err(OtaError::invalid_input("policy update has no fields set"));
        }
        if let Some(branch) = &patch.branch {
            validate_branch_name(branch)?;
        }
        if let Some(schedule) = &patch.update_schedule {
            validate_schedule(schedule)?;
        }
        self.store
            .update_policy(patch)
            .map_err(|err| OtaError::config(&err))
    }

    pub fn restart_services(&self) -> Result<RestartReport, OtaError> {
        let report = maintenance::restart_services(
            self.runner.as_ref(),
            &self.options.services,
            self.options.timeouts,
        )?;
        self.journal
            .append(&format!("services restarted: {}", report.restarted.join(", ")));
        Ok(report)
    }

    pub fn reboot_system(&self, delay_secs: u64) -> Result<u64, OtaError> {
        let minutes = maintenance::reboot_system(
            self.runner.as_ref(),
            &self.options.services,
            delay_secs,
            self.options.timeouts,
        )?;
        self.journal
            .append(&format!("reboot scheduled in {minutes} minute(s)"));
        Ok(minutes)
    }

    pub fn get_disk_usage(&self) -> Result<DiskUsage, OtaError> {
        maintenance::disk_usage(self.runner.as_ref(), self.options.timeouts)
    }

    fn load_policy(&self) -> Result<UpdatePolicy, OtaError> {
        self.store
            .load_policy()
            .map_err(|err| OtaError::config(&err))
    }

    fn guard(&self, operation: &'static str) -> Result<UpdateGuard, OtaError> {
        UpdateGuard::acquire(&self.layout.lock_path(), operation)
    }
}
