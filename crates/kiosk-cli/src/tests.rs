use super::*;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{TimeZone, Utc};
use kiosk_core::{
    BackupRecord, ErrorKind, MissingTarget, OtaError, UpdateCheckResult, UpdateStage,
};

use crate::dispatch::{policy_patch, render_json_error, render_json_report};
use crate::render::{
    format_backup_list_lines, format_branch_lines, format_check_lines, format_size,
    render_error_line, render_status_line, OutputStyle,
};
use crate::settings::{Settings, DEFAULT_REPO_ROOT};
use kiosk_ota::{shell_quote, DEFAULT_BOOT_COMMAND};

static TEST_ROOT_COUNTER: AtomicU64 = AtomicU64::new(0);

fn test_root() -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_nanos())
        .unwrap_or(0);
    let sequence = TEST_ROOT_COUNTER.fetch_add(1, Ordering::Relaxed);
    let root = std::env::temp_dir().join(format!(
        "kiosk-cli-tests-{}-{nanos}-{sequence}",
        std::process::id()
    ));
    fs::create_dir_all(&root).expect("must create test root");
    root
}

fn sample_check(behind: u64) -> UpdateCheckResult {
    UpdateCheckResult {
        update_available: behind > 0,
        current_commit: "1111aaaa".to_string(),
        remote_commit: "2222bbbb".to_string(),
        behind_count: behind,
        commits: (1..=behind)
            .map(|index| format!("abc{index:04} upstream change {index}"))
            .collect(),
        branch: "main".to_string(),
        error: None,
    }
}

#[test]
fn parses_update_with_force_and_global_flags() {
    let cli = Cli::try_parse_from(["kiosk-ota", "update", "--force", "--json", "--repo", "/srv/kiosk"])
        .expect("must parse");
    assert!(cli.json);
    assert_eq!(cli.repo, Some(PathBuf::from("/srv/kiosk")));
    assert!(matches!(cli.command, Commands::Update { force: true }));
}

#[test]
fn parses_rollback_without_name() {
    let cli = Cli::try_parse_from(["kiosk-ota", "rollback"]).expect("must parse");
    assert!(matches!(cli.command, Commands::Rollback { name: None }));
}

#[test]
fn reboot_and_logs_use_defaults() {
    let reboot = Cli::try_parse_from(["kiosk-ota", "reboot"]).expect("must parse");
    assert!(matches!(
        reboot.command,
        Commands::Reboot { delay } if delay == DEFAULT_REBOOT_DELAY_SECS
    ));

    let logs = Cli::try_parse_from(["kiosk-ota", "logs"]).expect("must parse");
    assert!(matches!(logs.command, Commands::Logs { lines: 100 }));
}

#[test]
fn parses_policy_set_into_patch() {
    let cli = Cli::try_parse_from([
        "kiosk-ota",
        "policy",
        "set",
        "--enabled",
        "false",
        "--max-backups",
        "3",
        "--update-schedule",
        "@daily",
    ])
    .expect("must parse");

    let Commands::Policy {
        command: PolicyCommands::Set(args),
    } = cli.command
    else {
        panic!("expected policy set");
    };
    let patch = policy_patch(args);
    assert_eq!(patch.enabled, Some(false));
    assert_eq!(patch.max_backups, Some(3));
    assert_eq!(patch.update_schedule.as_deref(), Some("@daily"));
    assert_eq!(patch.branch, None);
    assert!(patch.last_check.is_none());
}

#[test]
fn empty_policy_set_yields_empty_patch() {
    assert!(policy_patch(PolicySetArgs::default()).is_empty());
}

#[test]
fn rejects_switch_branch_without_branch() {
    assert!(Cli::try_parse_from(["kiosk-ota", "switch-branch"]).is_err());
}

#[test]
fn settings_default_when_content_empty() {
    let settings = Settings::parse("").expect("must parse empty settings");
    assert_eq!(settings, Settings::default());
    assert_eq!(settings.repo_root, PathBuf::from(DEFAULT_REPO_ROOT));
    assert_eq!(
        settings.device_config_path(),
        Path::new(DEFAULT_REPO_ROOT).join("device_config.json")
    );
}

#[test]
fn settings_parse_overrides_and_derive_layout() {
    let settings = Settings::parse(
        r#"
repo_root = "/srv/kiosk"
backup_dir = "/var/lib/kiosk-ota/backups"
log_file = "/tmp/kiosk-ota.log"
network_timeout_secs = 45
kiosk_service = ""
use_sudo = false
"#,
    )
    .expect("must parse settings");

    let layout = settings.layout();
    assert_eq!(layout.repo_root(), Path::new("/srv/kiosk"));
    assert_eq!(layout.backup_dir(), Path::new("/var/lib/kiosk-ota/backups"));
    assert_eq!(layout.state_dir(), Path::new("/var/lib/kiosk-ota/backups"));
    assert_eq!(layout.log_file(), Path::new("/tmp/kiosk-ota.log"));

    let options = settings.manager_options();
    assert_eq!(options.timeouts.network, Duration::from_secs(45));
    assert_eq!(options.services.kiosk_unit, None);
    assert!(!options.services.use_sudo);
}

#[test]
fn settings_reject_unknown_keys() {
    let err = Settings::parse("repo = \"/srv/kiosk\"\n").expect_err("must reject unknown key");
    assert!(format!("{err:#}").contains("failed to parse kiosk-ota settings"));
}

#[test]
fn settings_reject_zero_timeout() {
    let err = Settings::parse("local_timeout_secs = 0\n").expect_err("must reject zero timeout");
    assert!(err.to_string().contains("timeouts"));
}

#[test]
fn settings_load_requires_explicit_file() {
    let root = test_root();
    let missing = root.join("missing.toml");
    let err = Settings::load(Some(&missing)).expect_err("explicit missing file must fail");
    assert!(format!("{err:#}").contains("failed reading settings"));

    let present = root.join("settings.toml");
    fs::write(&present, "remote = \"upstream\"\n").expect("must write settings");
    let settings = Settings::load(Some(&present)).expect("must load settings");
    assert_eq!(settings.remote, "upstream");

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn explicit_settings_file_is_carried_into_scheduled_command() {
    let root = test_root();
    let repo = root.join("kiosk app");
    fs::create_dir_all(&repo).expect("must create repo dir");
    let cron_file = root.join("kiosk-ota.cron");
    let settings_path = root.join("settings.toml");
    fs::write(
        &settings_path,
        format!(
            "repo_root = {:?}\ncron_file = {:?}\n",
            repo.display().to_string(),
            cron_file.display().to_string()
        ),
    )
    .expect("must write settings");

    let settings = Settings::load(Some(&settings_path)).expect("must load settings");
    let canonical = fs::canonicalize(&settings_path).expect("must canonicalize settings path");
    assert_eq!(settings.settings_file.as_deref(), Some(canonical.as_path()));
    assert_eq!(
        settings.manager_options().boot_command,
        format!(
            "{DEFAULT_BOOT_COMMAND} --settings {}",
            shell_quote(&canonical.to_string_lossy())
        )
    );

    let manager = settings.build_manager();
    let entry = manager
        .update_cron_schedule("0 4 * * *")
        .expect("must install schedule");
    let repo_root = manager.layout().repo_root().to_string_lossy().to_string();
    assert!(entry.starts_with("0 4 * * * "));
    assert!(entry.contains(&format!("--settings {}", shell_quote(&canonical.to_string_lossy()))));
    assert!(entry.contains(&format!("--repo {}", shell_quote(&repo_root))));
    let table = fs::read_to_string(&cron_file).expect("must read cron file");
    assert!(table.contains(&entry));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn default_settings_leave_boot_command_untouched() {
    assert_eq!(Settings::default().settings_file, None);
    assert_eq!(
        Settings::default().manager_options().boot_command,
        DEFAULT_BOOT_COMMAND
    );
}

#[test]
fn repo_override_replaces_settings_root() {
    let settings = Settings::default().with_repo_root(Some(PathBuf::from("/data/kiosk")));
    assert_eq!(settings.repo_root, PathBuf::from("/data/kiosk"));
    assert_eq!(
        settings.device_config_path(),
        PathBuf::from("/data/kiosk/device_config.json")
    );
}

#[test]
fn render_status_line_plain_is_unadorned() {
    assert_eq!(
        render_status_line(OutputStyle::Plain, "ok", "main is up to date"),
        "main is up to date"
    );
}

#[test]
fn render_status_line_rich_includes_ascii_badge() {
    assert_eq!(
        render_status_line(OutputStyle::Rich, "ok", "main is up to date"),
        "[OK] main is up to date"
    );
    assert_eq!(
        render_status_line(OutputStyle::Rich, "error", "remote unreachable"),
        "[ERR] remote unreachable"
    );
}

#[test]
fn check_lines_list_pending_commits() {
    let lines = format_check_lines(OutputStyle::Plain, &sample_check(2));
    assert_eq!(
        lines,
        vec![
            "2 commit(s) available on main (1111aaaa -> 2222bbbb)".to_string(),
            "  abc0001 upstream change 1".to_string(),
            "  abc0002 upstream change 2".to_string(),
        ]
    );
}

#[test]
fn check_lines_report_failure_kind() {
    let check = UpdateCheckResult::failed("main", &OtaError::network("fetch", "could not resolve host"));
    let lines = format_check_lines(OutputStyle::Rich, &check);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("[ERR] network-unreachable: "));
}

#[test]
fn branch_lines_mark_current_branch() {
    let listing = kiosk_core::BranchListing {
        branches: vec!["develop".to_string(), "main".to_string()],
        current: "main".to_string(),
    };
    assert_eq!(
        format_branch_lines(&listing),
        vec!["  develop".to_string(), "* main".to_string()]
    );
}

#[test]
fn backup_list_lines_show_name_time_and_size() {
    let created_at = Utc
        .with_ymd_and_hms(2026, 3, 4, 5, 6, 7)
        .single()
        .expect("must build timestamp");
    let records = vec![BackupRecord {
        name: "backup_20260304_050607".to_string(),
        path: PathBuf::from("/opt/kiosk/.backups/backup_20260304_050607.tar.zst"),
        size_bytes: 3 * 1024 * 1024,
        created_at,
    }];
    assert_eq!(
        format_backup_list_lines(&records),
        vec!["backup_20260304_050607  2026-03-04 05:06:07 UTC  3.0 MiB".to_string()]
    );
    assert_eq!(format_backup_list_lines(&[]), vec!["no backups".to_string()]);
}

#[test]
fn format_size_picks_unit() {
    assert_eq!(format_size(512), "512 B");
    assert_eq!(format_size(1536), "1.5 KiB");
    assert_eq!(format_size(5 * 1024 * 1024 * 1024), "5.0 GiB");
}

#[test]
fn json_report_adds_success_flag() {
    let rendered = render_json_report(false, &sample_check(0)).expect("must render");
    let value: serde_json::Value = serde_json::from_str(&rendered).expect("must be json");
    assert_eq!(value["success"], serde_json::Value::Bool(false));
    assert_eq!(value["branch"], "main");
}

#[test]
fn json_report_keeps_existing_success_flag_and_wraps_scalars() {
    let rendered = render_json_report(true, &serde_json::json!({ "success": false }))
        .expect("must render");
    let value: serde_json::Value = serde_json::from_str(&rendered).expect("must be json");
    assert_eq!(value["success"], serde_json::Value::Bool(false));

    let rendered = render_json_report(true, &7_u64).expect("must render");
    let value: serde_json::Value = serde_json::from_str(&rendered).expect("must be json");
    assert_eq!(value["result"], 7);
    assert_eq!(value["success"], serde_json::Value::Bool(true));
}

#[test]
fn json_error_carries_kind_and_stage() {
    let err = anyhow::Error::new(OtaError::UpdateFailed {
        stage: UpdateStage::Pulling,
        source: Box::new(OtaError::network("pull", "connection timed out")),
    });
    let value: serde_json::Value =
        serde_json::from_str(&render_json_error(&err)).expect("must be json");
    assert_eq!(value["success"], serde_json::Value::Bool(false));
    assert_eq!(value["kind"], OtaError::network("pull", "x").kind().as_str());
    assert_eq!(value["stage"], "pulling");
}

#[test]
fn non_domain_errors_render_as_internal() {
    let err = anyhow::anyhow!("boom");
    let value: serde_json::Value =
        serde_json::from_str(&render_json_error(&err)).expect("must be json");
    assert_eq!(value["kind"], ErrorKind::Internal.as_str());
    assert_eq!(
        render_error_line(OutputStyle::Plain, &err),
        "boom".to_string()
    );

    let failure = OtaError::NotFound(MissingTarget::NoBackups).failure();
    assert_eq!(failure.kind, ErrorKind::NotFound);
    assert!(crate::render::render_failure_line(OutputStyle::Rich, &failure)
        .starts_with("[ERR] not-found: "));
}
