use std::process::ExitCode;

use anyhow::Result;
use kiosk_core::{ErrorKind, Failure, OtaError, PolicyPatch};
use kiosk_ota::OtaManager;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::render::{
    format_backup_list_lines, format_boot_update_lines, format_branch_lines,
    format_branch_switch_lines, format_cache_clean_lines, format_check_lines,
    format_connection_lines, format_created_backup_lines, format_disk_usage_lines,
    format_policy_lines, format_restart_lines, format_rollback_lines, format_status_lines,
    format_update_lines, render_status_line, TerminalRenderer,
};
use crate::settings::Settings;
use crate::{Cli, Commands, PolicyCommands, PolicySetArgs};

/// Where a command's result goes: JSON on stdout, or rendered lines.
#[derive(Copy, Clone, Debug)]
struct Output {
    json: bool,
    renderer: TerminalRenderer,
}

impl Output {
    fn emit<T: Serialize>(self, success: bool, value: &T, lines: Vec<String>) -> Result<ExitCode> {
        if self.json {
            println!("{}", render_json_report(success, value)?);
        } else {
            self.renderer.print_lines(&lines);
        }
        Ok(if success {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        })
    }

    fn section(self, title: &str) {
        if !self.json {
            self.renderer.print_section(title);
        }
    }

    fn spinner<T>(self, label: &str, work: impl FnOnce() -> T) -> T {
        if self.json {
            return work();
        }
        let spinner = self.renderer.start_spinner(label);
        let result = work();
        spinner.finish();
        result
    }
}

pub(crate) fn run_cli(cli: Cli, renderer: TerminalRenderer) -> Result<ExitCode> {
    let settings = Settings::load(cli.settings.as_deref())
        .map_err(|err| OtaError::config(&err))?
        .with_repo_root(cli.repo);
    debug!(
        target: "kiosk::cli",
        repo = %settings.repo_root.display(),
        device_config = %settings.device_config_path().display(),
        "settings resolved"
    );
    let manager = settings.build_manager();
    let output = Output {
        json: cli.json,
        renderer,
    };
    run_command(&manager, cli.command, output)
}

fn run_command(manager: &OtaManager, command: Commands, output: Output) -> Result<ExitCode> {
    let style = output.renderer.style();
    match command {
        Commands::Status => {
            output.section("kiosk-ota status");
            let report = manager.get_status()?;
            output.emit(true, &report, format_status_lines(&report))
        }
        Commands::Check => {
            let check = output.spinner("check", || manager.check_for_updates());
            output.emit(!check.is_error(), &check, format_check_lines(style, &check))
        }
        Commands::Update { force } => {
            let outcome = output.spinner("update", || manager.apply_update(force))?;
            output.emit(true, &outcome, format_update_lines(style, &outcome))
        }
        Commands::BootUpdate => {
            let outcome = manager.perform_boot_update()?;
            let success = match &outcome {
                kiosk_core::BootUpdateOutcome::Checked { check } => !check.is_error(),
                _ => true,
            };
            output.emit(success, &outcome, format_boot_update_lines(style, &outcome))
        }
        Commands::SwitchBranch { branch } => {
            let switch = output.spinner("switch-branch", || manager.switch_branch(&branch))?;
            output.emit(true, &switch, format_branch_switch_lines(style, &switch))
        }
        Commands::Branches => {
            let listing = manager.get_available_branches()?;
            output.emit(true, &listing, format_branch_lines(&listing))
        }
        Commands::Backup { name } => {
            let created = output.spinner("backup", || manager.create_backup(name.as_deref()))?;
            output.emit(true, &created, format_created_backup_lines(style, &created))
        }
        Commands::Backups => {
            output.section("backups");
            let records = manager.list_backups()?;
            output.emit(
                true,
                &json!({ "backups": records }),
                format_backup_list_lines(&records),
            )
        }
        Commands::Rollback { name } => {
            let outcome = output.spinner("rollback", || manager.rollback(name.as_deref()))?;
            output.emit(true, &outcome, format_rollback_lines(style, &outcome))
        }
        Commands::Schedule { schedule } => {
            let entry = manager.update_cron_schedule(&schedule)?;
            output.emit(
                true,
                &json!({ "schedule": schedule.trim(), "entry": entry }),
                vec![
                    render_status_line(style, "ok", &format!("update schedule set to '{}'", schedule.trim())),
                    format!("  {entry}"),
                ],
            )
        }
        Commands::TestConnection => {
            let report = manager.test_connection();
            output.emit(report.reachable, &report, format_connection_lines(style, &report))
        }
        Commands::Logs { lines } => {
            let logs = manager.get_logs(lines);
            output.emit(true, &json!({ "lines": logs }), logs.clone())
        }
        Commands::CleanCache => {
            let report = manager.clean_cache();
            output.emit(true, &report, format_cache_clean_lines(style, &report))
        }
        Commands::Policy { command } => match command {
            PolicyCommands::Show => {
                output.section("update policy");
                let policy = manager.get_policy()?;
                output.emit(true, &policy, format_policy_lines(&policy))
            }
            PolicyCommands::Set(args) => {
                let policy = manager.update_policy(&policy_patch(args))?;
                output.emit(true, &policy, format_policy_lines(&policy))
            }
        },
        Commands::Restart => {
            let report = manager.restart_services()?;
            output.emit(true, &report, format_restart_lines(style, &report))
        }
        Commands::Reboot { delay } => {
            let minutes = manager.reboot_system(delay)?;
            output.emit(
                true,
                &json!({ "delay_minutes": minutes }),
                vec![render_status_line(
                    style,
                    "warn",
                    &format!("reboot scheduled in {minutes} minute(s)"),
                )],
            )
        }
        Commands::DiskUsage => {
            let usage = manager.get_disk_usage()?;
            output.emit(true, &usage, format_disk_usage_lines(&usage))
        }
    }
}

pub(crate) fn policy_patch(args: PolicySetArgs) -> PolicyPatch {
    PolicyPatch {
        enabled: args.enabled,
        branch: args.branch,
        check_on_boot: args.check_on_boot,
        auto_pull: args.auto_pull,
        backup_before_update: args.backup_before_update,
        max_backups: args.max_backups,
        update_schedule: args.update_schedule,
        ..PolicyPatch::default()
    }
}

/// Object payloads gain a `success` flag unless they carry one already;
/// anything else is nested under `result`.
pub(crate) fn render_json_report<T: Serialize>(success: bool, value: &T) -> Result<String> {
    let mut object = match serde_json::to_value(value)? {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("result".to_string(), other);
            map
        }
    };
    object
        .entry("success".to_string())
        .or_insert(Value::Bool(success));
    Ok(serde_json::to_string_pretty(&Value::Object(object))?)
}

pub(crate) fn render_json_error(err: &anyhow::Error) -> String {
    let failure = match err.downcast_ref::<OtaError>() {
        Some(ota) => ota.failure(),
        None => Failure {
            kind: ErrorKind::Internal,
            message: format!("{err:#}"),
            stage: None,
        },
    };
    json!({
        "success": false,
        "kind": failure.kind.as_str(),
        "error": failure.message,
        "stage": failure.stage,
    })
    .to_string()
}
