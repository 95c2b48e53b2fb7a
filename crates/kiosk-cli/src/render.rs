use std::io::IsTerminal;
use std::time::{Duration, Instant};

use anstyle::{AnsiColor, Effects, Style};
use indicatif::{ProgressBar, ProgressStyle};
use kiosk_core::{
    BackupRecord, BootUpdateOutcome, BranchListing, BranchSwitch, CreatedBackup, Failure,
    OtaError, RollbackOutcome, StatusReport, UpdateCheckResult, UpdateOutcome, UpdatePolicy,
};
use kiosk_ota::{CacheCleanReport, ConnectionReport, DiskUsage, RestartReport};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OutputStyle {
    Plain,
    Rich,
}

pub(crate) fn current_output_style() -> OutputStyle {
    if std::env::var_os("NO_COLOR").is_some() || !std::io::stdout().is_terminal() {
        OutputStyle::Plain
    } else {
        OutputStyle::Rich
    }
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct TerminalRenderer {
    style: OutputStyle,
}

pub(crate) struct TerminalSpinner {
    style: OutputStyle,
    label: String,
    progress_bar: Option<ProgressBar>,
    started_at: Instant,
}

impl TerminalRenderer {
    pub(crate) fn from_style(style: OutputStyle) -> Self {
        Self { style }
    }

    pub(crate) fn current() -> Self {
        Self::from_style(current_output_style())
    }

    pub(crate) fn style(self) -> OutputStyle {
        self.style
    }

    pub(crate) fn print_section(self, title: &str) {
        if let Some(line) = render_section_header(self.style, title) {
            println!();
            println!("{}", colorize(section_style(), &line));
        }
    }

    pub(crate) fn print_lines(self, lines: &[String]) {
        for line in lines {
            println!("{line}");
        }
    }

    /// Spinner on stderr while a long git or archive step runs.
    pub(crate) fn start_spinner(self, label: &str) -> TerminalSpinner {
        let progress_bar = if self.style == OutputStyle::Rich {
            let progress_bar = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan.bold} {msg} {elapsed}") {
                progress_bar.set_style(style.tick_chars(spinner_tick_chars(label)));
            }
            progress_bar.set_message(label.to_string());
            progress_bar.enable_steady_tick(Duration::from_millis(80));
            Some(progress_bar)
        } else {
            None
        };

        TerminalSpinner {
            style: self.style,
            label: label.to_string(),
            progress_bar,
            started_at: Instant::now(),
        }
    }
}

impl TerminalSpinner {
    pub(crate) fn finish(mut self) {
        let Some(progress_bar) = self.progress_bar.take() else {
            return;
        };
        progress_bar.finish_and_clear();
        if self.style == OutputStyle::Rich {
            eprintln!(
                "{} complete in {}",
                colorize(spinner_label_style(), &self.label),
                format_elapsed(self.started_at.elapsed())
            );
        }
    }
}

impl Drop for TerminalSpinner {
    fn drop(&mut self) {
        if let Some(progress_bar) = self.progress_bar.take() {
            progress_bar.finish_and_clear();
        }
    }
}

pub(crate) fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => {
            let badge = match status {
                "ok" => "[OK]",
                "warn" => "[WARN]",
                "error" => "[ERR]",
                "step" => "[..]",
                _ => "[--]",
            };
            format!("{badge} {message}")
        }
    }
}

fn render_section_header(style: OutputStyle, title: &str) -> Option<String> {
    match style {
        OutputStyle::Plain => None,
        OutputStyle::Rich => Some(format!("== {title} ==")),
    }
}

fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let millis = elapsed.subsec_millis();
    format!("{secs}.{millis:03}s")
}

fn spinner_tick_chars(label: &str) -> &'static str {
    match label {
        "update" => "<^>v ",
        "backup" => ".oO@* ",
        "rollback" => "\\|/- ",
        _ => "|/-\\ ",
    }
}

fn section_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightBlue.into()))
        .effects(Effects::BOLD)
}

fn spinner_label_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightCyan.into()))
        .effects(Effects::BOLD)
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

fn format_timestamp(value: Option<chrono::DateTime<chrono::Utc>>) -> String {
    value
        .map(|at| at.to_rfc3339())
        .unwrap_or_else(|| "never".to_string())
}

pub(crate) fn format_policy_lines(policy: &UpdatePolicy) -> Vec<String> {
    vec![
        format!("enabled: {}", yes_no(policy.enabled)),
        format!("branch: {}", policy.branch),
        format!("check_on_boot: {}", yes_no(policy.check_on_boot)),
        format!("auto_pull: {}", yes_no(policy.auto_pull)),
        format!("backup_before_update: {}", yes_no(policy.backup_before_update)),
        format!("max_backups: {}", policy.max_backups),
        format!("update_schedule: {}", policy.update_schedule),
        format!("last_check: {}", format_timestamp(policy.last_check)),
        format!("last_update: {}", format_timestamp(policy.last_update)),
    ]
}

pub(crate) fn format_status_lines(report: &StatusReport) -> Vec<String> {
    let mut lines = format_policy_lines(&report.policy);
    match (&report.repository, &report.repository_error) {
        (Some(repository), _) => {
            lines.push(format!("current_branch: {}", repository.current_branch));
            lines.push(format!("current_commit: {}", repository.current_commit));
            lines.push(format!(
                "uncommitted_changes: {}",
                yes_no(repository.has_uncommitted_changes)
            ));
        }
        (None, Some(error)) => lines.push(format!("repository: unavailable ({error})")),
        (None, None) => lines.push("repository: unavailable".to_string()),
    }
    lines
}

pub(crate) fn format_check_lines(style: OutputStyle, check: &UpdateCheckResult) -> Vec<String> {
    if let Some(failure) = &check.error {
        return vec![render_failure_line(style, failure)];
    }
    if !check.update_available {
        return vec![render_status_line(
            style,
            "ok",
            &format!("{} is up to date at {}", check.branch, check.current_commit),
        )];
    }

    let mut lines = vec![render_status_line(
        style,
        "warn",
        &format!(
            "{} commit(s) available on {} ({} -> {})",
            check.behind_count, check.branch, check.current_commit, check.remote_commit
        ),
    )];
    lines.extend(check.commits.iter().map(|commit| format!("  {commit}")));
    lines
}

pub(crate) fn format_update_lines(style: OutputStyle, outcome: &UpdateOutcome) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(backup) = &outcome.backup {
        lines.push(render_status_line(
            style,
            "ok",
            &format!("backup {} written", backup.name),
        ));
    }
    lines.push(render_status_line(style, "ok", &outcome.message));
    lines.extend(outcome.output.lines().map(|line| format!("  {line}")));
    if outcome.needs_restart {
        lines.push(render_status_line(
            style,
            "warn",
            "restart services to load the new code",
        ));
    }
    lines
}

pub(crate) fn format_boot_update_lines(
    style: OutputStyle,
    outcome: &BootUpdateOutcome,
) -> Vec<String> {
    match outcome {
        BootUpdateOutcome::Skipped { message } => {
            vec![render_status_line(style, "ok", &format!("skipped: {message}"))]
        }
        BootUpdateOutcome::Checked { check } => format_check_lines(style, check),
        BootUpdateOutcome::Updated { outcome } => format_update_lines(style, outcome),
    }
}

pub(crate) fn format_branch_switch_lines(style: OutputStyle, switch: &BranchSwitch) -> Vec<String> {
    let mut lines = vec![render_status_line(style, "ok", &switch.message)];
    lines.extend(switch.output.lines().map(|line| format!("  {line}")));
    lines
}

pub(crate) fn format_branch_lines(listing: &BranchListing) -> Vec<String> {
    listing
        .branches
        .iter()
        .map(|branch| {
            if *branch == listing.current {
                format!("* {branch}")
            } else {
                format!("  {branch}")
            }
        })
        .collect()
}

pub(crate) fn format_created_backup_lines(style: OutputStyle, backup: &CreatedBackup) -> Vec<String> {
    vec![
        render_status_line(
            style,
            "ok",
            &format!("backup {} written ({} entries)", backup.name, backup.entries),
        ),
        format!("path: {}", backup.path.display()),
        format!("sha256: {}", backup.sha256),
    ]
}

pub(crate) fn format_backup_list_lines(records: &[BackupRecord]) -> Vec<String> {
    if records.is_empty() {
        return vec!["no backups".to_string()];
    }
    records
        .iter()
        .map(|record| {
            format!(
                "{}  {}  {}",
                record.name,
                record.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
                format_size(record.size_bytes)
            )
        })
        .collect()
}

pub(crate) fn format_rollback_lines(style: OutputStyle, outcome: &RollbackOutcome) -> Vec<String> {
    let mut lines = vec![render_status_line(
        style,
        "ok",
        &format!(
            "{} ({} entries)",
            outcome.message, outcome.restored_entries
        ),
    )];
    if outcome.needs_restart {
        lines.push(render_status_line(
            style,
            "warn",
            "restart services to load the restored code",
        ));
    }
    lines
}

pub(crate) fn format_connection_lines(style: OutputStyle, report: &ConnectionReport) -> Vec<String> {
    match &report.error {
        None => vec![render_status_line(
            style,
            "ok",
            &format!("remote {} is reachable", report.remote),
        )],
        Some(failure) => vec![render_failure_line(style, failure)],
    }
}

pub(crate) fn format_cache_clean_lines(style: OutputStyle, report: &CacheCleanReport) -> Vec<String> {
    let mut lines = vec![render_status_line(
        style,
        "ok",
        &format!(
            "removed {} python cache dir(s), npm cache {}",
            report.removed.len(),
            if report.npm_cache_cleaned {
                "cleaned"
            } else {
                "untouched"
            }
        ),
    )];
    lines.extend(
        report
            .skipped
            .iter()
            .map(|problem| render_status_line(style, "warn", &format!("skipped {problem}"))),
    );
    lines
}

pub(crate) fn format_restart_lines(style: OutputStyle, report: &RestartReport) -> Vec<String> {
    let mut lines = report
        .restarted
        .iter()
        .map(|unit| render_status_line(style, "ok", &format!("restarted {unit}")))
        .collect::<Vec<_>>();
    lines.extend(
        report
            .skipped
            .iter()
            .map(|unit| render_status_line(style, "warn", &format!("could not restart {unit}"))),
    );
    lines
}

pub(crate) fn format_disk_usage_lines(usage: &DiskUsage) -> Vec<String> {
    vec![
        format!("filesystem: {}", usage.filesystem),
        format!("mounted on: {}", usage.mount_point),
        format!("total: {}", format_size(usage.total_bytes)),
        format!("used: {} ({:.0}%)", format_size(usage.used_bytes), usage.percent_used),
        format!("available: {}", format_size(usage.available_bytes)),
    ]
}

pub(crate) fn render_failure_line(style: OutputStyle, failure: &Failure) -> String {
    render_status_line(style, "error", &failure.message)
}

pub(crate) fn render_error_line(style: OutputStyle, err: &anyhow::Error) -> String {
    match err.downcast_ref::<OtaError>() {
        Some(ota) => render_failure_line(style, &ota.failure()),
        None => render_status_line(style, "error", &format!("{err:#}")),
    }
}

pub(crate) fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}
