use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use kiosk_core::OtaError;
use tracing::{debug, info};

use crate::command::{CommandError, CommandRunner, CommandTimeouts, Invocation};

pub const CRON_MARKER: &str = "kiosk-ota:boot-update";

const CRON_KEYWORDS: &[&str] = &[
    "@reboot",
    "@yearly",
    "@annually",
    "@monthly",
    "@weekly",
    "@daily",
    "@midnight",
    "@hourly",
];

pub trait CronTable: Send + Sync {
    fn read(&self) -> Result<String, OtaError>;
    fn install(&self, content: &str) -> Result<(), OtaError>;
    fn describe(&self) -> String;

    fn run_as(&self) -> Option<&str> {
        None
    }
}

pub struct SystemCrontab {
    runner: Arc<dyn CommandRunner>,
    timeouts: CommandTimeouts,
    scratch_dir: PathBuf,
}

impl SystemCrontab {
    pub fn new(runner: Arc<dyn CommandRunner>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            timeouts: CommandTimeouts::default(),
            scratch_dir: scratch_dir.into(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: CommandTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }
}

impl CronTable for SystemCrontab {
    fn read(&self) -> Result<String, OtaError> {
        let invocation = Invocation::new("crontab", self.timeouts.local).arg("-l");
        match self.runner.run(&invocation) {
            Ok(content) => Ok(content),
            // `crontab -l` exits non-zero when the user has no table yet.
            Err(CommandError::Failed { .. }) => Ok(String::new()),
            Err(err) => Err(err.into()),
        }
    }

    fn install(&self, content: &str) -> Result<(), OtaError> {
        fs::create_dir_all(&self.scratch_dir)
            .map_err(|err| cron_file_error(&self.scratch_dir, "create", &err))?;
        let staged = self
            .scratch_dir
            .join(format!(".crontab.{}.tmp", std::process::id()));
        fs::write(&staged, content).map_err(|err| cron_file_error(&staged, "write", &err))?;

        let invocation =
            Invocation::new("crontab", self.timeouts.local).arg(staged.to_string_lossy());
        let result = self.runner.run(&invocation);
        let _ = fs::remove_file(&staged);
        result.map(|_| ()).map_err(Into::into)
    }

    fn describe(&self) -> String {
        "user crontab".to_string()
    }
}

pub struct FileCronTable {
    path: PathBuf,
    user: Option<String>,
}

impl FileCronTable {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            user: None,
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CronTable for FileCronTable {
    fn read(&self) -> Result<String, OtaError> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(content),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(err) => Err(cron_file_error(&self.path, "read", &err)),
        }
    }

    fn install(&self, content: &str) -> Result<(), OtaError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|err| cron_file_error(parent, "create", &err))?;
            }
        }
        let staged = self.path.with_extension("tmp");
        fs::write(&staged, content).map_err(|err| cron_file_error(&staged, "write", &err))?;
        if let Err(err) = fs::rename(&staged, &self.path) {
            let _ = fs::remove_file(&staged);
            return Err(cron_file_error(&self.path, "replace", &err));
        }
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn run_as(&self) -> Option<&str> {
        self.user.as_deref()
    }
}

fn cron_file_error(path: &Path, action: &str, err: &io::Error) -> OtaError {
    OtaError::Command {
        command: format!("cron file {action}"),
        exit_code: None,
        stderr: format!("failed to {action} {}: {err}", path.display()),
    }
}

pub fn validate_schedule(schedule: &str) -> Result<(), OtaError> {
    if schedule.contains(['\n', '\r']) {
        return Err(OtaError::invalid_input(
            "cron schedule must be a single line",
        ));
    }
    let fields = schedule.split_whitespace().collect::<Vec<_>>();
    let valid = match fields.as_slice() {
        [keyword] if keyword.starts_with('@') => CRON_KEYWORDS.contains(keyword),
        [_, _, _, _, _] => fields.iter().all(|field| {
            field
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '*' | ',' | '-' | '/'))
        }),
        _ => false,
    };
    if !valid {
        return Err(OtaError::invalid_input(format!(
            "invalid cron schedule: '{schedule}'"
        )));
    }
    Ok(())
}

/// The boot command reads its tree from `--repo`, never from the cron
/// working directory.
pub fn render_entry(
    schedule: &str,
    run_as: Option<&str>,
    repo_root: &Path,
    boot_command: &str,
) -> String {
    let schedule = schedule.split_whitespace().collect::<Vec<_>>().join(" ");
    let user = run_as.map(|user| format!("{user} ")).unwrap_or_default();
    format!(
        "{schedule} {user}{} --repo {} # {CRON_MARKER}",
        boot_command.trim(),
        shell_quote(&repo_root.to_string_lossy())
    )
}

pub fn rewrite_table(existing: &str, entry: &str) -> String {
    let mut lines = existing
        .lines()
        .filter(|line| !line.contains(CRON_MARKER))
        .collect::<Vec<_>>();
    while lines.last().is_some_and(|line| line.trim().is_empty()) {
        lines.pop();
    }
    let mut rewritten = lines.join("\n");
    if !rewritten.is_empty() {
        rewritten.push('\n');
    }
    rewritten.push_str(entry);
    rewritten.push('\n');
    rewritten
}

pub fn install_schedule(
    table: &dyn CronTable,
    schedule: &str,
    repo_root: &Path,
    boot_command: &str,
) -> Result<String, OtaError> {
    validate_schedule(schedule)?;
    let entry = render_entry(schedule, table.run_as(), repo_root, boot_command);
    let existing = table.read()?;
    table.install(&rewrite_table(&existing, &entry))?;
    debug!(target: "kiosk::ota", table = %table.describe(), entry = %entry, "cron entry written");
    info!(target: "kiosk::ota", schedule, table = %table.describe(), "update schedule installed");
    Ok(entry)
}

pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '/' | '.' | '_' | '-' | '+' | ':'))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}
