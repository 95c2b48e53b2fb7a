use std::fs;
use std::path::{Path, PathBuf};

use kiosk_core::OtaError;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::command::{CommandRunner, CommandTimeouts, Invocation};
use crate::fs_utils::remove_dir_all_if_exists;
use crate::layout::OtaLayout;

pub const DEFAULT_BACKEND_SERVICE: &str = "pi-analytics-backend";
pub const DEFAULT_KIOSK_SERVICE: &str = "pi-analytics-kiosk";
pub const DEFAULT_REBOOT_DELAY_SECS: u64 = 10;

const PYTHON_CACHE_DIR: &str = "__pycache__";
const FRONTEND_DIR: &str = "frontend";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceOptions {
    pub backend_unit: String,
    pub kiosk_unit: Option<String>,
    pub use_sudo: bool,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            backend_unit: DEFAULT_BACKEND_SERVICE.to_string(),
            kiosk_unit: Some(DEFAULT_KIOSK_SERVICE.to_string()),
            use_sudo: true,
        }
    }
}

impl ServiceOptions {
    fn privileged(&self, program: &str, timeout: std::time::Duration) -> Invocation {
        if self.use_sudo {
            Invocation::new("sudo", timeout).args(["-n", program])
        } else {
            Invocation::new(program, timeout)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheCleanReport {
    pub removed: Vec<PathBuf>,
    pub npm_cache_cleaned: bool,
    pub skipped: Vec<String>,
}

impl CacheCleanReport {
    pub fn cleaned_anything(&self) -> bool {
        !self.removed.is_empty() || self.npm_cache_cleaned
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestartReport {
    pub restarted: Vec<String>,
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiskUsage {
    pub filesystem: String,
    pub mount_point: String,
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub available_bytes: u64,
    pub percent_used: f64,
}

pub fn clean_cache(
    layout: &OtaLayout,
    runner: &dyn CommandRunner,
    timeouts: CommandTimeouts,
) -> CacheCleanReport {
    let mut report = CacheCleanReport {
        removed: Vec::new(),
        npm_cache_cleaned: false,
        skipped: Vec::new(),
    };

    let mut cache_dirs = Vec::new();
    let skip = [layout.backup_dir(), layout.state_dir()];
    collect_python_caches(layout.repo_root(), &skip, &mut cache_dirs, &mut report.skipped);
    for dir in cache_dirs {
        match remove_dir_all_if_exists(&dir) {
            Ok(()) => {
                debug!(target: "kiosk::ota", dir = %dir.display(), "removed python cache");
                report.removed.push(dir);
            }
            Err(err) => {
                warn!(target: "kiosk::ota", dir = %dir.display(), error = %err, "failed to remove python cache");
                report
                    .skipped
                    .push(format!("{}: {err}", dir.display()));
            }
        }
    }

    let frontend = layout.repo_root().join(FRONTEND_DIR);
    if frontend.is_dir() {
        let invocation = Invocation::new("npm", timeouts.network)
            .args(["cache", "clean", "--force"])
            .current_dir(&frontend);
        match runner.run(&invocation) {
            Ok(_) => report.npm_cache_cleaned = true,
            Err(err) => {
                warn!(target: "kiosk::ota", error = %err, "npm cache clean failed");
                report.skipped.push(format!("npm cache: {err}"));
            }
        }
    }

    info!(
        target: "kiosk::ota",
        removed = report.removed.len(),
        npm = report.npm_cache_cleaned,
        "cache clean finished"
    );
    report
}

fn collect_python_caches(
    dir: &Path,
    skip: &[&Path],
    found: &mut Vec<PathBuf>,
    problems: &mut Vec<String>,
) {
    let read_dir = match fs::read_dir(dir) {
        Ok(read_dir) => read_dir,
        Err(err) => {
            problems.push(format!("{}: {err}", dir.display()));
            return;
        }
    };
    for entry in read_dir.flatten() {
        let path = entry.path();
        let is_dir = entry.file_type().map(|kind| kind.is_dir()).unwrap_or(false);
        if !is_dir || skip.iter().any(|skipped| *skipped == path) {
            continue;
        }
        let name = entry.file_name();
        if name == ".git" {
            continue;
        }
        if name == PYTHON_CACHE_DIR {
            found.push(path);
        } else {
            collect_python_caches(&path, skip, found, problems);
        }
    }
}

pub fn restart_services(
    runner: &dyn CommandRunner,
    options: &ServiceOptions,
    timeouts: CommandTimeouts,
) -> Result<RestartReport, OtaError> {
    let mut report = RestartReport {
        restarted: Vec::new(),
        skipped: Vec::new(),
    };

    runner.run(
        &options
            .privileged("systemctl", timeouts.local)
            .args(["restart", options.backend_unit.as_str()]),
    )?;
    report.restarted.push(options.backend_unit.clone());

    if let Some(kiosk) = &options.kiosk_unit {
        match runner.run(
            &options
                .privileged("systemctl", timeouts.local)
                .args(["restart", kiosk.as_str()]),
        ) {
            Ok(_) => report.restarted.push(kiosk.clone()),
            Err(err) => {
                debug!(target: "kiosk::ota", unit = %kiosk, error = %err, "kiosk unit not restarted");
                report.skipped.push(kiosk.clone());
            }
        }
    }

    info!(target: "kiosk::ota", restarted = ?report.restarted, "services restarted");
    Ok(report)
}

/// Schedules a reboot. `shutdown` takes whole minutes, so the delay is
/// rounded down and anything under a minute reboots immediately.
pub fn reboot_system(
    runner: &dyn CommandRunner,
    options: &ServiceOptions,
    delay_secs: u64,
    timeouts: CommandTimeouts,
) -> Result<u64, OtaError> {
    let minutes = delay_secs / 60;
    runner.run(
        &options
            .privileged("shutdown", timeouts.local)
            .args(["-r".to_string(), format!("+{minutes}")]),
    )?;
    info!(target: "kiosk::ota", minutes, "reboot scheduled");
    Ok(minutes)
}

pub fn disk_usage(runner: &dyn CommandRunner, timeouts: CommandTimeouts) -> Result<DiskUsage, OtaError> {
    let output = runner.run(&Invocation::new("df", timeouts.local).args(["-P", "-k", "/"]))?;
    parse_df_output(&output).ok_or_else(|| OtaError::Command {
        command: "df -P -k /".to_string(),
        exit_code: Some(0),
        stderr: format!("unexpected df output: '{}'", output.trim()),
    })
}

pub(crate) fn parse_df_output(output: &str) -> Option<DiskUsage> {
    let line = output.lines().skip(1).find(|line| !line.trim().is_empty())?;
    let fields = line.split_whitespace().collect::<Vec<_>>();
    if fields.len() < 6 {
        return None;
    }
    let total_kib = fields[1].parse::<u64>().ok()?;
    let used_kib = fields[2].parse::<u64>().ok()?;
    let available_kib = fields[3].parse::<u64>().ok()?;
    let percent_used = fields[4].trim_end_matches('%').parse::<f64>().ok()?;
    Some(DiskUsage {
        filesystem: fields[0].to_string(),
        mount_point: fields[5..].join(" "),
        total_bytes: total_kib * 1024,
        used_bytes: used_kib * 1024,
        available_bytes: available_kib * 1024,
        percent_used,
    })
}
