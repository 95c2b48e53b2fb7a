use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use kiosk_config::DeviceConfigStore;
use kiosk_ota::{
    CommandRunner, CommandTimeouts, CronTable, FileCronTable, GitCli, ManagerOptions, OtaLayout,
    OtaManager, ServiceOptions, SystemCrontab, SystemRunner, DEFAULT_BACKEND_SERVICE,
    DEFAULT_BOOT_COMMAND, DEFAULT_KIOSK_SERVICE, DEFAULT_LOG_FILE, DEFAULT_LOCAL_TIMEOUT,
    DEFAULT_NETWORK_TIMEOUT, DEFAULT_REMOTE, shell_quote,
};
use serde::Deserialize;
use tracing::debug;

pub const DEFAULT_SETTINGS_PATH: &str = "/etc/kiosk-ota/settings.toml";
pub const DEFAULT_REPO_ROOT: &str = "/opt/kiosk";
const DEVICE_CONFIG_FILE_NAME: &str = "device_config.json";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub repo_root: PathBuf,
    pub device_config: Option<PathBuf>,
    pub backup_dir: Option<PathBuf>,
    pub state_dir: Option<PathBuf>,
    pub log_file: PathBuf,
    pub remote: String,
    pub network_timeout_secs: u64,
    pub local_timeout_secs: u64,
    pub backend_service: String,
    pub kiosk_service: Option<String>,
    pub use_sudo: bool,
    pub boot_command: String,
    pub cron_file: Option<PathBuf>,
    pub cron_user: Option<String>,
    #[serde(skip)]
    pub settings_file: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            repo_root: PathBuf::from(DEFAULT_REPO_ROOT),
            device_config: None,
            backup_dir: None,
            state_dir: None,
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
            remote: DEFAULT_REMOTE.to_string(),
            network_timeout_secs: DEFAULT_NETWORK_TIMEOUT.as_secs(),
            local_timeout_secs: DEFAULT_LOCAL_TIMEOUT.as_secs(),
            backend_service: DEFAULT_BACKEND_SERVICE.to_string(),
            kiosk_service: Some(DEFAULT_KIOSK_SERVICE.to_string()),
            use_sudo: true,
            boot_command: DEFAULT_BOOT_COMMAND.to_string(),
            cron_file: None,
            cron_user: None,
            settings_file: None,
        }
    }
}

impl Settings {
    pub fn parse(content: &str) -> Result<Self> {
        let settings: Self = toml::from_str(content).context("failed to parse kiosk-ota settings")?;
        settings.validate()?;
        Ok(settings)
    }

    /// An explicit path must exist; the default path is optional.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = explicit.unwrap_or_else(|| Path::new(DEFAULT_SETTINGS_PATH));
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound && explicit.is_none() => {
                debug!(target: "kiosk::cli", path = %path.display(), "no settings file, using defaults");
                return Ok(Self::default());
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed reading settings: {}", path.display()));
            }
        };
        let settings = Self::parse(&content)
            .with_context(|| format!("invalid settings file: {}", path.display()))?;
        Ok(match explicit {
            Some(path) => settings
                .with_settings_file(fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())),
            None => settings,
        })
    }

    pub fn with_settings_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings_file = Some(path.into());
        self
    }

    pub fn with_repo_root(mut self, repo_root: Option<PathBuf>) -> Self {
        if let Some(repo_root) = repo_root {
            self.repo_root = repo_root;
        }
        self
    }

    fn validate(&self) -> Result<()> {
        if self.network_timeout_secs == 0 || self.local_timeout_secs == 0 {
            anyhow::bail!("timeouts must be at least one second");
        }
        if self.remote.trim().is_empty() {
            anyhow::bail!("remote must not be empty");
        }
        if self.backend_service.trim().is_empty() {
            anyhow::bail!("backend_service must not be empty");
        }
        if self.boot_command.trim().is_empty() {
            anyhow::bail!("boot_command must not be empty");
        }
        Ok(())
    }

    pub fn device_config_path(&self) -> PathBuf {
        self.device_config
            .clone()
            .unwrap_or_else(|| self.repo_root.join(DEVICE_CONFIG_FILE_NAME))
    }

    pub fn layout(&self) -> OtaLayout {
        let mut layout = OtaLayout::new(&self.repo_root).with_log_file(&self.log_file);
        if let Some(backup_dir) = &self.backup_dir {
            layout = layout.with_backup_dir(backup_dir).with_state_dir(backup_dir);
        }
        if let Some(state_dir) = &self.state_dir {
            layout = layout.with_state_dir(state_dir);
        }
        layout
    }

    pub fn timeouts(&self) -> CommandTimeouts {
        CommandTimeouts {
            network: Duration::from_secs(self.network_timeout_secs),
            local: Duration::from_secs(self.local_timeout_secs),
        }
    }

    pub fn manager_options(&self) -> ManagerOptions {
        ManagerOptions {
            timeouts: self.timeouts(),
            services: ServiceOptions {
                backend_unit: self.backend_service.clone(),
                kiosk_unit: self
                    .kiosk_service
                    .clone()
                    .filter(|unit| !unit.trim().is_empty()),
                use_sudo: self.use_sudo,
            },
            boot_command: self.boot_command(),
        }
    }

    fn boot_command(&self) -> String {
        match &self.settings_file {
            Some(path) => format!(
                "{} --settings {}",
                self.boot_command.trim(),
                shell_quote(&path.to_string_lossy())
            ),
            None => self.boot_command.clone(),
        }
    }

    pub fn build_manager(&self) -> OtaManager {
        let layout = self.layout();
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
        let git = GitCli::for_layout(&layout, runner.clone())
            .with_remote(&self.remote)
            .with_timeouts(self.timeouts());
        let cron: Arc<dyn CronTable> = match &self.cron_file {
            Some(path) => {
                let table = FileCronTable::new(path);
                match &self.cron_user {
                    Some(user) => Arc::new(table.with_user(user)),
                    None => Arc::new(table),
                }
            }
            None => Arc::new(
                SystemCrontab::new(runner.clone(), layout.state_dir())
                    .with_timeouts(self.timeouts()),
            ),
        };
        let store = Arc::new(DeviceConfigStore::new(self.device_config_path()));

        OtaManager::new(layout, store, Arc::new(git), runner, cron)
            .with_options(self.manager_options())
    }
}
