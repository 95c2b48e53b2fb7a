use std::fs;
use std::path::{Path, PathBuf};

use kiosk_core::OtaError;

pub const BACKUP_EXTENSION: &str = "tar.zst";
pub const CHECKSUM_EXTENSION: &str = "sha256";
pub const DEFAULT_BACKUP_DIR_NAME: &str = ".backups";
pub const DEFAULT_LOG_FILE: &str = "/var/log/kiosk-ota.log";

pub const EXCLUDED_DIR_NAMES: &[&str] = &[".git", "node_modules", "__pycache__", "venv", ".venv"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtaLayout {
    repo_root: PathBuf,
    backup_dir: PathBuf,
    state_dir: PathBuf,
    log_file: PathBuf,
}

impl OtaLayout {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        let repo_root = repo_root.into();
        let backup_dir = repo_root.join(DEFAULT_BACKUP_DIR_NAME);
        Self {
            state_dir: backup_dir.clone(),
            backup_dir,
            repo_root,
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
        }
    }

    pub fn with_backup_dir(mut self, backup_dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = backup_dir.into();
        self
    }

    pub fn with_state_dir(mut self, state_dir: impl Into<PathBuf>) -> Self {
        self.state_dir = state_dir.into();
        self
    }

    pub fn with_log_file(mut self, log_file: impl Into<PathBuf>) -> Self {
        self.log_file = log_file.into();
        self
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn log_file(&self) -> &Path {
        &self.log_file
    }

    pub fn lock_path(&self) -> PathBuf {
        self.state_dir.join("update.lock")
    }

    pub fn backup_archive_path(&self, name: &str) -> PathBuf {
        self.backup_dir.join(format!("{name}.{BACKUP_EXTENSION}"))
    }

    pub fn backup_checksum_path(&self, name: &str) -> PathBuf {
        self.backup_dir
            .join(format!("{name}.{BACKUP_EXTENSION}.{CHECKSUM_EXTENSION}"))
    }

    pub fn backup_staging_path(&self, name: &str) -> PathBuf {
        self.backup_dir.join(format!(".{name}.{BACKUP_EXTENSION}.tmp"))
    }

    pub fn resolved(self) -> Self {
        Self {
            repo_root: resolve_path(&self.repo_root),
            backup_dir: resolve_path(&self.backup_dir),
            state_dir: resolve_path(&self.state_dir),
            log_file: self.log_file,
        }
    }

    pub fn owned_dirs_in_tree(&self) -> Vec<PathBuf> {
        let mut owned = Vec::new();
        for dir in [&self.backup_dir, &self.state_dir] {
            if let Some(relative) = self.relative_to_tree(dir) {
                if !owned.contains(&relative) {
                    owned.push(relative);
                }
            }
        }
        owned
    }

    fn relative_to_tree(&self, path: &Path) -> Option<PathBuf> {
        path.strip_prefix(&self.repo_root)
            .ok()
            .filter(|relative| !relative.as_os_str().is_empty())
            .map(Path::to_path_buf)
    }

    pub fn ensure_base_dirs(&self) -> Result<(), OtaError> {
        for dir in [&self.backup_dir, &self.state_dir] {
            fs::create_dir_all(dir).map_err(|err| {
                OtaError::backup(format!("failed to create {}: {err}", dir.display()))
            })?;
        }
        Ok(())
    }
}

/// Canonicalizes the longest existing prefix of `path` and appends the rest.
fn resolve_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => return path.to_path_buf(),
        }
    };

    let mut existing = absolute.as_path();
    let mut missing = Vec::new();
    loop {
        if let Ok(canonical) = fs::canonicalize(existing) {
            return missing
                .iter()
                .rev()
                .fold(canonical, |resolved, part| resolved.join(part));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => return absolute,
        }
    }
}
