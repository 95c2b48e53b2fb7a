use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{Failure, OtaError, UpdatePolicy, UpdateStage};

pub const SHORT_COMMIT_LEN: usize = 8;

pub fn abbreviate_commit(commit: &str) -> String {
    commit.trim().chars().take(SHORT_COMMIT_LEN).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryState {
    pub current_branch: String,
    pub current_commit: String,
    pub has_uncommitted_changes: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    #[serde(flatten)]
    pub policy: UpdatePolicy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<RepositoryState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateCheckResult {
    pub update_available: bool,
    pub current_commit: String,
    pub remote_commit: String,
    pub behind_count: u64,
    pub commits: Vec<String>,
    pub branch: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Failure>,
}

impl UpdateCheckResult {
    /// A failed check never claims an update is available.
    pub fn failed(branch: impl Into<String>, err: &OtaError) -> Self {
        Self {
            update_available: false,
            current_commit: String::new(),
            remote_commit: String::new(),
            behind_count: 0,
            commits: Vec::new(),
            branch: branch.into(),
            error: Some(err.failure()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupRecord {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedBackup {
    pub name: String,
    pub path: PathBuf,
    pub sha256: String,
    pub entries: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateOutcome {
    pub success: bool,
    pub needs_restart: bool,
    pub message: String,
    pub output: String,
    pub branch: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<CreatedBackup>,
    pub transitions: Vec<UpdateStage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollbackOutcome {
    pub success: bool,
    pub needs_restart: bool,
    pub backup_name: String,
    pub restored_entries: u64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BootUpdateOutcome {
    Skipped { message: String },
    Checked { check: UpdateCheckResult },
    Updated { outcome: UpdateOutcome },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchListing {
    pub branches: Vec<String>,
    pub current: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchSwitch {
    pub success: bool,
    pub branch: String,
    pub output: String,
    pub message: String,
}
