use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::{IllegalTransition, UpdateStage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Precondition,
    Command,
    Backup,
    NotFound,
    AlreadyInProgress,
    InvalidInput,
    Config,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network-unreachable",
            Self::Precondition => "precondition-failed",
            Self::Command => "command-failed",
            Self::Backup => "backup-failed",
            Self::NotFound => "not-found",
            Self::AlreadyInProgress => "update-in-progress",
            Self::InvalidInput => "invalid-input",
            Self::Config => "config-failed",
            Self::Internal => "internal-error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreconditionFailure {
    UpdatesDisabled,
    UncommittedChanges,
    UncommittedChangesBlockSwitch,
}

impl fmt::Display for PreconditionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UpdatesDisabled => f.write_str("updates disabled"),
            Self::UncommittedChanges => f.write_str("uncommitted changes present, use force"),
            Self::UncommittedChangesBlockSwitch => {
                f.write_str("uncommitted changes present, commit or discard them before switching branches")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissingTarget {
    NoBackups,
    Backup(String),
    Branch(String),
}

impl fmt::Display for MissingTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoBackups => f.write_str("no backups available"),
            Self::Backup(name) => write!(f, "backup '{name}' not found"),
            Self::Branch(name) => write!(f, "branch '{name}' not found on remote"),
        }
    }
}

#[derive(Debug, Error)]
pub enum OtaError {
    #[error("network-unreachable: {operation} failed: {detail}")]
    Network { operation: String, detail: String },

    #[error("precondition-failed: {0}")]
    Precondition(PreconditionFailure),

    #[error("command-failed: {command} exited with {}: {stderr}", exit_code_label(.exit_code))]
    Command {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("backup-failed: {0}")]
    Backup(String),

    #[error("not-found: {0}")]
    NotFound(MissingTarget),

    #[error("update-in-progress: lock {} is held{}", .lock.display(), holder_suffix(.holder))]
    AlreadyInProgress {
        lock: PathBuf,
        holder: Option<String>,
    },

    #[error("invalid-input: {0}")]
    InvalidInput(String),

    #[error("config-failed: {0}")]
    Config(String),

    #[error("internal-error: {0}")]
    IllegalTransition(#[from] IllegalTransition),

    #[error("update failed while {stage}: {source}")]
    UpdateFailed {
        stage: UpdateStage,
        source: Box<OtaError>,
    },
}

impl OtaError {
    pub fn network(operation: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Network {
            operation: operation.into(),
            detail: detail.into(),
        }
    }

    pub fn backup(detail: impl Into<String>) -> Self {
        Self::Backup(detail.into())
    }

    pub fn invalid_input(detail: impl Into<String>) -> Self {
        Self::InvalidInput(detail.into())
    }

    pub fn config(err: &anyhow::Error) -> Self {
        Self::Config(format!("{err:#}"))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network { .. } => ErrorKind::Network,
            Self::Precondition(_) => ErrorKind::Precondition,
            Self::Command { .. } => ErrorKind::Command,
            Self::Backup(_) => ErrorKind::Backup,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AlreadyInProgress { .. } => ErrorKind::AlreadyInProgress,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Config(_) => ErrorKind::Config,
            Self::IllegalTransition(_) => ErrorKind::Internal,
            Self::UpdateFailed { source, .. } => source.kind(),
        }
    }

    pub fn failed_stage(&self) -> Option<UpdateStage> {
        match self {
            Self::UpdateFailed { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    pub fn failure(&self) -> Failure {
        Failure::from(self)
    }
}

/// Serializable projection of an [`OtaError`] for callers that report
/// failures as data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<UpdateStage>,
}

impl From<&OtaError> for Failure {
    fn from(err: &OtaError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            stage: err.failed_stage(),
        }
    }
}

fn exit_code_label(exit_code: &Option<i32>) -> String {
    exit_code
        .map(|code| format!("status {code}"))
        .unwrap_or_else(|| "no exit status".to_string())
}

fn holder_suffix(holder: &Option<String>) -> String {
    holder
        .as_deref()
        .map(|value| format!(" by {value}"))
        .unwrap_or_default()
}
