use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::PreconditionFailure;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStage {
    CheckingPreconditions,
    BackingUp,
    Stashing,
    Checkout,
    Pulling,
}

impl UpdateStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CheckingPreconditions => "checking preconditions",
            Self::BackingUp => "backing up",
            Self::Stashing => "stashing",
            Self::Checkout => "checking out",
            Self::Pulling => "pulling",
        }
    }

    pub fn mutates_tree(self) -> bool {
        matches!(self, Self::Stashing | Self::Checkout | Self::Pulling)
    }

    fn may_follow(self, previous: Option<UpdateStage>) -> bool {
        match (previous, self) {
            (None, Self::CheckingPreconditions) => true,
            (Some(Self::CheckingPreconditions), Self::BackingUp | Self::Stashing) => true,
            (Some(Self::BackingUp), Self::Stashing) => true,
            (Some(Self::Stashing), Self::Checkout) => true,
            (Some(Self::Checkout), Self::Pulling) => true,
            _ => false,
        }
    }
}

impl fmt::Display for UpdateStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UpdateState {
    Idle,
    Running { stage: UpdateStage },
    Done,
    Aborted { reason: PreconditionFailure },
    Failed { stage: UpdateStage, error: String },
}

impl UpdateState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Aborted { .. } | Self::Failed { .. })
    }

    fn label(&self) -> String {
        match self {
            Self::Idle => "idle".to_string(),
            Self::Running { stage } => stage.as_str().to_string(),
            Self::Done => "done".to_string(),
            Self::Aborted { .. } => "aborted".to_string(),
            Self::Failed { stage, .. } => format!("failed ({stage})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal update transition from {from} to {to}")]
pub struct IllegalTransition {
    pub from: String,
    pub to: String,
}

/// One pass through the update state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRun {
    state: UpdateState,
    trace: Vec<UpdateStage>,
}

impl Default for UpdateRun {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateRun {
    pub fn new() -> Self {
        Self {
            state: UpdateState::Idle,
            trace: Vec::new(),
        }
    }

    pub fn state(&self) -> &UpdateState {
        &self.state
    }

    pub fn trace(&self) -> &[UpdateStage] {
        &self.trace
    }

    pub fn current_stage(&self) -> Option<UpdateStage> {
        match &self.state {
            UpdateState::Running { stage } => Some(*stage),
            _ => None,
        }
    }

    pub fn enter(&mut self, next: UpdateStage) -> Result<(), IllegalTransition> {
        let previous = match &self.state {
            UpdateState::Idle => None,
            UpdateState::Running { stage } => Some(*stage),
            _ => return Err(self.illegal(next.as_str())),
        };
        if !next.may_follow(previous) {
            return Err(self.illegal(next.as_str()));
        }

        self.state = UpdateState::Running { stage: next };
        self.trace.push(next);
        Ok(())
    }

    pub fn finish(&mut self) -> Result<(), IllegalTransition> {
        if self.current_stage() != Some(UpdateStage::Pulling) {
            return Err(self.illegal("done"));
        }
        self.state = UpdateState::Done;
        Ok(())
    }

    pub fn abort(&mut self, reason: PreconditionFailure) -> Result<(), IllegalTransition> {
        if self.state.is_terminal() {
            return Err(self.illegal("aborted"));
        }
        self.state = UpdateState::Aborted { reason };
        Ok(())
    }

    pub fn fail(&mut self, error: impl fmt::Display) -> Result<UpdateStage, IllegalTransition> {
        let stage = match &self.state {
            UpdateState::Idle => UpdateStage::CheckingPreconditions,
            UpdateState::Running { stage } => *stage,
            _ => return Err(self.illegal("failed")),
        };
        self.state = UpdateState::Failed {
            stage,
            error: error.to_string(),
        };
        Ok(stage)
    }

    pub fn tree_touched(&self) -> bool {
        self.trace.iter().any(|stage| stage.mutates_tree())
    }

    fn illegal(&self, to: &str) -> IllegalTransition {
        IllegalTransition {
            from: self.state.label(),
            to: to.to_string(),
        }
    }
}
