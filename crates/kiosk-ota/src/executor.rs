use chrono::Utc;
use kiosk_core::{
    OtaError, PolicyPatch, PolicyStore, PreconditionFailure, UpdateOutcome, UpdateRun,
    UpdateStage,
};
use tracing::{error, info, warn};

use crate::backup::BackupArchiver;
use crate::git::SourceControl;
use crate::journal::OtaJournal;

/// Drives one update through [`UpdateRun`]. The caller holds the update guard.
pub struct UpdateExecutor<'a> {
    git: &'a dyn SourceControl,
    store: &'a dyn PolicyStore,
    archiver: &'a BackupArchiver,
    journal: &'a OtaJournal,
}

impl<'a> UpdateExecutor<'a> {
    pub fn new(
        git: &'a dyn SourceControl,
        store: &'a dyn PolicyStore,
        archiver: &'a BackupArchiver,
        journal: &'a OtaJournal,
    ) -> Self {
        Self {
            git,
            store,
            archiver,
            journal,
        }
    }

    pub fn apply(&self, force: bool) -> Result<UpdateOutcome, OtaError> {
        let mut run = UpdateRun::new();
        self.enter(&mut run, UpdateStage::CheckingPreconditions)?;

        let policy = self
            .store
            .load_policy()
            .map_err(|err| self.fail(&mut run, OtaError::config(&err)))?;

        if !policy.enabled && !force {
            return Err(self.abort(&mut run, PreconditionFailure::UpdatesDisabled));
        }
        if !force {
            let dirty = self
                .git
                .has_uncommitted_changes()
                .map_err(|err| self.fail(&mut run, err))?;
            if dirty {
                return Err(self.abort(&mut run, PreconditionFailure::UncommittedChanges));
            }
        }

        let backup = if policy.backup_before_update {
            self.enter(&mut run, UpdateStage::BackingUp)?;
            let created = self
                .archiver
                .create(None, policy.max_backups)
                .map_err(|err| self.fail(&mut run, err))?;
            self.journal
                .append(&format!("backup created before update: {}", created.name));
            Some(created)
        } else {
            None
        };

        self.enter(&mut run, UpdateStage::Stashing)?;
        self.git.stash().map_err(|err| self.fail(&mut run, err))?;

        self.enter(&mut run, UpdateStage::Checkout)?;
        self.git
            .checkout(&policy.branch)
            .map_err(|err| self.fail(&mut run, err))?;

        self.enter(&mut run, UpdateStage::Pulling)?;
        let output = self
            .git
            .pull(&policy.branch)
            .map_err(|err| self.fail(&mut run, err))?;
        run.finish()?;

        if let Err(err) = self.store.update_policy(&PolicyPatch::last_update(Utc::now())) {
            warn!(target: "kiosk::ota", error = %format!("{err:#}"), "failed to record last update time");
        }
        let output = output.trim().to_string();
        self.journal.append(&format!(
            "update applied on {}: {}",
            policy.branch,
            if output.is_empty() { "no output" } else { output.as_str() }
        ));
        info!(target: "kiosk::ota", branch = %policy.branch, forced = force, "update applied");

        Ok(UpdateOutcome {
            success: true,
            needs_restart: true,
            message: format!("updated to latest {}", policy.branch),
            output,
            branch: policy.branch,
            backup,
            transitions: run.trace().to_vec(),
        })
    }

    fn enter(&self, run: &mut UpdateRun, stage: UpdateStage) -> Result<(), OtaError> {
        run.enter(stage)?;
        info!(target: "kiosk::ota", stage = %stage, "update stage");
        Ok(())
    }

    fn abort(&self, run: &mut UpdateRun, reason: PreconditionFailure) -> OtaError {
        if let Err(err) = run.abort(reason) {
            return err.into();
        }
        info!(target: "kiosk::ota", reason = %reason, "update aborted");
        self.journal.append(&format!("update aborted: {reason}"));
        OtaError::Precondition(reason)
    }

    /// Marks the run failed and wraps errors raised by stages that did work.
    fn fail(&self, run: &mut UpdateRun, err: OtaError) -> OtaError {
        let stage = match run.fail(&err) {
            Ok(stage) => stage,
            Err(illegal) => return illegal.into(),
        };
        error!(
            target: "kiosk::ota",
            stage = %stage,
            tree_touched = run.tree_touched(),
            error = %err,
            "update failed"
        );
        self.journal
            .append(&format!("update failed while {stage}: {err}"));
        if stage == UpdateStage::CheckingPreconditions {
            err
        } else {
            OtaError::UpdateFailed {
                stage,
                source: Box::new(err),
            }
        }
    }
}
