use chrono::Utc;
use kiosk_core::{
    abbreviate_commit, MissingTarget, OtaError, PolicyPatch, PolicyStore, UpdateCheckResult,
};
use tracing::{info, warn};

use crate::git::SourceControl;

/// Works out how far the tree is behind `<remote>/<branch>`. Only remote refs
/// and `last_check` change; the working tree is never touched.
pub struct UpdatePlanner<'a> {
    git: &'a dyn SourceControl,
    store: &'a dyn PolicyStore,
}

impl<'a> UpdatePlanner<'a> {
    pub fn new(git: &'a dyn SourceControl, store: &'a dyn PolicyStore) -> Self {
        Self { git, store }
    }

    pub fn check(&self) -> UpdateCheckResult {
        let branch = match self.store.load_policy() {
            Ok(policy) => policy.branch,
            Err(err) => {
                let err = OtaError::config(&err);
                warn!(target: "kiosk::ota", error = %err, "update check could not read policy");
                return UpdateCheckResult::failed(String::new(), &err);
            }
        };

        match self.plan(&branch) {
            Ok(result) => {
                if let Err(err) = self.store.update_policy(&PolicyPatch::last_check(Utc::now())) {
                    warn!(target: "kiosk::ota", error = %format!("{err:#}"), "failed to record last check time");
                }
                info!(
                    target: "kiosk::ota",
                    branch = %result.branch,
                    behind = result.behind_count,
                    update_available = result.update_available,
                    "update check finished"
                );
                result
            }
            Err(err) => {
                warn!(target: "kiosk::ota", branch = %branch, error = %err, "update check failed");
                UpdateCheckResult::failed(branch, &err)
            }
        }
    }

    fn plan(&self, branch: &str) -> Result<UpdateCheckResult, OtaError> {
        self.git.fetch()?;

        let current = self.git.head_commit()?;
        let remote_ref = self.git.remote_ref(branch);
        let remote = self
            .git
            .resolve_ref(&remote_ref)?
            .ok_or_else(|| OtaError::NotFound(MissingTarget::Branch(branch.to_string())))?;

        let range = format!("HEAD..{remote_ref}");
        let behind_count = self.git.rev_list_count(&range)?;
        let commits = if behind_count > 0 {
            self.git.log_oneline(&range)?
        } else {
            Vec::new()
        };

        Ok(UpdateCheckResult {
            update_available: behind_count > 0,
            current_commit: abbreviate_commit(&current),
            remote_commit: abbreviate_commit(&remote),
            behind_count,
            commits,
            branch: branch.to_string(),
            error: None,
        })
    }
}
