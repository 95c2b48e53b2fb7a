mod error;
mod policy;
mod report;
mod state;

pub use error::{ErrorKind, Failure, MissingTarget, OtaError, PreconditionFailure};
pub use policy::{
    parse_lenient_timestamp, PolicyPatch, PolicyStore, UpdatePolicy, DEFAULT_BRANCH,
    DEFAULT_MAX_BACKUPS, DEFAULT_UPDATE_SCHEDULE,
};
pub use report::{
    abbreviate_commit, BackupRecord, BootUpdateOutcome, BranchListing, BranchSwitch,
    CreatedBackup, RepositoryState, RollbackOutcome, StatusReport, UpdateCheckResult,
    UpdateOutcome, SHORT_COMMIT_LEN,
};
pub use state::{IllegalTransition, UpdateRun, UpdateStage, UpdateState};

#[cfg(test)]
mod tests;
