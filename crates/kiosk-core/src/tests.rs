use chrono::{TimeZone, Utc};

use super::*;

#[test]
fn policy_defaults_match_device_defaults() {
    let policy = UpdatePolicy::default();
    assert!(policy.enabled);
    assert_eq!(policy.branch, "main");
    assert!(policy.check_on_boot);
    assert!(!policy.auto_pull);
    assert!(policy.backup_before_update);
    assert_eq!(policy.max_backups, 5);
    assert_eq!(policy.update_schedule, "0 3 * * *");
    assert_eq!(policy.last_check, None);
    assert_eq!(policy.last_update, None);
}

#[test]
fn policy_deserialize_fills_missing_fields_with_defaults() {
    let policy: UpdatePolicy =
        serde_json::from_str(r#"{"branch": "develop", "auto_pull": true}"#)
            .expect("must parse partial policy");
    assert_eq!(policy.branch, "develop");
    assert!(policy.auto_pull);
    assert!(policy.enabled);
    assert_eq!(policy.max_backups, 5);
}

#[test]
fn policy_deserialize_accepts_rfc3339_and_null_timestamps() {
    let policy: UpdatePolicy = serde_json::from_str(
        r#"{"last_check": "2025-02-03T04:05:06Z", "last_update": null}"#,
    )
    .expect("must parse policy timestamps");
    assert_eq!(
        policy.last_check,
        Some(Utc.with_ymd_and_hms(2025, 2, 3, 4, 5, 6).unwrap())
    );
    assert_eq!(policy.last_update, None);
}

#[test]
fn policy_deserialize_accepts_naive_legacy_timestamps() {
    let policy: UpdatePolicy =
        serde_json::from_str(r#"{"last_update": "2024-05-01T03:00:00.123456"}"#)
            .expect("must parse legacy timestamp");
    assert!(policy.last_update.is_some());
}

#[test]
fn lenient_timestamp_rejects_garbage() {
    assert_eq!(parse_lenient_timestamp("yesterday"), None);
    assert_eq!(parse_lenient_timestamp("   "), None);
}

#[test]
fn policy_patch_serializes_only_set_fields() {
    let patch = PolicyPatch::branch("develop");
    let value = serde_json::to_value(&patch).expect("must serialize patch");
    assert_eq!(value, serde_json::json!({"branch": "develop"}));
    assert!(!patch.is_empty());
    assert!(PolicyPatch::default().is_empty());
}

#[test]
fn policy_patch_apply_overwrites_only_set_fields() {
    let mut policy = UpdatePolicy::default();
    let at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
    let patch = PolicyPatch {
        max_backups: Some(0),
        last_check: Some(at),
        ..PolicyPatch::default()
    };
    patch.apply_to(&mut policy);
    assert_eq!(policy.max_backups, 0);
    assert_eq!(policy.last_check, Some(at));
    assert_eq!(policy.branch, "main");
}

#[test]
fn update_run_walks_full_path_with_backup() {
    let mut run = UpdateRun::new();
    for stage in [
        UpdateStage::CheckingPreconditions,
        UpdateStage::BackingUp,
        UpdateStage::Stashing,
        UpdateStage::Checkout,
        UpdateStage::Pulling,
    ] {
        run.enter(stage).expect("must accept next stage");
    }
    run.finish().expect("must finish after pulling");
    assert_eq!(run.state(), &UpdateState::Done);
    assert_eq!(run.trace().len(), 5);
    assert!(run.tree_touched());
}

#[test]
fn update_run_may_skip_backup() {
    let mut run = UpdateRun::new();
    run.enter(UpdateStage::CheckingPreconditions)
        .expect("must enter preconditions");
    run.enter(UpdateStage::Stashing)
        .expect("backup stage is optional");
}

#[test]
fn update_run_rejects_skipping_checkout() {
    let mut run = UpdateRun::new();
    run.enter(UpdateStage::CheckingPreconditions)
        .expect("must enter preconditions");
    run.enter(UpdateStage::Stashing).expect("must stash");
    let err = run
        .enter(UpdateStage::Pulling)
        .expect_err("pull before checkout must be rejected");
    assert_eq!(err.from, "stashing");
    assert_eq!(err.to, "pulling");
}

#[test]
fn update_run_rejects_finish_before_pull() {
    let mut run = UpdateRun::new();
    run.enter(UpdateStage::CheckingPreconditions)
        .expect("must enter preconditions");
    assert!(run.finish().is_err());
}

#[test]
fn update_run_abort_is_terminal() {
    let mut run = UpdateRun::new();
    run.enter(UpdateStage::CheckingPreconditions)
        .expect("must enter preconditions");
    run.abort(PreconditionFailure::UncommittedChanges)
        .expect("must abort from preconditions");
    assert!(run.state().is_terminal());
    assert!(!run.tree_touched());
    assert!(run.enter(UpdateStage::Stashing).is_err());
    assert!(run.fail("late").is_err());
}

#[test]
fn update_run_fail_records_current_stage() {
    let mut run = UpdateRun::new();
    run.enter(UpdateStage::CheckingPreconditions)
        .expect("must enter preconditions");
    run.enter(UpdateStage::Stashing).expect("must stash");
    run.enter(UpdateStage::Checkout).expect("must checkout");
    let stage = run.fail("checkout exploded").expect("must fail");
    assert_eq!(stage, UpdateStage::Checkout);
    assert_eq!(
        run.state(),
        &UpdateState::Failed {
            stage: UpdateStage::Checkout,
            error: "checkout exploded".to_string()
        }
    );
}

#[test]
fn error_kinds_map_to_reason_codes() {
    let err = OtaError::network("fetch", "timed out after 120s");
    assert_eq!(err.kind(), ErrorKind::Network);
    assert!(err.to_string().starts_with("network-unreachable:"));

    let err = OtaError::Precondition(PreconditionFailure::UpdatesDisabled);
    assert_eq!(err.to_string(), "precondition-failed: updates disabled");

    let err = OtaError::Precondition(PreconditionFailure::UncommittedChangesBlockSwitch);
    assert_eq!(err.kind(), ErrorKind::Precondition);
    assert!(err.to_string().contains("before switching branches"));
    assert!(!err.to_string().contains("force"));

    let err = OtaError::NotFound(MissingTarget::Backup("t1".to_string()));
    assert_eq!(err.to_string(), "not-found: backup 't1' not found");
}

#[test]
fn command_error_message_includes_exit_status_and_stderr() {
    let err = OtaError::Command {
        command: "git checkout develop".to_string(),
        exit_code: Some(1),
        stderr: "error: pathspec 'develop' did not match".to_string(),
    };
    let message = err.to_string();
    assert!(message.contains("git checkout develop exited with status 1"));
    assert!(message.contains("pathspec"));
}

#[test]
fn update_failed_reports_inner_kind_and_stage() {
    let err = OtaError::UpdateFailed {
        stage: UpdateStage::Pulling,
        source: Box::new(OtaError::network("pull", "could not resolve host")),
    };
    assert_eq!(err.kind(), ErrorKind::Network);
    let failure = err.failure();
    assert_eq!(failure.stage, Some(UpdateStage::Pulling));
    assert!(failure.message.contains("while pulling"));
}

#[test]
fn in_progress_error_names_holder_when_known() {
    let err = OtaError::AlreadyInProgress {
        lock: "/var/lib/kiosk-ota/update.lock".into(),
        holder: Some("pid=42 op=update".to_string()),
    };
    assert_eq!(
        err.to_string(),
        "update-in-progress: lock /var/lib/kiosk-ota/update.lock is held by pid=42 op=update"
    );
}

#[test]
fn failed_check_never_reports_update_available() {
    let err = OtaError::network("fetch", "unreachable");
    let result = UpdateCheckResult::failed("main", &err);
    assert!(!result.update_available);
    assert!(result.is_error());
    let value = serde_json::to_value(&result).expect("must serialize");
    assert_eq!(value["error"]["kind"], "network");
}

#[test]
fn abbreviate_commit_keeps_eight_characters() {
    assert_eq!(
        abbreviate_commit("0123456789abcdef0123456789abcdef01234567\n"),
        "01234567"
    );
    assert_eq!(abbreviate_commit("abc"), "abc");
}

#[test]
fn status_report_flattens_policy_fields() {
    let report = StatusReport {
        policy: UpdatePolicy::default(),
        repository: Some(RepositoryState {
            current_branch: "main".to_string(),
            current_commit: "01234567".to_string(),
            has_uncommitted_changes: false,
        }),
        repository_error: None,
    };
    let value = serde_json::to_value(&report).expect("must serialize");
    assert_eq!(value["branch"], "main");
    assert_eq!(value["repository"]["current_commit"], "01234567");
    assert!(value.get("repository_error").is_none());
}
