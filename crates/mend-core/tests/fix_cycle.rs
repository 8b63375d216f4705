//! End-to-end fix cycle runs over throwaway projects.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use pretty_assertions::assert_eq;
use serde_json::Value;

use mend_core::{
    FixCycle, FixCycleOptions, FIX_REPORT_FILE, MSG_ALL_REJECTED, MSG_EMPTY_PLAN,
    MSG_NONE_APPROVED, MSG_NONE_EXECUTABLE, MSG_NO_PLAN,
};
use mend_gate::{
    PendingStore, SessionMemory, TeamDecision, DEFAULT_PENDING_TTL_SECS, GateError,
};
use mend_memory::{EventKind, EventStore, GLOBAL_MEMORY_DISABLE_ENV};
use mend_plan::{CycleState, FixedClock, PipelineStage};
use mend_test_utils::{project_with_unused_import, remove_import_op, TestProject, PY_UNUSED_IMPORT};
use mend_verify::{HealthProbe, VerifyError};

const CLOCK: FixedClock = FixedClock(0);
const RUN_ID: &str = "19700101_000000";

fn disable_global_memory() {
    std::env::set_var(GLOBAL_MEMORY_DISABLE_ENV, "1");
}

fn verified(cmd: &str) -> FixCycleOptions {
    FixCycleOptions {
        verify_cmd: Some(cmd.to_string()),
        ..FixCycleOptions::default()
    }
}

fn read_report_file(root: &Path) -> Value {
    let raw = std::fs::read_to_string(root.join(FIX_REPORT_FILE)).unwrap();
    serde_json::from_str(&raw).unwrap()
}

/// Probe returning a fixed sequence of scores, one per call.
struct SequenceProbe {
    scores: Vec<f64>,
    calls: AtomicUsize,
}

impl SequenceProbe {
    fn new(scores: Vec<f64>) -> Self {
        SequenceProbe {
            scores,
            calls: AtomicUsize::new(0),
        }
    }
}

impl HealthProbe for SequenceProbe {
    fn score(&self, _root: &Path) -> Result<f64, VerifyError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.scores[call.min(self.scores.len() - 1)])
    }
}

#[tokio::test]
async fn no_plan_is_a_clean_noop() {
    let project = TestProject::new();
    let cycle = FixCycle::new(FixCycleOptions::default()).with_clock(&CLOCK);

    let result = cycle.no_plan(project.root());

    assert_eq!(result.return_code, 0);
    assert_eq!(result.verify_success, Some(true));
    assert_eq!(result.report.message.as_deref(), Some(MSG_NO_PLAN));
    let trace = result.report.pipeline.as_ref().unwrap();
    assert_eq!(trace.stages_executed, vec![PipelineStage::Input]);
    assert!(trace.valid);
    assert!(result.report.cycle_id.is_some());

    let written = read_report_file(project.root());
    assert_eq!(written["message"], MSG_NO_PLAN);
    assert_eq!(written["return_code"], 0);
    assert_eq!(written["telemetry"]["operations_total"], 0);
    assert_eq!(written["cycle_state_history"], serde_json::json!(["thinking", "done"]));
}

#[tokio::test]
async fn empty_plan_completes_without_work() {
    let project = TestProject::new();
    let cycle = FixCycle::new(FixCycleOptions::default()).with_clock(&CLOCK);

    let result = cycle.run(project.root(), Vec::new()).await;

    assert_eq!(result.return_code, 0);
    assert_eq!(result.verify_success, Some(true));
    assert!(result.operations.is_empty());
    assert_eq!(result.report.message.as_deref(), Some(MSG_EMPTY_PLAN));
    let trace = result.report.pipeline.as_ref().unwrap();
    assert_eq!(
        trace.stages_executed,
        vec![PipelineStage::Input, PipelineStage::Plan]
    );
    let telemetry = result.report.telemetry.as_ref().unwrap();
    assert_eq!(telemetry.operations_total, 0);
    assert!(project.file_exists(FIX_REPORT_FILE));
}

#[tokio::test]
async fn bad_selection_flag_is_a_reported_error() {
    let project = project_with_unused_import("m.py");
    let options = FixCycleOptions {
        approve_ops: Some("7".to_string()),
        ..FixCycleOptions::default()
    };
    let cycle = FixCycle::new(options).with_clock(&CLOCK);

    let result = cycle.run(project.root(), vec![remove_import_op("m.py")]).await;

    assert_eq!(result.return_code, 1);
    assert_eq!(result.verify_success, None);
    assert!(result.operations.is_empty());
    let error = result.report.error.as_deref().unwrap();
    assert_eq!(error, "Invalid --approve index 7: expected range 1..1");
    let trace = result.report.pipeline.as_ref().unwrap();
    assert_eq!(
        trace.stages_executed,
        vec![PipelineStage::Input, PipelineStage::Plan, PipelineStage::Validate]
    );
    assert_eq!(
        result.report.cycle_state_history,
        Some(vec![CycleState::Thinking, CycleState::Error])
    );
    // The failed cycle still leaves an inspectable report behind.
    assert_eq!(read_report_file(project.root())["return_code"], 1);
    assert_eq!(project.read_file("m.py"), PY_UNUSED_IMPORT);
}

#[tokio::test]
async fn rejecting_everything_still_succeeds() {
    let project = project_with_unused_import("m.py");
    let op = remove_import_op("m.py");
    let options = FixCycleOptions {
        reject_ops: Some("1".to_string()),
        session_id: Some("review-1".to_string()),
        ..FixCycleOptions::default()
    };
    let cycle = FixCycle::new(options).with_clock(&CLOCK);

    let result = cycle.run(project.root(), vec![op.clone()]).await;

    assert_eq!(result.return_code, 0);
    assert_eq!(result.verify_success, Some(true));
    assert!(result.operations.is_empty());
    assert_eq!(result.report.message.as_deref(), Some(MSG_ALL_REJECTED));
    assert_eq!(
        result.report.skipped.get("m.py").map(String::as_str),
        Some("approval_state=rejected")
    );
    let summary = result.report.decision_summary.unwrap();
    assert_eq!(summary.blocked_by_human, 1);
    assert_eq!(summary.blocked_by_policy, 0);

    // The rejection is remembered for the session and the campaign.
    let memory = SessionMemory::new(project.root());
    assert!(memory.rejected_keys("review-1").contains(&op.key()));
    assert_eq!(project.read_file("m.py"), PY_UNUSED_IMPORT);
}

#[tokio::test]
async fn dry_run_previews_without_writing() {
    let project = project_with_unused_import("m.py");
    let options = FixCycleOptions {
        dry_run: true,
        ..FixCycleOptions::default()
    };
    let cycle = FixCycle::new(options).with_clock(&CLOCK);

    let result = cycle.run(project.root(), vec![remove_import_op("m.py")]).await;

    assert_eq!(result.return_code, 0);
    assert!(result.dry_run);
    assert_eq!(result.verify_success, None);
    assert_eq!(result.modified, vec![std::path::PathBuf::from("m.py")]);
    assert_eq!(project.read_file("m.py"), PY_UNUSED_IMPORT);
    assert!(!project.file_exists(".mend_backups"));

    let telemetry = result.report.telemetry.as_ref().unwrap();
    assert_eq!(telemetry.operations_total, 1);
    assert_eq!(telemetry.modified_count, 1);
    let written = read_report_file(project.root());
    assert_eq!(written["dry_run"], true);
}

#[tokio::test]
async fn apply_fixes_file_and_verifies() {
    disable_global_memory();
    let project = project_with_unused_import("m.py");
    let op = remove_import_op("m.py");
    let cycle = FixCycle::new(verified("echo ok")).with_clock(&CLOCK);

    let result = cycle.run(project.root(), vec![op.clone()]).await;

    assert_eq!(result.return_code, 0);
    assert_eq!(result.verify_success, Some(true));
    assert_eq!(project.read_file("m.py"), "x = 1\n");
    let backup = format!(".mend_backups/{RUN_ID}/m.py");
    assert_eq!(project.read_file(&backup), PY_UNUSED_IMPORT);

    let report = &result.report;
    assert_eq!(report.run_id.as_deref(), Some(RUN_ID));
    let verify = report.verify.as_ref().unwrap();
    assert!(verify.success);
    assert_eq!(verify.command, "echo ok");
    assert!(report.rollback.is_none());
    let trace = report.pipeline.as_ref().unwrap();
    assert_eq!(trace.stages_executed, PipelineStage::ALL.to_vec());

    let telemetry = report.telemetry.as_ref().unwrap();
    assert_eq!(telemetry.operations_total, 1);
    assert_eq!(telemetry.modified_count, 1);
    assert_eq!(telemetry.apply_rate, 1.0);
    assert_eq!(telemetry.rollback_rate, 0.0);
    assert!(telemetry.verify_duration_ms.is_some());

    let gates = report.safety_gates.unwrap();
    assert!(gates.backup && gates.verify && gates.auto_rollback);
    assert!(!gates.health_gate);

    let events = EventStore::new(project.root()).by_kind(EventKind::Patch);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].input["operations_count"], 1);
    assert_eq!(events[0].result, Some(serde_json::json!(true)));

    let memory = SessionMemory::new(project.root());
    assert_eq!(memory.verify_success_counts().get(&op.key()), Some(&1));
    assert!(project.file_exists(FIX_REPORT_FILE));
}

#[tokio::test]
async fn failed_verify_rolls_back() {
    disable_global_memory();
    let project = project_with_unused_import("m.py");
    let op = remove_import_op("m.py");
    let cycle = FixCycle::new(verified("exit 1")).with_clock(&CLOCK);

    let result = cycle.run(project.root(), vec![op.clone()]).await;

    assert_eq!(result.return_code, 1);
    assert_eq!(result.verify_success, Some(false));
    // The change was written, verify failed, the backup came back.
    assert_eq!(project.read_file("m.py"), PY_UNUSED_IMPORT);

    let rollback = result.report.rollback.as_ref().unwrap();
    assert!(rollback.done);
    assert_eq!(rollback.reason.as_deref(), Some("verify_failed"));
    assert_eq!(rollback.restored, vec![std::path::PathBuf::from("m.py")]);
    assert!(rollback.errors.is_empty());

    let telemetry = result.report.telemetry.as_ref().unwrap();
    assert_eq!(telemetry.rollback_rate, 1.0);

    let memory = SessionMemory::new(project.root());
    assert_eq!(memory.verify_fail_counts().get(&op.key()), Some(&1));
}

#[tokio::test]
async fn team_mode_stages_instead_of_applying() {
    let project = project_with_unused_import("m.py");
    let options = FixCycleOptions {
        team_mode: true,
        ..FixCycleOptions::default()
    };
    let cycle = FixCycle::new(options).with_clock(&CLOCK);

    let result = cycle.run(project.root(), vec![remove_import_op("m.py")]).await;

    assert_eq!(result.return_code, 0);
    assert!(result.dry_run);
    assert_eq!(result.verify_success, None);
    assert_eq!(result.operations.len(), 1);
    assert!(result
        .report
        .message
        .as_deref()
        .unwrap()
        .starts_with("Plan saved to "));

    let store = PendingStore::new(project.root());
    let pending = store.load().unwrap();
    assert_eq!(pending.operations.len(), 1);
    assert_eq!(pending.operations[0].team_decision, TeamDecision::Pending);
    // Staging writes no fix report and touches no sources.
    assert!(!project.file_exists(FIX_REPORT_FILE));
    assert_eq!(project.read_file("m.py"), PY_UNUSED_IMPORT);
}

#[tokio::test]
async fn apply_approved_without_pending_plan_fails() {
    let project = TestProject::new();
    let options = FixCycleOptions {
        apply_approved: true,
        ..FixCycleOptions::default()
    };
    let cycle = FixCycle::new(options).with_clock(&CLOCK);

    let result = cycle.run(project.root(), Vec::new()).await;

    assert_eq!(result.return_code, 1);
    assert_eq!(result.verify_success, None);
    assert_eq!(
        result.report.error.as_deref(),
        Some(GateError::NoPendingPlan.to_string().as_str())
    );
    assert!(!project.file_exists(FIX_REPORT_FILE));
}

#[tokio::test]
async fn apply_approved_with_nothing_approved_is_complete() {
    let project = project_with_unused_import("m.py");
    let store = PendingStore::new(project.root());
    store.save(&[remove_import_op("m.py")], None, &CLOCK).unwrap();

    let options = FixCycleOptions {
        apply_approved: true,
        ..FixCycleOptions::default()
    };
    let cycle = FixCycle::new(options).with_clock(&CLOCK);
    let result = cycle.run(project.root(), Vec::new()).await;

    assert_eq!(result.return_code, 0);
    assert_eq!(result.verify_success, Some(true));
    assert_eq!(result.report.message.as_deref(), Some(MSG_NONE_APPROVED));
    assert!(!project.file_exists(FIX_REPORT_FILE));
    assert_eq!(project.read_file("m.py"), PY_UNUSED_IMPORT);
}

#[tokio::test]
async fn apply_approved_runs_the_approved_subset() {
    disable_global_memory();
    let project = project_with_unused_import("m.py");
    let store = PendingStore::new(project.root());
    store.save(&[remove_import_op("m.py")], None, &CLOCK).unwrap();
    store
        .update_decisions(&BTreeSet::from([1]), &BTreeSet::new())
        .unwrap();

    let options = FixCycleOptions {
        apply_approved: true,
        verify_cmd: Some("echo ok".to_string()),
        ..FixCycleOptions::default()
    };
    let cycle = FixCycle::new(options).with_clock(&CLOCK);
    let result = cycle.run(project.root(), Vec::new()).await;

    assert_eq!(result.return_code, 0);
    assert_eq!(result.verify_success, Some(true));
    assert_eq!(project.read_file("m.py"), "x = 1\n");
    let trace = result.report.pipeline.as_ref().unwrap();
    assert_eq!(
        trace.stages_executed,
        vec![PipelineStage::Validate, PipelineStage::Apply, PipelineStage::Verify]
    );
    assert!(trace.valid);

    // A verified apply keeps the staged plan and its approvals intact.
    let pending = store.load().unwrap();
    assert_eq!(pending.operations[0].team_decision, TeamDecision::Approve);
    assert!(project.file_exists(FIX_REPORT_FILE));
}

#[tokio::test]
async fn apply_approved_policy_denies_test_files() {
    let project = TestProject::new();
    project.write_file("test_app.py", PY_UNUSED_IMPORT);
    let store = PendingStore::new(project.root());
    store
        .save(&[remove_import_op("test_app.py")], None, &CLOCK)
        .unwrap();
    store
        .update_decisions(&BTreeSet::from([1]), &BTreeSet::new())
        .unwrap();

    let options = FixCycleOptions {
        apply_approved: true,
        ..FixCycleOptions::default()
    };
    let cycle = FixCycle::new(options).with_clock(&CLOCK);
    let result = cycle.run(project.root(), Vec::new()).await;

    assert_eq!(result.return_code, 0);
    assert_eq!(result.verify_success, Some(true));
    assert_eq!(result.report.message.as_deref(), Some(MSG_NONE_EXECUTABLE));
    assert_eq!(
        result.report.skipped.get("test_app.py").map(String::as_str),
        Some("critic_verdict=deny")
    );
    assert_eq!(result.report.decision_summary.unwrap().blocked_by_critic, 1);
    let trace = result.report.pipeline.as_ref().unwrap();
    assert_eq!(trace.stages_executed, vec![PipelineStage::Validate]);
    assert_eq!(project.read_file("test_app.py"), PY_UNUSED_IMPORT);
}

#[tokio::test]
async fn health_regression_fails_verify_and_rolls_back() {
    disable_global_memory();
    let project = project_with_unused_import("m.py");
    let probe = SequenceProbe::new(vec![50.0, 40.0]);
    let cycle = FixCycle::new(verified("echo ok"))
        .with_clock(&CLOCK)
        .with_probe(&probe);

    let result = cycle.run(project.root(), vec![remove_import_op("m.py")]).await;

    assert_eq!(result.return_code, 1);
    assert_eq!(result.verify_success, Some(false));
    let verify = result.report.verify.as_ref().unwrap();
    assert_eq!(verify.reason.as_deref(), Some("metrics_worsened"));
    // The test command itself passed; the probe failed the run.
    assert_eq!(verify.return_code, 0);

    let health = result.report.health.as_ref().unwrap();
    assert_eq!(health.before_score, 50.0);
    assert_eq!(health.after_score, 40.0);
    assert!(!health.success);

    let rollback = result.report.rollback.as_ref().unwrap();
    assert!(rollback.done);
    assert_eq!(rollback.reason.as_deref(), Some("metrics_worsened"));
    assert_eq!(project.read_file("m.py"), PY_UNUSED_IMPORT);
    assert!(result.report.safety_gates.unwrap().health_gate);
}

#[tokio::test]
async fn campaign_memory_skips_repeated_failures() {
    disable_global_memory();
    let project = project_with_unused_import("m.py");
    let op = remove_import_op("m.py");
    let memory = SessionMemory::new(project.root());
    memory.record_verify_failure(&[op.clone()]).unwrap();
    memory.record_verify_failure(&[op.clone()]).unwrap();

    let cycle = FixCycle::new(verified("echo ok")).with_clock(&CLOCK);
    let result = cycle.run(project.root(), vec![op.clone()]).await;

    assert_eq!(result.return_code, 0);
    assert_eq!(result.report.message.as_deref(), Some(MSG_EMPTY_PLAN));
    assert_eq!(project.read_file("m.py"), PY_UNUSED_IMPORT);
    let telemetry = result.report.telemetry.as_ref().unwrap();
    assert_eq!(telemetry.operations_total, 1);
    assert_eq!(telemetry.skipped_count, 1);

    // The per-run escape hatch lets the operation through again.
    let options = FixCycleOptions {
        ignore_campaign: true,
        ..verified("echo ok")
    };
    let retry = FixCycle::new(options).with_clock(&CLOCK);
    let result = retry.run(project.root(), vec![op]).await;
    assert_eq!(result.return_code, 0);
    assert_eq!(project.read_file("m.py"), "x = 1\n");
}

#[tokio::test]
async fn rollback_resets_pending_approvals() {
    disable_global_memory();
    let project = project_with_unused_import("m.py");
    let store = PendingStore::new(project.root());
    store.save(&[remove_import_op("m.py")], None, &CLOCK).unwrap();
    store
        .update_decisions(&BTreeSet::from([1]), &BTreeSet::new())
        .unwrap();

    let options = FixCycleOptions {
        apply_approved: true,
        verify_cmd: Some("exit 1".to_string()),
        ..FixCycleOptions::default()
    };
    let cycle = FixCycle::new(options).with_clock(&CLOCK);
    let result = cycle.run(project.root(), Vec::new()).await;

    assert_eq!(result.return_code, 1);
    assert_eq!(result.verify_success, Some(false));
    assert_eq!(project.read_file("m.py"), PY_UNUSED_IMPORT);
    // The rolled-back plan cannot be replayed without a fresh approval.
    let pending = store.load().unwrap();
    assert_eq!(pending.operations[0].team_decision, TeamDecision::Pending);
}

#[tokio::test]
async fn expired_pending_plan_is_rejected() {
    let project = project_with_unused_import("m.py");
    let store = PendingStore::new(project.root());
    store.save(&[remove_import_op("m.py")], None, &FixedClock(1_000)).unwrap();
    store
        .update_decisions(&BTreeSet::from([1]), &BTreeSet::new())
        .unwrap();

    let late = FixedClock(1_000 + DEFAULT_PENDING_TTL_SECS + 1);
    let options = FixCycleOptions {
        apply_approved: true,
        ..FixCycleOptions::default()
    };
    let cycle = FixCycle::new(options).with_clock(&late);
    let result = cycle.run(project.root(), Vec::new()).await;

    assert_eq!(result.return_code, 1);
    assert_eq!(
        result.report.error.as_deref(),
        Some(GateError::PendingExpired.to_string().as_str())
    );
    assert_eq!(project.read_file("m.py"), PY_UNUSED_IMPORT);
}
