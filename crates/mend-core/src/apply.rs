//! The apply stage: execute, verify, gate, remember.
//!
//! Everything downstream of the decision gate lives here, in strict order:
//! patch execution with backups on, verification with the import-repair
//! retry and the compile-only fallback, the health gate, auto-rollback,
//! then memory updates and report enrichment. The stage never fails as a
//! function; every problem lands inside the report it returns.

use std::collections::BTreeSet;
use std::path::Path;

use indexmap::IndexMap;
use serde_json::json;
use tracing::{info, warn};

use mend_gate::SessionMemory;
use mend_memory::{
    append_learn_to_global, EventKind, EventStore, GlobalLearnRecord, LearnedOperation,
    LearningOutcome, LearningSample, LearningStore,
};
use mend_patch::{BackupStore, ExecutorOptions, PatchExecutor};
use mend_plan::{
    ApplyReport, Clock, DecisionSummary, Operation, PatchPlan, RollbackOutcome, VerifyOutcome,
};
use mend_verify::{
    classify_failure, compile_check, gate_health, needs_compile_fallback, plan_import_repairs,
    run_verify, HealthProbe, VerifyConfig, COMPILE_TIMEOUT_CAP_SECS,
};

use crate::telemetry::{attach_safety_gates, attach_telemetry, TelemetryInputs};

/// Rollback reason when verification failed without a more specific one.
const VERIFY_FAILED: &str = "verify_failed";

/// Everything the apply stage needs besides the operations themselves.
pub(crate) struct StageInputs<'a> {
    /// Skip reasons from the decision gate, merged into the report
    pub gate_skips: IndexMap<String, String>,
    /// Blocked-per-layer counts from the decision gate
    pub decision_summary: DecisionSummary,
    /// Counters from planning and filtering
    pub telemetry: TelemetryInputs,
    /// Verification command override
    pub verify_cmd: Option<&'a str>,
    /// Verification timeout override, seconds
    pub verify_timeout: Option<u64>,
}

/// Run the full apply stage over the executable operations.
pub(crate) async fn execute_apply_stage(
    root: &Path,
    executable: Vec<Operation>,
    inputs: StageInputs<'_>,
    clock: &dyn Clock,
    probe: Option<&dyn HealthProbe>,
) -> ApplyReport {
    let config = VerifyConfig::resolve(root, inputs.verify_cmd, inputs.verify_timeout);

    let before_score = probe.and_then(|p| match p.score(root) {
        Ok(score) => Some(score),
        Err(err) => {
            warn!(error = %err, "health probe failed before apply; gate disabled");
            None
        }
    });

    let executor = PatchExecutor::new();
    let plan = PatchPlan::batch(root, executable.clone());
    let mut report = executor.apply_with_clock(
        &plan,
        ExecutorOptions {
            dry_run: false,
            backup: true,
        },
        clock,
    );
    for (target, reason) in inputs.gate_skips {
        report.skipped.insert(target, reason);
    }
    report.decision_summary = Some(inputs.decision_summary);

    match run_verify(root, config.command(), config.timeout_secs()).await {
        Ok(outcome) => {
            let outcome = retry_import_failure(root, &executor, &mut report, outcome, &config, clock).await;
            let outcome = fallback_to_compile(root, &report, outcome, &config).await;
            let outcome = apply_health_gate(root, &mut report, outcome, probe, before_score);
            report.verify = Some(outcome);
        }
        Err(err) => {
            report.record_error("verify", err.to_string());
        }
    }
    maybe_rollback(root, &mut report);

    let verify_success = report.verify.as_ref().map(|v| v.success);
    record_memory(root, &executable, &report, verify_success, clock);

    let events = EventStore::new(root);
    attach_telemetry(&mut report, inputs.telemetry, &events);
    attach_safety_gates(&mut report, true);
    append_patch_event(&events, &executable, &report, verify_success, clock);

    report
}

/// One fix-import round: derive repairs from the failure output, apply them
/// without a fresh backup, re-verify once.
async fn retry_import_failure(
    root: &Path,
    executor: &PatchExecutor,
    report: &mut ApplyReport,
    outcome: VerifyOutcome,
    config: &VerifyConfig,
    clock: &dyn Clock,
) -> VerifyOutcome {
    if outcome.success || outcome.timed_out || report.run_id.is_none() {
        return outcome;
    }
    let combined = format!("{}\n{}", outcome.stdout, outcome.stderr);
    if classify_failure(&combined).is_none() {
        return outcome;
    }
    let repairs = plan_import_repairs(root, &combined);
    if repairs.is_empty() {
        return outcome;
    }
    info!(repairs = repairs.len(), "import failure detected; applying fix-import retry");
    let retry_plan = PatchPlan::batch(root, repairs);
    let retry_report = executor.apply_with_clock(
        &retry_plan,
        ExecutorOptions {
            dry_run: false,
            backup: false,
        },
        clock,
    );
    report.merge_modified(retry_report.modified);
    match run_verify(root, config.command(), config.timeout_secs()).await {
        Ok(mut second) => {
            second.fix_import_retry = true;
            second
        }
        Err(err) => {
            report.record_error("verify", err.to_string());
            outcome
        }
    }
}

/// Swap a "no tests collected" run for a compile-only check, keeping the
/// original result when the compile check cannot do better.
async fn fallback_to_compile(
    root: &Path,
    report: &ApplyReport,
    outcome: VerifyOutcome,
    config: &VerifyConfig,
) -> VerifyOutcome {
    if !needs_compile_fallback(&outcome, config.forced(), report.modified.len()) {
        return outcome;
    }
    let cap = config.timeout_secs().min(COMPILE_TIMEOUT_CAP_SECS);
    match compile_check(root, &report.modified, cap).await {
        Ok(compiled) if compiled.success => {
            info!("no tests collected; accepting compile-only check");
            compiled
        }
        Ok(_) => {
            info!("no tests collected and compile check failed; keeping the test result");
            outcome
        }
        Err(err) => {
            warn!(error = %err, "compile fallback failed to start");
            outcome
        }
    }
}

/// Flip a passing verify to `metrics_worsened` when the probe regressed.
fn apply_health_gate(
    root: &Path,
    report: &mut ApplyReport,
    outcome: VerifyOutcome,
    probe: Option<&dyn HealthProbe>,
    before_score: Option<f64>,
) -> VerifyOutcome {
    let (Some(probe), Some(before)) = (probe, before_score) else {
        return outcome;
    };
    match probe.score(root) {
        Ok(after) => {
            let (gated, delta) = gate_health(outcome, before, after);
            report.health = Some(delta);
            gated
        }
        Err(err) => {
            warn!(error = %err, "health probe failed after apply; gate disabled");
            outcome
        }
    }
}

/// Restore this run's backups when verification (or the health gate) failed.
fn maybe_rollback(root: &Path, report: &mut ApplyReport) {
    let verify_failed = report.verify.as_ref().map_or(false, |v| !v.success);
    if !verify_failed {
        return;
    }
    let Some(run_id) = report.run_id.clone() else {
        return;
    };
    let reason = report
        .verify
        .as_ref()
        .and_then(|v| v.reason.clone())
        .unwrap_or_else(|| VERIFY_FAILED.to_string());
    info!(run_id = %run_id, %reason, "verification failed; rolling back");
    match BackupStore::new(root).restore(Some(&run_id)) {
        Ok(restored) => {
            report.rollback = Some(RollbackOutcome {
                done: true,
                restored: restored.restored,
                errors: restored.errors,
                reason: Some(reason),
            });
        }
        Err(err) => {
            report.record_error("rollback", err.to_string());
            report.rollback = Some(RollbackOutcome::not_possible(err.to_string()));
        }
    }
}

/// Record campaign verify history, per-key learning counters and the
/// cross-project learn feed. All best-effort.
fn record_memory(
    root: &Path,
    executable: &[Operation],
    report: &ApplyReport,
    verify_success: Option<bool>,
    clock: &dyn Clock,
) {
    if executable.is_empty() {
        return;
    }
    let memory = SessionMemory::new(root);
    let recorded = match verify_success {
        Some(true) => memory.record_verify_success(executable),
        Some(false) => memory.record_verify_failure(executable),
        None => Ok(()),
    };
    if let Err(err) = recorded {
        warn!(error = %err, "failed to record campaign verify outcome");
    }

    let modified: BTreeSet<String> = report
        .modified
        .iter()
        .map(|p| p.display().to_string())
        .collect();
    let samples: Vec<LearningSample> = executable
        .iter()
        .map(|op| {
            let target = op.target_file().display().to_string();
            let applied = modified.contains(&target) && !report.skipped.contains_key(&target);
            let outcome = if applied {
                match verify_success {
                    Some(true) => LearningOutcome::VerifySuccess,
                    Some(false) => LearningOutcome::VerifyFail,
                    None => LearningOutcome::VerifyUnknown,
                }
            } else {
                LearningOutcome::NotApplied
            };
            LearningSample::for_operation(op, outcome)
        })
        .collect();
    if let Err(err) = LearningStore::new(root).record_all(&samples) {
        warn!(error = %err, "failed to record learning samples");
    }

    append_learn_to_global(
        &GlobalLearnRecord {
            project_root: root.display().to_string(),
            modules: report
                .modified
                .iter()
                .map(|p| p.display().to_string())
                .collect(),
            operations: executable.iter().map(LearnedOperation::from_operation).collect(),
            risks: Vec::new(),
            verify_success,
        },
        clock,
    );
}

fn append_patch_event(
    events: &EventStore,
    executable: &[Operation],
    report: &ApplyReport,
    verify_success: Option<bool>,
    clock: &dyn Clock,
) {
    let input = json!({ "operations_count": executable.len() });
    let output = json!({
        "modified": report.modified,
        "skipped": report.skipped.keys().collect::<Vec<_>>(),
        "run_id": report.run_id,
        "verify_success": verify_success,
        "verify_duration_ms": report.verify.as_ref().map(|v| v.duration_ms),
    });
    if let Err(err) = events.append(
        EventKind::Patch,
        input,
        output,
        verify_success.map(|ok| json!(ok)),
        clock,
    ) {
        warn!(error = %err, "failed to append patch event");
    }
}
