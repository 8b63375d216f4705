//! Fix cycle orchestration.
//!
//! Drives one staged plan through policy, memory filters, the decision gate
//! and the apply stage. Every exit, short-circuit or not, produces an
//! [`ApplyReport`] with a valid truncated pipeline trace, a cycle state
//! history and an exit code; most exits also persist the report at the
//! project root.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};
use uuid::Uuid;

use mend_gate::{
    decide, deprioritize_weak_pairs, evaluate_plan, select_by_indexes, AgentMode, ApprovalState,
    CriticVerdict, Decision, DecisionOutcome, DecisionSource, GateError, PendingStore,
    PolicyConfig, PolicyDecision, PolicyHistory, PolicyRecord, SessionMemory,
};
use mend_memory::EventStore;
use mend_patch::{ExecutorOptions, PatchExecutor};
use mend_plan::{
    attach_cycle_state, ApplyReport, Clock, Operation, PatchPlan, PipelineStage, PipelineTrace,
    SystemClock,
};
use mend_verify::HealthProbe;

use crate::apply::{execute_apply_stage, StageInputs};
use crate::telemetry::{attach_telemetry, TelemetryInputs};

/// Report artifact written at the project root after a cycle.
pub const FIX_REPORT_FILE: &str = "mend_fix_report.json";

/// Environment switch that bypasses campaign skip lists when truthy.
pub const IGNORE_CAMPAIGN_ENV: &str = "MEND_IGNORE_CAMPAIGN";

/// Operator message when no plan file is staged.
pub const MSG_NO_PLAN: &str = "No patch plan found. Cycle complete (nothing to apply).";

/// Operator message when the staged plan has no operations left.
pub const MSG_EMPTY_PLAN: &str = "Patch plan has no operations. Cycle complete.";

/// Operator message when every operation was rejected.
pub const MSG_ALL_REJECTED: &str = "All operations rejected by user/policy. Cycle complete.";

/// Operator message when a pending plan exists but nothing is approved.
pub const MSG_NONE_APPROVED: &str =
    "No operations approved. Edit .mend/pending_plan.json and set team_decision='approve'.";

/// Operator message when approved operations all failed the decision gate.
pub const MSG_NONE_EXECUTABLE: &str = "No executable approved operations after decision gate.";

/// Knobs for one cycle, mirroring the `mend fix` flags.
#[derive(Debug, Clone, Default)]
pub struct FixCycleOptions {
    /// How much the engine may do unattended
    pub mode: AgentMode,
    /// Session id for approval memory; `None` disables session filtering
    pub session_id: Option<String>,
    /// Evaluate without writing
    pub dry_run: bool,
    /// Stage the plan for team review instead of applying
    pub team_mode: bool,
    /// Apply operations approved in the pending plan
    pub apply_approved: bool,
    /// 1-based CSV of operation indexes to approve
    pub approve_ops: Option<String>,
    /// 1-based CSV of operation indexes to reject
    pub reject_ops: Option<String>,
    /// Confirmation token for the pending plan
    pub approval_token: Option<String>,
    /// Verification command override
    pub verify_cmd: Option<String>,
    /// Verification timeout override, seconds
    pub verify_timeout: Option<u64>,
    /// Bypass campaign skip lists for this run
    pub ignore_campaign: bool,
}

/// What one cycle produced, report included.
#[derive(Debug)]
pub struct CycleResult {
    /// Exit code the caller should use
    pub return_code: i32,
    /// The full report, sealed with trace, state history and cycle id
    pub report: ApplyReport,
    /// Operations that reached execution (empty on short-circuits)
    pub operations: Vec<Operation>,
    /// Paths modified, mirroring the report
    pub modified: Vec<PathBuf>,
    /// How verification ended; `Some(true)` also covers clean no-ops
    pub verify_success: Option<bool>,
    /// Whether this cycle wrote nothing
    pub dry_run: bool,
    /// Per-operation policy verdicts from planning
    pub policy_records: Vec<PolicyRecord>,
}

/// Counters produced while narrowing the plan before the decision gate.
#[derive(Debug, Clone, Copy, Default)]
struct FilterCounters {
    policy_dropped: usize,
    campaign_skipped: usize,
    session_skipped: usize,
}

/// One plan-to-report driver.
///
/// Clock and health probe are injectable the way the patch executor takes
/// its clock; defaults are the system clock and no probe.
pub struct FixCycle<'a> {
    options: FixCycleOptions,
    clock: &'a dyn Clock,
    probe: Option<&'a dyn HealthProbe>,
}

impl<'a> FixCycle<'a> {
    /// Cycle with the given options, system clock, no health probe.
    #[must_use]
    pub fn new(options: FixCycleOptions) -> Self {
        FixCycle {
            options,
            clock: &SystemClock,
            probe: None,
        }
    }

    /// Use an explicit clock (tests pin run ids and timestamps with this).
    #[must_use]
    pub fn with_clock(mut self, clock: &'a dyn Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Gate the run on a health probe.
    #[must_use]
    pub fn with_probe(mut self, probe: &'a dyn HealthProbe) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Run one cycle over the staged operations.
    ///
    /// With `apply_approved` set the operations argument is ignored; the
    /// pending plan is the only input that path trusts.
    pub async fn run(&self, root: &Path, operations: Vec<Operation>) -> CycleResult {
        if self.options.apply_approved {
            return self.run_apply_approved(root).await;
        }
        self.run_plan(root, operations).await
    }

    /// Result for "no plan file staged": a clean no-op.
    #[must_use]
    pub fn no_plan(&self, root: &Path) -> CycleResult {
        let mut report = ApplyReport::new(self.options.dry_run);
        report.message = Some(MSG_NO_PLAN.to_string());
        attach_telemetry(&mut report, TelemetryInputs::default(), &EventStore::new(root));
        let report = self.seal(root, report, &[PipelineStage::Input], true);
        self.result(report, Vec::new(), Some(true), Vec::new())
    }

    async fn run_plan(&self, root: &Path, operations: Vec<Operation>) -> CycleResult {
        let planned = deprioritize_weak_pairs(operations);

        let config = PolicyConfig::from_env(self.options.mode);
        let history = PolicyHistory::load(root);
        let review = evaluate_plan(&planned, &config, &history);
        let records = review.records;
        let mut counters = FilterCounters {
            policy_dropped: planned.len() - review.kept.len(),
            ..FilterCounters::default()
        };

        let memory = SessionMemory::new(root);
        let mut kept = review.kept;
        if !self.ignore_campaign() {
            let keys = memory.campaign_keys_to_skip();
            let (remaining, skipped) = partition_by_keys(kept, &keys);
            kept = remaining;
            counters.campaign_skipped = skipped.len();
            if counters.campaign_skipped > 0 {
                info!(
                    skipped = counters.campaign_skipped,
                    "campaign memory dropped operations"
                );
            }
        }
        if let Some(session_id) = self.options.session_id.as_deref() {
            let keys = memory.rejected_keys(session_id);
            let (remaining, skipped) = partition_by_keys(kept, &keys);
            kept = remaining;
            counters.session_skipped = skipped.len();
        }

        if kept.is_empty() {
            return self.finish_empty(root, records, counters);
        }
        if self.options.team_mode {
            return self.stage_pending(root, kept, records);
        }

        let decisions = match select_by_indexes(
            kept.len(),
            self.options.approve_ops.as_deref(),
            self.options.reject_ops.as_deref(),
        ) {
            Ok(decisions) => decisions,
            Err(err) => return self.finish_selection_error(root, &err, records),
        };
        self.record_session_selection(&memory, &kept, &decisions);

        let planned_total = kept.len();
        let outcome = decide(&kept, &decisions, false);
        let mut summary = outcome.summary();
        summary.blocked_by_policy += counters.policy_dropped;

        if outcome.executable.is_empty() {
            return self.finish_all_rejected(root, &outcome, records, planned_total, counters);
        }
        if self.options.dry_run {
            return self.finish_dry_run(root, outcome, records, planned_total, counters);
        }

        let gate_skips = outcome.skipped_reasons();
        let executable = outcome.executable;
        let stage = StageInputs {
            gate_skips,
            decision_summary: summary,
            telemetry: TelemetryInputs {
                operations_total: executable.len(),
                campaign_skipped: counters.campaign_skipped,
                session_skipped: counters.session_skipped,
            },
            verify_cmd: self.options.verify_cmd.as_deref(),
            verify_timeout: self.options.verify_timeout,
        };
        let report =
            execute_apply_stage(root, executable.clone(), stage, self.clock, self.probe).await;
        let report = self.seal(root, report, &PipelineStage::ALL, true);
        let verify_success = report.verify.as_ref().map(|v| v.success);
        self.result(report, executable, verify_success, records)
    }

    async fn run_apply_approved(&self, root: &Path) -> CycleResult {
        let store = PendingStore::new(root);
        let approved = match store.load_approved(self.options.approval_token.as_deref(), self.clock)
        {
            Ok((approved, _)) => approved,
            Err(err) => {
                let mut report = ApplyReport::new(false);
                report.error = Some(err.to_string());
                let report = self.seal(root, report, &[], false);
                return self.result(report, Vec::new(), None, Vec::new());
            }
        };
        if approved.is_empty() {
            let mut report = ApplyReport::new(false);
            report.message = Some(MSG_NONE_APPROVED.to_string());
            let report = self.seal(root, report, &[], false);
            return self.result(report, Vec::new(), Some(true), Vec::new());
        }

        // Team approval bypasses the critic verdict the reviewer saw, but
        // policy re-runs against current history: a key that went hard-deny
        // since staging still blocks.
        let config = PolicyConfig::from_env(self.options.mode);
        let history = PolicyHistory::load(root);
        let review = evaluate_plan(&approved, &config, &history);
        let records = review.records;
        let decisions: Vec<Decision> = records
            .iter()
            .map(|record| {
                if record.decision == PolicyDecision::Deny {
                    Decision {
                        approval_state: ApprovalState::Approved,
                        critic_verdict: CriticVerdict::Deny,
                        source: DecisionSource::Policy,
                        rejection_reason: None,
                    }
                } else {
                    Decision::approved_by(DecisionSource::Team)
                }
            })
            .collect();
        let outcome = decide(&approved, &decisions, true);

        if outcome.executable.is_empty() {
            let mut report = ApplyReport::new(false);
            report.message = Some(MSG_NONE_EXECUTABLE.to_string());
            report.skipped = outcome.skipped_reasons();
            report.decision_summary = Some(outcome.summary());
            attach_telemetry(&mut report, TelemetryInputs::default(), &EventStore::new(root));
            let report = self.seal(root, report, &[PipelineStage::Validate], true);
            return self.result(report, Vec::new(), Some(true), records);
        }

        let gate_skips = outcome.skipped_reasons();
        let summary = outcome.summary();
        let executable = outcome.executable;
        let stage = StageInputs {
            gate_skips,
            decision_summary: summary,
            telemetry: TelemetryInputs {
                operations_total: executable.len(),
                ..TelemetryInputs::default()
            },
            verify_cmd: self.options.verify_cmd.as_deref(),
            verify_timeout: self.options.verify_timeout,
        };
        let report =
            execute_apply_stage(root, executable.clone(), stage, self.clock, self.probe).await;

        let verify_success = report.verify.as_ref().map(|v| v.success);
        let rolled_back = report.rollback.as_ref().map_or(false, |r| r.done);
        if verify_success == Some(false) && rolled_back {
            if let Err(err) = store.reset_approvals_after_rollback() {
                warn!(error = %err, "failed to reset pending approvals after rollback");
            }
        }

        let report = self.seal(
            root,
            report,
            &[
                PipelineStage::Validate,
                PipelineStage::Apply,
                PipelineStage::Verify,
            ],
            true,
        );
        self.result(report, executable, verify_success, records)
    }

    fn finish_empty(
        &self,
        root: &Path,
        records: Vec<PolicyRecord>,
        counters: FilterCounters,
    ) -> CycleResult {
        let mut report = ApplyReport::new(self.options.dry_run);
        report.message = Some(MSG_EMPTY_PLAN.to_string());
        attach_telemetry(
            &mut report,
            TelemetryInputs {
                operations_total: records.len(),
                campaign_skipped: counters.campaign_skipped,
                session_skipped: counters.session_skipped,
            },
            &EventStore::new(root),
        );
        let report = self.seal(
            root,
            report,
            &[PipelineStage::Input, PipelineStage::Plan],
            true,
        );
        self.result(report, Vec::new(), Some(true), records)
    }

    fn stage_pending(
        &self,
        root: &Path,
        kept: Vec<Operation>,
        records: Vec<PolicyRecord>,
    ) -> CycleResult {
        let store = PendingStore::new(root);
        let mut report = ApplyReport::new(true);
        match store.save(&kept, None, self.clock) {
            Ok(_) => {
                info!(
                    file = %store.path().display(),
                    operations = kept.len(),
                    "team mode: plan staged for review"
                );
                report.message = Some(format!(
                    "Plan saved to {}. Run mend fix . --apply-approved after review.",
                    store.path().display()
                ));
            }
            Err(err) => {
                report.error = Some(err.to_string());
            }
        }
        let report = self.seal(
            root,
            report,
            &[PipelineStage::Input, PipelineStage::Plan],
            false,
        );
        self.result(report, kept, None, records)
    }

    fn finish_selection_error(
        &self,
        root: &Path,
        err: &GateError,
        records: Vec<PolicyRecord>,
    ) -> CycleResult {
        let mut report = ApplyReport::new(self.options.dry_run);
        report.error = Some(err.to_string());
        let report = self.seal(
            root,
            report,
            &[
                PipelineStage::Input,
                PipelineStage::Plan,
                PipelineStage::Validate,
            ],
            true,
        );
        self.result(report, Vec::new(), None, records)
    }

    fn finish_all_rejected(
        &self,
        root: &Path,
        outcome: &DecisionOutcome,
        records: Vec<PolicyRecord>,
        planned_total: usize,
        counters: FilterCounters,
    ) -> CycleResult {
        let mut report = ApplyReport::new(self.options.dry_run);
        report.message = Some(MSG_ALL_REJECTED.to_string());
        report.skipped = outcome.skipped_reasons();
        let mut summary = outcome.summary();
        summary.blocked_by_policy += counters.policy_dropped;
        report.decision_summary = Some(summary);
        attach_telemetry(
            &mut report,
            TelemetryInputs {
                operations_total: planned_total,
                campaign_skipped: counters.campaign_skipped,
                session_skipped: counters.session_skipped,
            },
            &EventStore::new(root),
        );
        let report = self.seal(
            root,
            report,
            &[
                PipelineStage::Input,
                PipelineStage::Plan,
                PipelineStage::Validate,
            ],
            true,
        );
        self.result(report, Vec::new(), Some(true), records)
    }

    fn finish_dry_run(
        &self,
        root: &Path,
        outcome: DecisionOutcome,
        records: Vec<PolicyRecord>,
        planned_total: usize,
        counters: FilterCounters,
    ) -> CycleResult {
        let gate_skips = outcome.skipped_reasons();
        let mut summary = outcome.summary();
        summary.blocked_by_policy += counters.policy_dropped;
        let executable = outcome.executable;

        let plan = PatchPlan::batch(root, executable.clone());
        let executor = PatchExecutor::new();
        let mut report = executor.apply_with_clock(
            &plan,
            ExecutorOptions {
                dry_run: true,
                backup: false,
            },
            self.clock,
        );
        for (target, reason) in gate_skips {
            report.skipped.insert(target, reason);
        }
        report.decision_summary = Some(summary);
        attach_telemetry(
            &mut report,
            TelemetryInputs {
                operations_total: planned_total,
                campaign_skipped: counters.campaign_skipped,
                session_skipped: counters.session_skipped,
            },
            &EventStore::new(root),
        );
        let report = self.seal(
            root,
            report,
            &[
                PipelineStage::Input,
                PipelineStage::Plan,
                PipelineStage::Validate,
            ],
            true,
        );
        self.result(report, executable, None, records)
    }

    fn record_session_selection(
        &self,
        memory: &SessionMemory,
        kept: &[Operation],
        decisions: &[Decision],
    ) {
        let Some(session_id) = self.options.session_id.as_deref() else {
            return;
        };
        let mut approved = Vec::new();
        let mut rejected = Vec::new();
        for (op, decision) in kept.iter().zip(decisions) {
            if decision.is_rejected() {
                rejected.push(op.clone());
            } else if decision.is_approved() {
                approved.push(op.clone());
            }
        }
        if rejected.is_empty() {
            return;
        }
        if let Err(err) = memory.record(session_id, &approved, &rejected) {
            warn!(error = %err, "failed to record session selection");
        }
    }

    fn ignore_campaign(&self) -> bool {
        self.options.ignore_campaign || env_truthy(IGNORE_CAMPAIGN_ENV)
    }

    /// Attach trace, cycle id, exit code and state history; optionally
    /// persist the report.
    fn seal(
        &self,
        root: &Path,
        mut report: ApplyReport,
        stages: &[PipelineStage],
        write: bool,
    ) -> ApplyReport {
        report.pipeline = Some(PipelineTrace::record(stages));
        report.cycle_id = Some(Uuid::new_v4().to_string());
        let rc = i32::from(report.is_error_result());
        report.return_code = Some(rc);
        attach_cycle_state(&mut report);
        if write {
            write_fix_report(root, &report);
        }
        report
    }

    fn result(
        &self,
        report: ApplyReport,
        operations: Vec<Operation>,
        verify_success: Option<bool>,
        policy_records: Vec<PolicyRecord>,
    ) -> CycleResult {
        CycleResult {
            return_code: report.return_code.unwrap_or(0),
            modified: report.modified.clone(),
            verify_success,
            dry_run: report.dry_run,
            operations,
            policy_records,
            report,
        }
    }
}

/// Persist the report at the project root. Best effort; the in-memory
/// report is authoritative when the write fails.
fn write_fix_report(root: &Path, report: &ApplyReport) {
    let path = root.join(FIX_REPORT_FILE);
    match serde_json::to_string_pretty(report) {
        Ok(mut payload) => {
            payload.push('\n');
            if let Err(err) = fs::write(&path, payload) {
                warn!(file = %path.display(), error = %err, "failed to write fix report");
            } else {
                info!(file = %path.display(), "fix report written");
            }
        }
        Err(err) => warn!(error = %err, "failed to encode fix report"),
    }
}

fn partition_by_keys(
    operations: Vec<Operation>,
    keys: &std::collections::BTreeSet<String>,
) -> (Vec<Operation>, Vec<Operation>) {
    if keys.is_empty() {
        return (operations, Vec::new());
    }
    operations
        .into_iter()
        .partition(|op| !keys.contains(&op.key()))
}

fn env_truthy(name: &str) -> bool {
    env::var(name).map_or(false, |value| {
        matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes")
    })
}
