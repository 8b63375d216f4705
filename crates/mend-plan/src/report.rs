//! Apply reports
//!
//! The [`ApplyReport`] is built once by the executor; later stages only append
//! fields (verify, rollback, health, telemetry, trace). It serializes to the
//! structured file persisted at the project root after every apply.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};

use crate::cycle::CycleState;
use crate::pipeline::PipelineTrace;

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(v: &bool) -> bool {
    !*v
}

/// Why an operation was skipped instead of applied
///
/// Skips are ordinary outcomes; only I/O failures are errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Target path does not exist
    TargetNotFound,
    /// Target exists but is not a regular file
    NotAFile,
    /// Transform refused or failed validation; message is the transform's reason
    TransformFailed(String),
    /// Content or idempotency marker already present
    AlreadyApplied,
    /// Companion output path already exists; refusing to clobber
    WouldOverwrite(PathBuf),
    /// Decision gate excluded the operation
    DecisionBlocked(String),
}

impl Display for SkipReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::TargetNotFound => f.write_str("target not found"),
            SkipReason::NotAFile => f.write_str("not a file"),
            SkipReason::TransformFailed(msg) => write!(f, "transform failed: {msg}"),
            SkipReason::AlreadyApplied => f.write_str("already applied"),
            SkipReason::WouldOverwrite(path) => {
                write!(f, "refusing to overwrite existing path: {}", path.display())
            }
            SkipReason::DecisionBlocked(reason) => write!(f, "blocked by decision gate: {reason}"),
        }
    }
}

/// A hard per-operation error (I/O scope only)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationError {
    /// Target the operation addressed (may be empty when the target itself was missing)
    pub path: String,
    /// Error text
    pub error: String,
}

/// Result of running the verification command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyOutcome {
    /// Whether verification passed after all gates
    pub success: bool,
    /// Subprocess exit code; -1 on timeout
    pub return_code: i32,
    /// Captured stdout, truncated to the trailing window
    pub stdout: String,
    /// Captured stderr, truncated to the trailing window
    pub stderr: String,
    /// Wall-clock duration of the subprocess
    pub duration_ms: u64,
    /// Command line that ran
    pub command: String,
    /// Failure attribution (e.g. `metrics_worsened`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// The subprocess was killed at the timeout
    #[serde(default, skip_serializing_if = "is_false")]
    pub timed_out: bool,
    /// Result came from the compile-only fallback
    #[serde(default, skip_serializing_if = "is_false")]
    pub py_compile_fallback: bool,
    /// An import repair was applied and verification re-ran once
    #[serde(default, skip_serializing_if = "is_false")]
    pub fix_import_retry: bool,
}

impl VerifyOutcome {
    /// A failed outcome with a reason, keeping captured output
    #[must_use]
    pub fn failed_with_reason(mut self, reason: impl Into<String>) -> Self {
        self.success = false;
        self.reason = Some(reason.into());
        self
    }
}

/// Result of restoring a run's backups
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackOutcome {
    /// Whether the restore ran at all
    pub done: bool,
    /// Paths restored from the run's backup set
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub restored: Vec<PathBuf>,
    /// Per-file restore failures; surfaced, never swallowed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    /// Why rollback ran, or why it could not
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl RollbackOutcome {
    /// Rollback that could not run because nothing was backed up
    #[inline]
    #[must_use]
    pub fn not_possible(reason: impl Into<String>) -> Self {
        Self {
            done: false,
            restored: Vec::new(),
            errors: Vec::new(),
            reason: Some(reason.into()),
        }
    }
}

/// Scalar structural-quality scores around one apply
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthDelta {
    /// Score before the plan ran
    pub before_score: f64,
    /// Score after the plan ran
    pub after_score: f64,
    /// `after >= before`; false forces rollback with `metrics_worsened`
    pub success: bool,
}

impl HealthDelta {
    /// Gate two scores; regression is any strict decrease
    #[inline]
    #[must_use]
    pub fn gate(before_score: f64, after_score: f64) -> Self {
        Self {
            before_score,
            after_score,
            success: after_score >= before_score,
        }
    }
}

/// Run counters attached after verification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    /// Operations the plan carried
    pub operations_total: usize,
    /// Files actually modified
    pub modified_count: usize,
    /// Operations skipped
    pub skipped_count: usize,
    /// modified / operations_total
    pub apply_rate: f64,
    /// skipped / operations_total
    pub no_op_rate: f64,
    /// 1.0 when this run rolled back, else 0.0
    pub rollback_rate: f64,
    /// This run's verify duration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_duration_ms: Option<u64>,
    /// Median verify duration over the recent runs window
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub median_verify_duration_ms: Option<u64>,
}

/// How many operations each decision layer blocked
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionSummary {
    /// Blocked by the policy engine
    pub blocked_by_policy: usize,
    /// Blocked by the critic verdict
    pub blocked_by_critic: usize,
    /// Blocked by a human or team decision
    pub blocked_by_human: usize,
}

/// Which protections were active for the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyGates {
    /// Pristine content captured before writes
    pub backup: bool,
    /// Verification ran after apply
    pub verify: bool,
    /// Failed verification restores backups automatically
    pub auto_rollback: bool,
    /// A health probe gated the result
    pub health_gate: bool,
}

/// The record of what happened when a plan executed
///
/// Built once by the executor; later stages append, never rewrite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyReport {
    /// Plan was evaluated without writing
    pub dry_run: bool,
    /// Deduplicated paths written (or would-be written under dry-run), first-seen order
    pub modified: Vec<PathBuf>,
    /// Ordered map of path → skip reason
    pub skipped: IndexMap<String, String>,
    /// Hard per-operation errors
    pub errors: Vec<OperationError>,
    /// First backup directory created for the run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_dir: Option<PathBuf>,
    /// Run identifier (UTC timestamp)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    /// Verification result, when a verify stage ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify: Option<VerifyOutcome>,
    /// Rollback result, when one was attempted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback: Option<RollbackOutcome>,
    /// Health scores around the run, when a probe was injected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthDelta>,
    /// Run counters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telemetry: Option<Telemetry>,
    /// Active protections
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safety_gates: Option<SafetyGates>,
    /// Counts of operations blocked per decision layer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_summary: Option<DecisionSummary>,
    /// Stages that executed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<PipelineTrace>,
    /// Cycle lifecycle as observed, e.g. [Thinking, Done]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle_state_history: Option<Vec<CycleState>>,
    /// Identifier of the driving cycle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle_id: Option<String>,
    /// Cycle-level error, when the run aborted outside per-operation scope
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Exit code the driving caller should use
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_code: Option<i32>,
    /// Operator-facing message ("Plan saved to …", "Cycle complete.")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ApplyReport {
    /// Fresh report for a run
    #[must_use]
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            modified: Vec::new(),
            skipped: IndexMap::new(),
            errors: Vec::new(),
            backup_dir: None,
            run_id: None,
            verify: None,
            rollback: None,
            health: None,
            telemetry: None,
            safety_gates: None,
            decision_summary: None,
            pipeline: None,
            cycle_state_history: None,
            cycle_id: None,
            error: None,
            return_code: None,
            message: None,
        }
    }

    /// Record a modified path, keeping the list deduplicated in first-seen order
    pub fn record_modified(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if !self.modified.contains(&path) {
            self.modified.push(path);
        }
    }

    /// Merge additional modified paths (e.g. from an import-fix retry)
    pub fn merge_modified<I: IntoIterator<Item = PathBuf>>(&mut self, paths: I) {
        for path in paths {
            self.record_modified(path);
        }
    }

    /// Record a skipped operation; a later skip for the same path wins
    pub fn record_skip(&mut self, path: &Path, reason: &SkipReason) {
        self.skipped
            .insert(path.display().to_string(), reason.to_string());
    }

    /// Record a hard per-operation error
    pub fn record_error(&mut self, path: impl Into<String>, error: impl Into<String>) {
        self.errors.push(OperationError {
            path: path.into(),
            error: error.into(),
        });
    }

    /// Terminal error classification for the outer cycle:
    /// explicit error, non-zero return code, hard errors, or failed verify
    #[must_use]
    pub fn is_error_result(&self) -> bool {
        self.error.is_some()
            || self.return_code.is_some_and(|rc| rc != 0)
            || !self.errors.is_empty()
            || self.verify.as_ref().is_some_and(|v| !v.success)
    }
}

impl Default for ApplyReport {
    fn default() -> Self {
        Self::new(false)
    }
}
