//! HealthScore regression gate.
//!
//! The engine never computes structural-quality scores itself; an upstream
//! analyzer supplies them through [`HealthProbe`]. The gate only compares
//! the pre- and post-apply scores and fails the verification outcome when
//! the tree got worse, regardless of what the test command said.

use std::path::Path;

use mend_plan::{HealthDelta, VerifyOutcome};
use tracing::warn;

use crate::error::VerifyError;

/// Reason attached to outcomes that regressed the health score.
pub const METRICS_WORSENED: &str = "metrics_worsened";

/// Scalar structural-quality score for a project tree. Higher is healthier.
pub trait HealthProbe: Send + Sync {
    /// Scores the project rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::Probe`] when the score cannot be computed;
    /// callers treat that as "no gate", not as a failed gate.
    fn score(&self, root: &Path) -> Result<f64, VerifyError>;
}

/// Applies the regression gate to a verification outcome.
///
/// A post score strictly below the pre score forces `success=false` with
/// reason `metrics_worsened`, even when the test command passed. Equal or
/// improved scores leave the outcome untouched.
#[must_use]
pub fn gate_health(
    outcome: VerifyOutcome,
    before_score: f64,
    after_score: f64,
) -> (VerifyOutcome, HealthDelta) {
    let delta = HealthDelta::gate(before_score, after_score);
    if delta.success {
        (outcome, delta)
    } else {
        warn!(
            before = before_score,
            after = after_score,
            "health score regressed, failing verification"
        );
        (outcome.failed_with_reason(METRICS_WORSENED), delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct FixedProbe(f64);

    impl HealthProbe for FixedProbe {
        fn score(&self, _root: &Path) -> Result<f64, VerifyError> {
            Ok(self.0)
        }
    }

    struct BrokenProbe;

    impl HealthProbe for BrokenProbe {
        fn score(&self, _root: &Path) -> Result<f64, VerifyError> {
            Err(VerifyError::Probe("analyzer unavailable".into()))
        }
    }

    fn passing_outcome() -> VerifyOutcome {
        VerifyOutcome {
            success: true,
            return_code: 0,
            stdout: "4 passed".into(),
            stderr: String::new(),
            duration_ms: 120,
            command: "python -m pytest -q".into(),
            reason: None,
            timed_out: false,
            py_compile_fallback: false,
            fix_import_retry: false,
        }
    }

    #[test]
    fn regression_overrides_a_passing_test_run() {
        let (outcome, delta) = gate_health(passing_outcome(), 72.0, 68.5);
        assert!(!outcome.success);
        assert_eq!(outcome.reason.as_deref(), Some("metrics_worsened"));
        assert!(!delta.success);
        assert_eq!(delta.before_score, 72.0);
        assert_eq!(delta.after_score, 68.5);
    }

    #[test]
    fn equal_scores_pass_untouched() {
        let (outcome, delta) = gate_health(passing_outcome(), 50.0, 50.0);
        assert!(outcome.success);
        assert_eq!(outcome.reason, None);
        assert!(delta.success);
    }

    #[test]
    fn improvement_keeps_captured_output() {
        let (outcome, _) = gate_health(passing_outcome(), 40.0, 55.0);
        assert!(outcome.success);
        assert_eq!(outcome.stdout, "4 passed");
    }

    #[test]
    fn probes_are_object_safe() {
        let probes: Vec<Box<dyn HealthProbe>> =
            vec![Box::new(FixedProbe(61.5)), Box::new(BrokenProbe)];
        assert_eq!(probes[0].score(Path::new(".")).unwrap(), 61.5);
        assert!(probes[1].score(Path::new(".")).is_err());
    }
}
