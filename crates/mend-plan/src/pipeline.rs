//! Pipeline stage machine
//!
//! A run moves through Input → Plan → Validate → Apply → Verify. Traces are
//! strictly increasing: stages may be skipped (short-circuits truncate), never
//! revisited.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Human-readable model string recorded in traces
pub const PIPELINE_MODEL: &str = "Input → Plan → Validate → Apply → Verify";

/// One stage of the fix pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Gather issues and candidate operations
    Input,
    /// Assemble the patch plan
    Plan,
    /// Decision gate and policy filtering
    Validate,
    /// Execute the plan
    Apply,
    /// Run verification and gates
    Verify,
}

impl PipelineStage {
    /// All stages in pipeline order
    pub const ALL: [PipelineStage; 5] = [
        PipelineStage::Input,
        PipelineStage::Plan,
        PipelineStage::Validate,
        PipelineStage::Apply,
        PipelineStage::Verify,
    ];

    /// Position within the pipeline
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            PipelineStage::Input => 0,
            PipelineStage::Plan => 1,
            PipelineStage::Validate => 2,
            PipelineStage::Apply => 3,
            PipelineStage::Verify => 4,
        }
    }

    /// Following stage, if any
    #[inline]
    #[must_use]
    pub fn next(self) -> Option<PipelineStage> {
        PipelineStage::ALL.get(self.index() + 1).copied()
    }

    /// Stable lowercase name
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStage::Input => "input",
            PipelineStage::Plan => "plan",
            PipelineStage::Validate => "validate",
            PipelineStage::Apply => "apply",
            PipelineStage::Verify => "verify",
        }
    }
}

impl Display for PipelineStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check a stage transition: only forward movement is allowed
///
/// # Errors
/// [`PipelineError::InvalidTransition`] when `to` is not strictly after `from`.
pub fn validate_stage_transition(
    from: PipelineStage,
    to: PipelineStage,
) -> Result<(), PipelineError> {
    if to.index() > from.index() {
        Ok(())
    } else {
        Err(PipelineError::InvalidTransition { from, to })
    }
}

/// A recorded sequence is valid when stage indexes strictly increase
#[must_use]
pub fn is_valid_stage_sequence(stages: &[PipelineStage]) -> bool {
    stages.windows(2).all(|w| w[1].index() > w[0].index())
}

/// Trace of which stages one run executed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineTrace {
    /// The model the trace was recorded against
    pub model: String,
    /// Stages that ran, pipeline order
    pub stages_executed: Vec<PipelineStage>,
    /// Whether the sequence satisfies the strictly-increasing invariant
    pub valid: bool,
}

impl PipelineTrace {
    /// Record a trace for the stages that executed
    #[must_use]
    pub fn record(stages: &[PipelineStage]) -> Self {
        Self {
            model: PIPELINE_MODEL.to_string(),
            stages_executed: stages.to_vec(),
            valid: is_valid_stage_sequence(stages),
        }
    }

    /// The full five-stage trace
    #[must_use]
    pub fn full() -> Self {
        Self::record(&PipelineStage::ALL)
    }
}

/// Pipeline machine violations
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PipelineError {
    /// Attempted to move backwards or hold position
    #[error("invalid stage transition: {from} -> {to}")]
    InvalidTransition {
        /// Stage the run was in
        from: PipelineStage,
        /// Stage the run tried to enter
        to: PipelineStage,
    },
}
