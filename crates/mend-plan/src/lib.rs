//! Mend Plan Model
//!
//! Shared data types for the patch pipeline.
//!
//! # Core Concepts
//!
//! - [`Operation`]: a single proposed source edit with a kind, target, and parameters
//! - [`PatchPlan`]: an ordered batch of operations applied together
//! - [`ApplyReport`]: the record of what happened when a plan executed
//! - [`PipelineStage`] / [`CycleState`]: the two state machines a run moves through
//! - [`Clock`]: injected time source so stores and gates stay deterministic in tests

#![warn(unreachable_pub)]

mod clock;
mod cycle;
mod operation;
mod pipeline;
mod plan;
mod report;

pub use clock::{Clock, FixedClock, SystemClock};
pub use cycle::{attach_cycle_state, is_valid_state_history, validate_cycle_transition, CycleError, CycleState};
pub use operation::{resolve_in_root, Operation, OperationKind, DEFAULT_MAX_EXTRA_PARAMS};
pub use pipeline::{
    is_valid_stage_sequence, validate_stage_transition, PipelineError, PipelineStage,
    PipelineTrace, PIPELINE_MODEL,
};
pub use plan::{PatchPlan, PlanError};
pub use report::{
    ApplyReport, DecisionSummary, HealthDelta, OperationError, RollbackOutcome, SafetyGates,
    SkipReason, Telemetry, VerifyOutcome,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
