//! Mend Core
//!
//! The fix cycle: load a staged patch plan, narrow it through policy and
//! approval memory, gate it, then apply, verify and (when verification
//! fails) roll back. The `mend` binary in this crate is the command line
//! entry point; everything else is the orchestration the binary drives.
//!
//! # Core Concepts
//!
//! - **Plan intake**: `mend_plan.json` at the project root is the handoff
//!   from the planning side; a missing file is a clean no-op
//! - **Cycle**: one plan-to-report run with a fixed stage order and a
//!   truncated pipeline trace on every short-circuit
//! - **Report**: `mend_fix_report.json` persists the outcome, telemetry
//!   and safety-gate summary for the next cycle to read

#![warn(unreachable_pub)]

mod apply;
mod cycle;
mod error;
mod source;
mod telemetry;

pub use cycle::{
    CycleResult, FixCycle, FixCycleOptions, FIX_REPORT_FILE, IGNORE_CAMPAIGN_ENV,
    MSG_ALL_REJECTED, MSG_EMPTY_PLAN, MSG_NONE_APPROVED, MSG_NONE_EXECUTABLE, MSG_NO_PLAN,
};
pub use error::CoreError;
pub use source::{load_plan, PLAN_FILE};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
