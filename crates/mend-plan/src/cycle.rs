//! Outer cycle lifecycle
//!
//! Idle → Thinking on start; Thinking → Done | Error is the only terminal
//! transition; Idle is re-entered after the terminal state is observed.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

use crate::report::ApplyReport;

/// Lifecycle of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    /// Nothing running; initial and final
    Idle,
    /// A cycle is in progress
    Thinking,
    /// Terminal: cycle completed cleanly
    Done,
    /// Terminal: cycle hit an error or failed verification
    Error,
}

impl CycleState {
    /// Stable lowercase name
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CycleState::Idle => "idle",
            CycleState::Thinking => "thinking",
            CycleState::Done => "done",
            CycleState::Error => "error",
        }
    }

    /// Terminal states return to Idle once observed
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, CycleState::Done | CycleState::Error)
    }
}

impl Display for CycleState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check a cycle transition
///
/// # Errors
/// [`CycleError::InvalidTransition`] for anything outside
/// Idle→Thinking, Thinking→Done, Thinking→Error, {Done,Error}→Idle.
pub fn validate_cycle_transition(from: CycleState, to: CycleState) -> Result<(), CycleError> {
    match (from, to) {
        (CycleState::Idle, CycleState::Thinking)
        | (CycleState::Thinking, CycleState::Done | CycleState::Error)
        | (CycleState::Done | CycleState::Error, CycleState::Idle) => Ok(()),
        _ => Err(CycleError::InvalidTransition { from, to }),
    }
}

/// A recorded history is valid iff it is exactly [Thinking, Done] or [Thinking, Error]
#[must_use]
pub fn is_valid_state_history(history: &[CycleState]) -> bool {
    matches!(
        history,
        [CycleState::Thinking, CycleState::Done] | [CycleState::Thinking, CycleState::Error]
    )
}

/// Attach the observed lifecycle to a finished report
///
/// The terminal state is Error when the report classifies as an error result,
/// Done otherwise.
pub fn attach_cycle_state(report: &mut ApplyReport) {
    let terminal = if report.is_error_result() {
        CycleState::Error
    } else {
        CycleState::Done
    };
    report.cycle_state_history = Some(vec![CycleState::Thinking, terminal]);
}

/// Cycle machine violations
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CycleError {
    /// Transition outside the allowed lifecycle
    #[error("invalid cycle transition: {from} -> {to}")]
    InvalidTransition {
        /// State the cycle was in
        from: CycleState,
        /// State the cycle tried to enter
        to: CycleState,
    },
}
