//! Gate error types.

use std::io;
use std::path::Path;

use thiserror::Error;

/// Errors from decision gating, approval selection and the durable stores.
#[derive(Debug, Error)]
pub enum GateError {
    /// Apply-approved was requested with nothing staged.
    #[error("No pending plan. Run mend fix . --team-mode first.")]
    NoPendingPlan,

    /// A supplied confirmation token does not match the stored plan.
    #[error("confirmation token does not match the pending plan")]
    TokenMismatch,

    /// The stored plan's confirmation window has passed.
    #[error("pending plan expired; run mend fix . --team-mode again")]
    PendingExpired,

    /// Approve/reject index selection could not be parsed.
    #[error("{0}")]
    Selection(String),

    /// A store file could not be read or written.
    #[error("{path}: {source}")]
    Io {
        /// Path involved in the failed operation
        path: String,
        /// Underlying I/O failure
        #[source]
        source: io::Error,
    },

    /// A store payload could not be encoded.
    #[error("encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

impl GateError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        GateError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_messages_are_stable() {
        assert_eq!(
            GateError::NoPendingPlan.to_string(),
            "No pending plan. Run mend fix . --team-mode first."
        );
        assert_eq!(
            GateError::Selection("Invalid --approve value 'x': expected integers".into())
                .to_string(),
            "Invalid --approve value 'x': expected integers"
        );
    }
}
