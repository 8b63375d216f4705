//! Verification-layer errors.

use std::io;

use thiserror::Error;

/// Errors from spawning or probing, as opposed to a failing verification,
/// which is an ordinary [`mend_plan::VerifyOutcome`] with `success: false`.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// The shell subprocess could not be started.
    #[error("failed to spawn verify command '{command}': {source}")]
    Spawn {
        /// Command line that failed to start.
        command: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The subprocess started but its result could not be collected.
    #[error("verify command '{command}' failed: {source}")]
    Wait {
        /// Command line that was running.
        command: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// A health probe could not produce a score.
    #[error("health probe failed: {0}")]
    Probe(String),
}
