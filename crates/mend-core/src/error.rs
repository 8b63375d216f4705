//! Orchestrator error types.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that stop a cycle before any stage can run.
///
/// Everything that happens after plan intake is recorded inside the
/// [`ApplyReport`](mend_plan::ApplyReport) instead of surfacing here; a
/// failing verify or rollback is report data, not a `CoreError`.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The plan file exists but could not be read.
    #[error("{}: {source}", path.display())]
    PlanRead {
        /// Plan file path
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: io::Error,
    },

    /// The plan file holds something other than a patch plan.
    #[error("invalid patch plan {}: {source}", path.display())]
    PlanParse {
        /// Plan file path
        path: PathBuf,
        /// Underlying decode failure
        #[source]
        source: serde_json::Error,
    },
}
