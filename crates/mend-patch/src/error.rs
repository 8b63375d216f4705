//! Patch-layer errors.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors from backup, restore, and batch application.
///
/// The executor itself does not return these for per-operation problems;
/// those are recorded in the report. These surface where no report exists
/// yet (backup bookkeeping) or where the whole call is atomic (batch).
#[derive(Debug, Error)]
pub enum PatchError {
    /// The backups root does not exist, so nothing can be restored.
    #[error("Backup dir not found: {}", .0.display())]
    BackupDirMissing(PathBuf),

    /// The backups root exists but holds no runs.
    #[error("No backup runs found")]
    NoBackupRuns,

    /// An explicit run id was requested but no such run directory exists.
    #[error("Run not found: {0}")]
    RunNotFound(String),

    /// A batch was rejected before any write happened.
    #[error("batch rejected: {0}")]
    BatchRejected(String),

    /// A batch failed mid-write; originals were put back.
    #[error("batch aborted: {0}")]
    BatchAborted(String),

    /// Filesystem failure with the path that caused it.
    #[error("{path}: {source}")]
    Io {
        /// Path involved in the failed call.
        path: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The run manifest could not be encoded.
    #[error("manifest encode failed: {0}")]
    Manifest(#[from] serde_json::Error),
}

impl PatchError {
    pub(crate) fn io(path: &std::path::Path, source: io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}
