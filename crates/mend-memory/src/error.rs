//! Error type for memory stores.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors raised by learning, event and draft stores.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// A draft was requested for kinds the whitelist does not cover.
    #[error("unknown whitelist kinds: {unknown}. Allowed: {allowed}")]
    UnknownDraftKinds {
        /// Comma-joined rejected kind names
        unknown: String,
        /// Comma-joined accepted kind names
        allowed: String,
    },

    /// Filesystem failure while reading or writing a store.
    #[error("io error at {path}: {source}")]
    Io {
        /// Affected path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Store content could not be encoded.
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

impl MemoryError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        MemoryError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
