//! # Mend Patch
//!
//! Transactional execution of a [`mend_plan::PatchPlan`] against a project
//! tree.
//!
//! ## Core Concepts
//!
//! - **Executor**: dispatches each operation to its transform, writes the
//!   results, and records skips and errors in an [`mend_plan::ApplyReport`].
//! - **Backup Store**: run-scoped pristine copies under `.mend_backups/`,
//!   captured before the first write to each file, restorable as a unit.
//! - **Batch edits**: literal multi-file text replacement that either lands
//!   everywhere or touches nothing.
//!
//! Skips are ordinary outcomes. Only I/O failures are errors, and only
//! rollback failures are fatal to a run.

#![warn(unreachable_pub)]

mod backup;
mod batch;
mod error;
mod executor;

pub use backup::{BackupRun, BackupStore, RestoreReport, DEFAULT_BACKUP_DIR};
pub use batch::{apply_batch, BatchEdit, BatchReport, MAX_BATCH_OPS, MAX_BATCH_TEXT};
pub use error::PatchError;
pub use executor::{ExecutorOptions, PatchExecutor};

/// Crate version, exposed for diagnostics.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
