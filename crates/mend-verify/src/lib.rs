//! # Mend Verify
//!
//! Runs a project's verification command after a patch lands and decides
//! whether the change survives.
//!
//! ## Core Concepts
//!
//! - **Config resolution**: explicit override > `[tool.mend]` in
//!   pyproject.toml > defaults, for both command and timeout.
//! - **Runner**: the command runs under `sh -c` as a killable subprocess
//!   with a hard timeout; output is truncated to a trailing window.
//! - **Failure classification**: import-shaped failures are recognized and
//!   turned into repair operations the executor can apply.
//! - **Health gate**: an injected probe scores the tree before and after;
//!   a drop fails the run even when tests pass.

#![warn(unreachable_pub)]

mod config;
mod error;
mod failure;
mod health;
mod import_repair;
mod runner;

pub use config::{VerifyConfig, DEFAULT_VERIFY_CMD, DEFAULT_VERIFY_TIMEOUT_SECS};
pub use error::VerifyError;
pub use failure::{classify_failure, failing_file_candidates, ImportFailure};
pub use health::{gate_health, HealthProbe, METRICS_WORSENED};
pub use import_repair::{plan_import_repairs, SKIP_DIRS};
pub use runner::{
    compile_check, needs_compile_fallback, run_verify, COMPILE_TIMEOUT_CAP_SECS, OUTPUT_TAIL_CHARS,
};

/// Crate version, exposed for diagnostics.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
