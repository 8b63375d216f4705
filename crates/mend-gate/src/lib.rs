//! Mend Gate
//!
//! Decision layer between a prepared patch plan and the executor. Policy
//! evaluation, human approvals and team-mode staging all converge here, so
//! the executor only ever sees operations something explicitly let through.
//!
//! # Core Concepts
//!
//! - **Policy**: per-mode limits and risk tiers turn each operation into
//!   allow, review or deny with an explainability payload
//! - **Decision gate**: approval state and critic verdict reduce a plan to
//!   its executable subset, recording why the rest was skipped
//! - **Pending plan**: team mode stages a plan to `.mend/pending_plan.json`
//!   with a token and expiry for a later apply-approved pass
//! - **Session memory**: approved and rejected keys per session, plus
//!   campaign-wide rejections and a rolling verify-failure window

#![warn(unreachable_pub)]

mod decision;
mod error;
mod pending;
mod policy;
mod session;

pub use decision::{
    decide, parse_operation_indexes, select_by_indexes, ApprovalState, CriticVerdict, Decision,
    DecisionOutcome, DecisionSource, SkippedDecision,
};
pub use error::GateError;
pub use pending::{
    PendingOperation, PendingPlan, PendingStore, TeamDecision, DEFAULT_PENDING_TTL_SECS,
    MIN_PENDING_TTL_SECS, PENDING_PLAN_FILE,
};
pub use policy::{
    deprioritize_weak_pairs, estimate_risk, evaluate_operation, evaluate_plan, is_weak_pair,
    AgentMode, Explainability, OperationPolicy, PolicyConfig, PolicyDecision, PolicyHistory,
    PolicyRecord, PolicyReview, RiskLevel, WhitelistEntry, ALLOW_TESTS_ENV, API_GUARD_ENV,
    DENY_ENV, MAX_FILES_ENV, MAX_OPS_ENV, MODE_ENV, RISK_ENV, WHITELIST_FILE,
};
pub use session::{
    SessionMemory, CAMPAIGN_REJECTED_MAX, CAMPAIGN_VERIFY_FAIL_MAX, CAMPAIGN_VERIFY_SUCCESS_MAX,
    SESSION_MEMORY_FILE,
};

/// Project-local state directory.
pub const MEND_DIR: &str = ".mend";

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
