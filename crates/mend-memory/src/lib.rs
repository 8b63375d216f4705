//! Mend Memory
//!
//! Long-lived learning for the fix cycle: which (smell, action, target)
//! combinations keep verifying, which keep failing, and what that history
//! should change about future plans.
//!
//! # Core Concepts
//!
//! - **Learning store**: outcome counters per (smell, action, target) in a
//!   tolerant JSON file at the project root
//! - **Promotion**: threshold rules turning counters into whitelist or deny
//!   candidates
//! - **Whitelist draft**: campaign evidence rendered as a reviewable
//!   `.mend/operation_whitelist.draft.json`
//! - **Event log**: rolling project-local record of scans, patches and
//!   verifies
//! - **Global store**: hash-chained cross-project learn log under `~/.mend`

#![warn(unreachable_pub)]

mod draft;
mod error;
mod events;
mod global_store;
mod promotion;
mod store;

pub use draft::{
    validate_draft_kinds, write_whitelist_draft, DraftEntry, DraftEvidence, DraftFile, DraftMeta,
    DraftOptions, DraftReport, DEFAULT_DRAFT_KIND, DEFAULT_DRAFT_MIN_SUCCESS, WHITELIST_DRAFT_FILE,
};
pub use error::MemoryError;
pub use events::{json_safe, Event, EventKind, EventStore, EVENTS_FILE, MAX_EVENTS};
pub use global_store::{
    append_learn_to_global, global_memory_root, merged_smell_action_stats, ChainStatus,
    ChainedEvent, GlobalLearnRecord, GlobalStore, LearnedOperation, GLOBAL_MEMORY_DISABLE_ENV,
    GLOBAL_MEMORY_ENV,
};
pub use promotion::{
    classify, deny_candidates, whitelist_candidates, PromotionVerdict, DENY_MAX_RATE,
    DENY_MIN_TOTAL, WHITELIST_MIN_RATE, WHITELIST_MIN_TOTAL,
};
pub use store::{
    learning_key, LearningOutcome, LearningSample, LearningStore, OutcomeCounters, LEARNING_FILE,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
