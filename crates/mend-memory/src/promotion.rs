//! Promotion thresholds over learning counters.
//!
//! A pair with enough clean history becomes a whitelist candidate; a pair
//! that keeps failing becomes a deny candidate. Everything else stays
//! undecided until more outcomes accumulate.

use std::collections::BTreeMap;

use crate::store::OutcomeCounters;

/// Minimum outcomes before promotion is considered.
pub const WHITELIST_MIN_TOTAL: u64 = 2;
/// Success rate a whitelist candidate must reach.
pub const WHITELIST_MIN_RATE: f64 = 0.6;
/// Minimum outcomes before demotion is considered.
pub const DENY_MIN_TOTAL: u64 = 3;
/// Success rate below which a pair becomes a deny candidate.
pub const DENY_MAX_RATE: f64 = 0.25;

/// Where a counter set stands against the promotion thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotionVerdict {
    /// Proven: enough history, no failures, high rate
    WhitelistCandidate,
    /// Chronically failing: enough history, low rate
    DenyCandidate,
    /// Not enough signal either way
    Undecided,
}

/// Classify one counter set.
#[must_use]
pub fn classify(counters: &OutcomeCounters) -> PromotionVerdict {
    let rate = counters.success_rate();
    if counters.total >= WHITELIST_MIN_TOTAL
        && counters.verify_fail == 0
        && rate >= WHITELIST_MIN_RATE
    {
        return PromotionVerdict::WhitelistCandidate;
    }
    if counters.total >= DENY_MIN_TOTAL && rate < DENY_MAX_RATE {
        return PromotionVerdict::DenyCandidate;
    }
    PromotionVerdict::Undecided
}

/// Keys classified as whitelist candidates, in key order.
#[must_use]
pub fn whitelist_candidates(stats: &BTreeMap<String, OutcomeCounters>) -> Vec<String> {
    stats
        .iter()
        .filter(|(_, c)| classify(c) == PromotionVerdict::WhitelistCandidate)
        .map(|(k, _)| k.clone())
        .collect()
}

/// Keys classified as deny candidates, in key order.
#[must_use]
pub fn deny_candidates(stats: &BTreeMap<String, OutcomeCounters>) -> Vec<String> {
    stats
        .iter()
        .filter(|(_, c)| classify(c) == PromotionVerdict::DenyCandidate)
        .map(|(k, _)| k.clone())
        .collect()
}
