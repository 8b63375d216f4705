//! Injected time source
//!
//! Stores and gates never call wall-clock functions directly; they take a
//! [`Clock`] so expiry and record timestamps are deterministic under test.

/// Time source abstraction (unix seconds)
pub trait Clock: Send + Sync {
    /// Current unix timestamp in seconds
    fn now_ts(&self) -> i64;
}

/// Wall-clock implementation used by the binary
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ts(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Deterministic clock for tests: always returns the stored instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn now_ts(&self) -> i64 {
        self.0
    }
}
