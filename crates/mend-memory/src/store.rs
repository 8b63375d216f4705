//! Learning store: outcome counters per (smell, action, target).
//!
//! Every applied operation eventually lands here with one of four outcomes,
//! keyed by what was wrong, what was done and where. The counters drive
//! promotion (proven pairs become whitelist candidates) and demotion
//! (chronically failing pairs become deny candidates), and merge with the
//! cross-project store for planning.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use mend_plan::Operation;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::MemoryError;

/// Store file at the project root.
pub const LEARNING_FILE: &str = "mend_learning.json";

/// Outcome of one operation after the cycle settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningOutcome {
    /// Skipped before apply, or the apply was a no-op
    NotApplied,
    /// Applied and the verify gate passed
    VerifySuccess,
    /// Applied and the verify gate failed
    VerifyFail,
    /// Applied but verification never ran
    VerifyUnknown,
}

/// Counters accumulated for one key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounters {
    /// All recorded outcomes
    #[serde(default)]
    pub total: u64,
    /// Outcomes that verified
    #[serde(default)]
    pub verify_success: u64,
    /// Outcomes that failed verify
    #[serde(default)]
    pub verify_fail: u64,
    /// Outcomes that never reached verify
    #[serde(default)]
    pub not_applied: u64,
}

impl OutcomeCounters {
    /// Fold one outcome in. `VerifyUnknown` counts toward the total only.
    pub fn record(&mut self, outcome: LearningOutcome) {
        self.total += 1;
        match outcome {
            LearningOutcome::NotApplied => self.not_applied += 1,
            LearningOutcome::VerifySuccess => self.verify_success += 1,
            LearningOutcome::VerifyFail => self.verify_fail += 1,
            LearningOutcome::VerifyUnknown => {}
        }
    }

    /// Verified successes over all recorded outcomes; 0.0 when empty.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.verify_success as f64 / self.total as f64
    }

    /// Add another counter set in, for local+global merging.
    pub fn add(&mut self, other: &OutcomeCounters) {
        self.total += other.total;
        self.verify_success += other.verify_success;
        self.verify_fail += other.verify_fail;
        self.not_applied += other.not_applied;
    }
}

/// Stable key for one (smell, action, target) triple.
#[must_use]
pub fn learning_key(smell_type: &str, action_kind: &str, target_file: &str) -> String {
    format!("{smell_type}|{action_kind}|{target_file}")
}

/// One outcome ready to record, usually derived from an [`Operation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LearningSample {
    /// Settled outcome
    pub outcome: LearningOutcome,
    /// Smell the operation addressed, `unknown` when absent
    pub smell_type: String,
    /// Operation kind name
    pub action_kind: String,
    /// Target path
    pub target_file: String,
}

impl LearningSample {
    /// Sample for one operation with its settled outcome.
    #[must_use]
    pub fn for_operation(op: &Operation, outcome: LearningOutcome) -> Self {
        LearningSample {
            outcome,
            smell_type: op.smell_type().unwrap_or("unknown").to_string(),
            action_kind: op.kind().as_str().to_string(),
            target_file: op.target_file().display().to_string(),
        }
    }

    fn key(&self) -> String {
        learning_key(&self.smell_type, &self.action_kind, &self.target_file)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LearningData {
    #[serde(default)]
    records: BTreeMap<String, OutcomeCounters>,
}

/// Project-local learning store.
#[derive(Debug, Clone)]
pub struct LearningStore {
    path: PathBuf,
}

impl LearningStore {
    /// Store for the given project root.
    #[must_use]
    pub fn new(root: &Path) -> Self {
        LearningStore {
            path: root.join(LEARNING_FILE),
        }
    }

    /// Backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> LearningData {
        let Ok(raw) = fs::read_to_string(&self.path) else {
            return LearningData::default();
        };
        match serde_json::from_str(&raw) {
            Ok(data) => data,
            Err(err) => {
                warn!(file = %self.path.display(), %err, "learning store unreadable, starting fresh");
                LearningData::default()
            }
        }
    }

    fn save(&self, data: &LearningData) -> Result<(), MemoryError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| MemoryError::io(parent, e))?;
        }
        let mut body = serde_json::to_string_pretty(data)?;
        body.push('\n');
        fs::write(&self.path, body).map_err(|e| MemoryError::io(&self.path, e))
    }

    /// Record one outcome.
    pub fn record(
        &self,
        outcome: LearningOutcome,
        smell_type: &str,
        action_kind: &str,
        target_file: &str,
    ) -> Result<(), MemoryError> {
        self.record_all(&[LearningSample {
            outcome,
            smell_type: smell_type.to_string(),
            action_kind: action_kind.to_string(),
            target_file: target_file.to_string(),
        }])
    }

    /// Record a batch of outcomes in one read-modify-write.
    pub fn record_all(&self, samples: &[LearningSample]) -> Result<(), MemoryError> {
        if samples.is_empty() {
            return Ok(());
        }
        let mut data = self.load();
        for sample in samples {
            data.records
                .entry(sample.key())
                .or_default()
                .record(sample.outcome);
        }
        self.save(&data)
    }

    /// Counters for one key, zeroed when nothing was recorded yet.
    #[must_use]
    pub fn counters(
        &self,
        smell_type: &str,
        action_kind: &str,
        target_file: &str,
    ) -> OutcomeCounters {
        self.load()
            .records
            .get(&learning_key(smell_type, action_kind, target_file))
            .copied()
            .unwrap_or_default()
    }

    /// Success rate for one key; 0.0 when nothing was recorded yet.
    #[must_use]
    pub fn success_rate(&self, smell_type: &str, action_kind: &str, target_file: &str) -> f64 {
        self.counters(smell_type, action_kind, target_file)
            .success_rate()
    }

    /// All per-target records.
    #[must_use]
    pub fn records(&self) -> BTreeMap<String, OutcomeCounters> {
        self.load().records
    }

    /// Counters rolled up per action kind.
    #[must_use]
    pub fn aggregate_by_action(&self) -> BTreeMap<String, OutcomeCounters> {
        self.roll_up(|parts| parts.1.to_string())
    }

    /// Counters rolled up per `smell|action` pair.
    #[must_use]
    pub fn aggregate_by_smell_action(&self) -> BTreeMap<String, OutcomeCounters> {
        self.roll_up(|parts| format!("{}|{}", parts.0, parts.1))
    }

    fn roll_up(
        &self,
        group: impl Fn((&str, &str, &str)) -> String,
    ) -> BTreeMap<String, OutcomeCounters> {
        let mut out: BTreeMap<String, OutcomeCounters> = BTreeMap::new();
        for (key, counters) in self.load().records {
            let Some(parts) = split_key(&key) else {
                continue;
            };
            out.entry(group(parts)).or_default().add(&counters);
        }
        out
    }
}

fn split_key(key: &str) -> Option<(&str, &str, &str)> {
    let mut it = key.splitn(3, '|');
    match (it.next(), it.next(), it.next()) {
        (Some(smell), Some(action), Some(target)) => Some((smell, action, target)),
        _ => None,
    }
}
