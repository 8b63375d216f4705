//! Cross-project learning store.
//!
//! Learn events from every project land in one shared log under the user's
//! home directory, so what worked in project A informs planning in project
//! B. Entries are hash-chained: each carries the hash of its predecessor
//! and a digest over its own payload, making silent edits detectable even
//! after the window rolls.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use mend_plan::{Clock, Operation};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::events::{json_safe, Event, EventKind, MAX_EVENTS};
use crate::store::{LearningStore, OutcomeCounters};
use crate::MemoryError;

/// Override for the global memory directory.
pub const GLOBAL_MEMORY_ENV: &str = "MEND_GLOBAL_MEMORY";
/// Disables the global store entirely when truthy.
pub const GLOBAL_MEMORY_DISABLE_ENV: &str = "MEND_DISABLE_GLOBAL_MEMORY";

const GLOBAL_DIR_NAME: &str = ".mend";
const GLOBAL_EVENTS_FILE: &str = "events.json";

fn is_truthy(raw: &str) -> bool {
    matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "yes")
}

fn root_from_env(disable: Option<&str>, override_dir: Option<&str>) -> Option<PathBuf> {
    if disable.is_some_and(is_truthy) {
        return None;
    }
    if let Some(dir) = override_dir {
        if !dir.trim().is_empty() {
            return Some(PathBuf::from(dir));
        }
    }
    directories::UserDirs::new().map(|u| u.home_dir().join(GLOBAL_DIR_NAME))
}

/// Global memory directory, or `None` when disabled or homeless.
#[must_use]
pub fn global_memory_root() -> Option<PathBuf> {
    let disable = env::var(GLOBAL_MEMORY_DISABLE_ENV).ok();
    let override_dir = env::var(GLOBAL_MEMORY_ENV).ok();
    root_from_env(disable.as_deref(), override_dir.as_deref())
}

/// Operation summary stored in a learn event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearnedOperation {
    /// Operation kind name
    pub kind: String,
    /// Smell addressed, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smell_type: Option<String>,
    /// Target path
    pub target_file: String,
}

impl LearnedOperation {
    /// Summary of one operation.
    #[must_use]
    pub fn from_operation(op: &Operation) -> Self {
        LearnedOperation {
            kind: op.kind().as_str().to_string(),
            smell_type: op.smell_type().map(ToString::to_string),
            target_file: op.target_file().display().to_string(),
        }
    }
}

/// One cycle's learning, ready for the global log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalLearnRecord {
    /// Project the cycle ran in
    pub project_root: String,
    /// Modules the cycle touched
    pub modules: Vec<String>,
    /// Operation summaries
    pub operations: Vec<LearnedOperation>,
    /// Risks the planner flagged
    pub risks: Vec<String>,
    /// How verification ended, when it ran
    pub verify_success: Option<bool>,
}

/// Event plus its chain linkage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainedEvent {
    /// The event itself
    pub event: Event,
    /// Hash of the preceding entry, empty for the first
    pub prev_hash: String,
    /// Digest over `prev_hash` and the event payload
    pub hash: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ChainLog {
    #[serde(default)]
    entries: Vec<ChainedEvent>,
}

/// Result of walking the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainStatus {
    /// Entries examined
    pub entries: usize,
    /// First entry whose hash or linkage does not check out
    pub broken_at: Option<usize>,
}

impl ChainStatus {
    /// Whether every entry checked out.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.broken_at.is_none()
    }
}

fn chain_hash(prev: &str, event: &Event) -> Result<String, MemoryError> {
    let payload = serde_json::to_string(event)?;
    let mut hasher = Sha256::new();
    hasher.update(prev.as_bytes());
    hasher.update(payload.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Hash-chained store shared across projects.
#[derive(Debug, Clone)]
pub struct GlobalStore {
    path: PathBuf,
}

impl GlobalStore {
    /// Open the store at the environment-resolved location, `None` when
    /// global memory is disabled.
    #[must_use]
    pub fn open() -> Option<GlobalStore> {
        global_memory_root().map(|root| GlobalStore::at_root(&root))
    }

    /// Store under an explicit directory.
    #[must_use]
    pub fn at_root(root: &Path) -> GlobalStore {
        GlobalStore {
            path: root.join(GLOBAL_EVENTS_FILE),
        }
    }

    /// Backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> ChainLog {
        let Ok(raw) = fs::read_to_string(&self.path) else {
            return ChainLog::default();
        };
        match serde_json::from_str(&raw) {
            Ok(log) => log,
            Err(err) => {
                warn!(file = %self.path.display(), %err, "global memory unreadable, starting fresh");
                ChainLog::default()
            }
        }
    }

    fn save(&self, log: &mut ChainLog) -> Result<(), MemoryError> {
        let overflow = log.entries.len().saturating_sub(MAX_EVENTS);
        if overflow > 0 {
            log.entries.drain(..overflow);
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| MemoryError::io(parent, e))?;
        }
        let mut body = serde_json::to_string_pretty(log)?;
        body.push('\n');
        fs::write(&self.path, body).map_err(|e| MemoryError::io(&self.path, e))
    }

    /// Append one learn event, extending the chain.
    pub fn append_learn(
        &self,
        record: &GlobalLearnRecord,
        clock: &dyn Clock,
    ) -> Result<(), MemoryError> {
        let event = Event {
            kind: EventKind::Learn,
            input: json_safe(json!({
                "project_root": record.project_root,
                "modules": record.modules,
                "operations": record.operations,
                "risks": record.risks,
            })),
            output: json!({}),
            result: record.verify_success.map(Value::Bool),
            timestamp: clock.now_ts(),
        };
        let mut log = self.load();
        let prev = log.entries.last().map(|e| e.hash.clone()).unwrap_or_default();
        let hash = chain_hash(&prev, &event)?;
        log.entries.push(ChainedEvent {
            event,
            prev_hash: prev,
            hash,
        });
        self.save(&mut log)
    }

    /// Recompute every digest and check linkage. After the window rolls,
    /// the first retained entry's `prev_hash` is taken as given.
    #[must_use]
    pub fn verify_chain(&self) -> ChainStatus {
        let log = self.load();
        let mut broken_at = None;
        for (i, entry) in log.entries.iter().enumerate() {
            let expected = match chain_hash(&entry.prev_hash, &entry.event) {
                Ok(h) => h,
                Err(_) => {
                    broken_at = Some(i);
                    break;
                }
            };
            if expected != entry.hash {
                broken_at = Some(i);
                break;
            }
            if i > 0 && entry.prev_hash != log.entries[i - 1].hash {
                broken_at = Some(i);
                break;
            }
        }
        ChainStatus {
            entries: log.entries.len(),
            broken_at,
        }
    }

    /// Counters per `smell|action` pair across all learn entries.
    #[must_use]
    pub fn aggregate_by_smell_action(&self) -> BTreeMap<String, OutcomeCounters> {
        let mut stats: BTreeMap<String, OutcomeCounters> = BTreeMap::new();
        for entry in self.load().entries {
            if entry.event.kind != EventKind::Learn {
                continue;
            }
            let Some(ops) = entry.event.input.get("operations").and_then(Value::as_array) else {
                continue;
            };
            for op in ops {
                let kind = op.get("kind").and_then(Value::as_str).unwrap_or("unknown");
                let smell = op
                    .get("smell_type")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                let counters = stats.entry(format!("{smell}|{kind}")).or_default();
                counters.total += 1;
                match entry.event.result.as_ref().and_then(Value::as_bool) {
                    Some(true) => counters.verify_success += 1,
                    Some(false) => counters.verify_fail += 1,
                    None => {}
                }
            }
        }
        stats
    }
}

/// Best-effort append for the orchestrator: disabled or failing global
/// memory never fails a cycle.
pub fn append_learn_to_global(record: &GlobalLearnRecord, clock: &dyn Clock) {
    let Some(store) = GlobalStore::open() else {
        return;
    };
    if let Err(err) = store.append_learn(record, clock) {
        warn!(%err, "global memory append failed");
    }
}

/// Local stats with global counters folded in additively.
#[must_use]
pub fn merged_smell_action_stats(
    local: &LearningStore,
    global: Option<&GlobalStore>,
) -> BTreeMap<String, OutcomeCounters> {
    let mut merged = local.aggregate_by_smell_action();
    if let Some(store) = global {
        for (key, counters) in store.aggregate_by_smell_action() {
            merged.entry(key).or_default().add(&counters);
        }
    }
    merged
}
