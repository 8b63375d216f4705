//! Append-only event log.
//!
//! One record shape for the whole run history: what stage ran, what went in,
//! what came out, how it ended. The log is a rolling window; payloads are
//! normalized so an oversized diff or traceback cannot bloat the file.

use std::fs;
use std::path::{Path, PathBuf};

use mend_gate::MEND_DIR;
use mend_plan::Clock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::MemoryError;

/// Event log file under `.mend/`.
pub const EVENTS_FILE: &str = "events.json";
/// Rolling window size.
pub const MAX_EVENTS: usize = 500;

const MAX_STRING_CHARS: usize = 2000;

/// Stage or source of one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Project scan
    Scan,
    /// Issue diagnosis
    Diagnose,
    /// Plan construction
    Plan,
    /// Patch application
    Patch,
    /// Verification run
    Verify,
    /// Learning outcome
    Learn,
    /// Manual feedback
    Feedback,
}

/// Single event in the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Stage or source
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Normalized input payload
    pub input: Value,
    /// Normalized output payload
    pub output: Value,
    /// Ending: bool for gates, string for feedback, absent when unknown
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Epoch seconds
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct EventLog {
    #[serde(default)]
    events: Vec<Event>,
}

/// Truncate long strings recursively so payloads stay log-sized.
#[must_use]
pub fn json_safe(value: Value) -> Value {
    match value {
        Value::String(s) => {
            if s.chars().count() > MAX_STRING_CHARS {
                let mut truncated: String = s.chars().take(MAX_STRING_CHARS).collect();
                truncated.push_str("...");
                Value::String(truncated)
            } else {
                Value::String(s)
            }
        }
        Value::Array(items) => Value::Array(items.into_iter().map(json_safe).collect()),
        Value::Object(map) => {
            Value::Object(map.into_iter().map(|(k, v)| (k, json_safe(v))).collect())
        }
        other => other,
    }
}

/// Append-only store over one events file.
#[derive(Debug, Clone)]
pub struct EventStore {
    path: PathBuf,
}

impl EventStore {
    /// Project-local log under `.mend/`.
    #[must_use]
    pub fn new(root: &Path) -> Self {
        EventStore {
            path: root.join(MEND_DIR).join(EVENTS_FILE),
        }
    }

    /// Store over an explicit file, for shared logs outside a project.
    #[must_use]
    pub fn at_path(path: PathBuf) -> Self {
        EventStore { path }
    }

    /// Backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> EventLog {
        let Ok(raw) = fs::read_to_string(&self.path) else {
            return EventLog::default();
        };
        match serde_json::from_str(&raw) {
            Ok(log) => log,
            Err(err) => {
                warn!(file = %self.path.display(), %err, "event log unreadable, starting fresh");
                EventLog::default()
            }
        }
    }

    fn save(&self, log: &mut EventLog) -> Result<(), MemoryError> {
        let overflow = log.events.len().saturating_sub(MAX_EVENTS);
        if overflow > 0 {
            log.events.drain(..overflow);
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| MemoryError::io(parent, e))?;
        }
        let mut body = serde_json::to_string_pretty(log)?;
        body.push('\n');
        fs::write(&self.path, body).map_err(|e| MemoryError::io(&self.path, e))
    }

    /// Append one event, normalizing payloads and trimming the window.
    pub fn append(
        &self,
        kind: EventKind,
        input: Value,
        output: Value,
        result: Option<Value>,
        clock: &dyn Clock,
    ) -> Result<(), MemoryError> {
        let mut log = self.load();
        log.events.push(Event {
            kind,
            input: json_safe(input),
            output: json_safe(output),
            result,
            timestamp: clock.now_ts(),
        });
        self.save(&mut log)
    }

    /// Snapshot of the window.
    #[must_use]
    pub fn all(&self) -> Vec<Event> {
        self.load().events
    }

    /// Events of one kind, oldest first.
    #[must_use]
    pub fn by_kind(&self, kind: EventKind) -> Vec<Event> {
        self.load()
            .events
            .into_iter()
            .filter(|e| e.kind == kind)
            .collect()
    }
}
