//! Session and campaign memory.
//!
//! Persists which operation keys a session approved or rejected, plus
//! campaign-wide signals that outlive any one run: rejected keys and a
//! rolling window of verify failures. Later planning passes skip keys the
//! campaign has already turned down or repeatedly failed to verify.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use mend_plan::Operation;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{GateError, MEND_DIR};

/// Memory file under `.mend/`.
pub const SESSION_MEMORY_FILE: &str = "session_memory.json";
/// Campaign-wide cap on remembered rejected keys.
pub const CAMPAIGN_REJECTED_MAX: usize = 100;
/// Rolling window of verify-failure entries, duplicates included.
pub const CAMPAIGN_VERIFY_FAIL_MAX: usize = 20;
/// Rolling window of verify-success entries, duplicates included.
pub const CAMPAIGN_VERIFY_SUCCESS_MAX: usize = 100;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SessionEntry {
    #[serde(default)]
    approved_keys: BTreeSet<String>,
    #[serde(default)]
    rejected_keys: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CampaignEntry {
    #[serde(default)]
    rejected_keys: Vec<String>,
    #[serde(default)]
    verify_fail_keys: Vec<String>,
    #[serde(default)]
    verify_success_keys: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SessionData {
    #[serde(default)]
    sessions: BTreeMap<String, SessionEntry>,
    #[serde(default)]
    campaign: CampaignEntry,
}

/// Store for session decisions and campaign history.
#[derive(Debug, Clone)]
pub struct SessionMemory {
    path: PathBuf,
}

impl SessionMemory {
    /// Memory for the given project root.
    #[must_use]
    pub fn new(root: &Path) -> Self {
        SessionMemory {
            path: root.join(MEND_DIR).join(SESSION_MEMORY_FILE),
        }
    }

    /// Backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> SessionData {
        let Ok(raw) = fs::read_to_string(&self.path) else {
            return SessionData::default();
        };
        match serde_json::from_str(&raw) {
            Ok(data) => data,
            Err(err) => {
                warn!(file = %self.path.display(), %err, "session memory unreadable, starting fresh");
                SessionData::default()
            }
        }
    }

    fn save(&self, data: &SessionData) -> Result<(), GateError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| GateError::io(parent, e))?;
        }
        let mut body = serde_json::to_string_pretty(data)?;
        body.push('\n');
        fs::write(&self.path, body).map_err(|e| GateError::io(&self.path, e))
    }

    /// Keys this session already rejected.
    #[must_use]
    pub fn rejected_keys(&self, session_id: &str) -> BTreeSet<String> {
        self.load()
            .sessions
            .get(session_id)
            .map(|entry| entry.rejected_keys.clone())
            .unwrap_or_default()
    }

    /// Record a session's approved and rejected operations.
    ///
    /// Rejections also feed the campaign list, which keeps at most
    /// [`CAMPAIGN_REJECTED_MAX`] keys in sorted order.
    pub fn record(
        &self,
        session_id: &str,
        approved: &[Operation],
        rejected: &[Operation],
    ) -> Result<(), GateError> {
        let mut data = self.load();
        let entry = data.sessions.entry(session_id.to_string()).or_default();
        entry.approved_keys.extend(approved.iter().map(Operation::key));
        entry.rejected_keys.extend(rejected.iter().map(Operation::key));

        let mut campaign_rejected: BTreeSet<String> =
            data.campaign.rejected_keys.iter().cloned().collect();
        campaign_rejected.extend(rejected.iter().map(Operation::key));
        let mut sorted: Vec<String> = campaign_rejected.into_iter().collect();
        let keep_from = sorted.len().saturating_sub(CAMPAIGN_REJECTED_MAX);
        data.campaign.rejected_keys = sorted.split_off(keep_from);

        self.save(&data)
    }

    /// Append one verify-failure entry per operation. The window keeps the
    /// newest [`CAMPAIGN_VERIFY_FAIL_MAX`] entries, duplicates included, so
    /// a key rolls off once it stops failing.
    pub fn record_verify_failure(&self, failed: &[Operation]) -> Result<(), GateError> {
        if failed.is_empty() {
            return Ok(());
        }
        let mut data = self.load();
        data.campaign
            .verify_fail_keys
            .extend(failed.iter().map(Operation::key));
        let overflow = data
            .campaign
            .verify_fail_keys
            .len()
            .saturating_sub(CAMPAIGN_VERIFY_FAIL_MAX);
        if overflow > 0 {
            data.campaign.verify_fail_keys.drain(..overflow);
        }
        self.save(&data)
    }

    /// Append one verify-success entry per operation, windowed like the
    /// failure list but with a longer horizon so promotion evidence
    /// accumulates across runs.
    pub fn record_verify_success(&self, succeeded: &[Operation]) -> Result<(), GateError> {
        if succeeded.is_empty() {
            return Ok(());
        }
        let mut data = self.load();
        data.campaign
            .verify_success_keys
            .extend(succeeded.iter().map(Operation::key));
        let overflow = data
            .campaign
            .verify_success_keys
            .len()
            .saturating_sub(CAMPAIGN_VERIFY_SUCCESS_MAX);
        if overflow > 0 {
            data.campaign.verify_success_keys.drain(..overflow);
        }
        self.save(&data)
    }

    /// Occurrence counts inside the verify-failure window.
    #[must_use]
    pub fn verify_fail_counts(&self) -> HashMap<String, usize> {
        let data = self.load();
        let mut counts = HashMap::new();
        for key in &data.campaign.verify_fail_keys {
            *counts.entry(key.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Occurrence counts inside the verify-success window.
    #[must_use]
    pub fn verify_success_counts(&self) -> HashMap<String, usize> {
        let data = self.load();
        let mut counts = HashMap::new();
        for key in &data.campaign.verify_success_keys {
            *counts.entry(key.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Keys that verified successfully at least `min_success` times, the
    /// raw material for a whitelist draft.
    #[must_use]
    pub fn campaign_whitelist_candidates(&self, min_success: usize) -> BTreeSet<String> {
        let floor = min_success.max(1);
        self.verify_success_counts()
            .into_iter()
            .filter(|(_, n)| *n >= floor)
            .map(|(k, _)| k)
            .collect()
    }

    /// Keys future plans should skip: campaign rejections plus any key that
    /// failed verify at least twice within the window.
    #[must_use]
    pub fn campaign_keys_to_skip(&self) -> BTreeSet<String> {
        let data = self.load();
        let mut skip: BTreeSet<String> = data.campaign.rejected_keys.iter().cloned().collect();
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for key in &data.campaign.verify_fail_keys {
            *counts.entry(key.as_str()).or_insert(0) += 1;
        }
        skip.extend(
            counts
                .into_iter()
                .filter(|(_, n)| *n >= 2)
                .map(|(k, _)| k.to_string()),
        );
        skip
    }
}
