//! Pending plan persistence for team mode.
//!
//! Team mode stages a plan to `.mend/pending_plan.json` instead of applying
//! it. Reviewers edit per-operation decisions (or the CLI flags do), then a
//! second invocation loads the approved subset. Plans expire; a stale file
//! cannot be replayed later, and confirmation flows that carry a token must
//! present the matching one.

use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use mend_plan::{Clock, Operation};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{GateError, MEND_DIR};

/// Staged plan file under `.mend/`.
pub const PENDING_PLAN_FILE: &str = "pending_plan.json";
/// Lifetime of a staged plan when none is given.
pub const DEFAULT_PENDING_TTL_SECS: i64 = 600;
/// Shortest accepted lifetime.
pub const MIN_PENDING_TTL_SECS: i64 = 60;

const PENDING_STATUS: &str = "pending_confirmation";

/// Reviewer decision on one staged operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeamDecision {
    /// Not decided yet
    #[default]
    Pending,
    /// Apply this operation
    Approve,
    /// Drop this operation
    Reject,
}

/// One staged operation with its decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    /// The operation as planned
    pub operation: Operation,
    /// Reviewer decision, pending until edited
    #[serde(default)]
    pub team_decision: TeamDecision,
}

/// A staged plan awaiting confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingPlan {
    /// Always `pending_confirmation` while staged
    pub status: String,
    /// Random confirmation token
    pub token: String,
    /// Staging time, epoch seconds
    pub created_ts: i64,
    /// Expiry time, epoch seconds
    pub expires_ts: i64,
    /// Operations with their decisions
    pub operations: Vec<PendingOperation>,
}

impl PendingPlan {
    /// Operations marked approve, in plan order.
    #[must_use]
    pub fn approved_operations(&self) -> Vec<Operation> {
        self.operations
            .iter()
            .filter(|entry| entry.team_decision == TeamDecision::Approve)
            .map(|entry| entry.operation.clone())
            .collect()
    }
}

fn new_token() -> String {
    use rand::RngCore;

    let mut buf = [0u8; 8];
    rand::rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Store for the staged plan of one project.
#[derive(Debug, Clone)]
pub struct PendingStore {
    path: PathBuf,
}

impl PendingStore {
    /// Store for the given project root.
    #[must_use]
    pub fn new(root: &Path) -> Self {
        PendingStore {
            path: root.join(MEND_DIR).join(PENDING_PLAN_FILE),
        }
    }

    /// Backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a staged plan exists on disk.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.path.is_file()
    }

    /// Stage a plan with every decision pending and a fresh token.
    pub fn save(
        &self,
        operations: &[Operation],
        ttl_secs: Option<i64>,
        clock: &dyn Clock,
    ) -> Result<PendingPlan, GateError> {
        let now = clock.now_ts();
        let ttl = ttl_secs
            .unwrap_or(DEFAULT_PENDING_TTL_SECS)
            .max(MIN_PENDING_TTL_SECS);
        let plan = PendingPlan {
            status: PENDING_STATUS.to_string(),
            token: new_token(),
            created_ts: now,
            expires_ts: now + ttl,
            operations: operations
                .iter()
                .map(|op| PendingOperation {
                    operation: op.clone(),
                    team_decision: TeamDecision::Pending,
                })
                .collect(),
        };
        self.write(&plan)?;
        Ok(plan)
    }

    fn write(&self, plan: &PendingPlan) -> Result<(), GateError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| GateError::io(parent, e))?;
        }
        let mut body = serde_json::to_string_pretty(plan)?;
        body.push('\n');
        fs::write(&self.path, body).map_err(|e| GateError::io(&self.path, e))
    }

    /// Load the staged plan. Missing or unreadable files both surface as
    /// [`GateError::NoPendingPlan`].
    pub fn load(&self) -> Result<PendingPlan, GateError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(GateError::NoPendingPlan);
            }
            Err(err) => return Err(GateError::io(&self.path, err)),
        };
        match serde_json::from_str(&raw) {
            Ok(plan) => Ok(plan),
            Err(err) => {
                warn!(file = %self.path.display(), %err, "pending plan unreadable");
                Err(GateError::NoPendingPlan)
            }
        }
    }

    /// Apply 1-based approve and reject index sets to the staged plan.
    /// Out-of-range indexes were rejected during parsing and are ignored
    /// here.
    pub fn update_decisions(
        &self,
        approve: &BTreeSet<usize>,
        reject: &BTreeSet<usize>,
    ) -> Result<PendingPlan, GateError> {
        let mut plan = self.load()?;
        for &idx in approve {
            if idx == 0 {
                continue;
            }
            if let Some(entry) = plan.operations.get_mut(idx - 1) {
                entry.team_decision = TeamDecision::Approve;
            }
        }
        for &idx in reject {
            if idx == 0 {
                continue;
            }
            if let Some(entry) = plan.operations.get_mut(idx - 1) {
                entry.team_decision = TeamDecision::Reject;
            }
        }
        self.write(&plan)?;
        Ok(plan)
    }

    /// Load the approved subset of the staged plan.
    ///
    /// Expiry is always enforced. The token is compared only when the caller
    /// carries one; the CLI's apply-approved path does not.
    pub fn load_approved(
        &self,
        token: Option<&str>,
        clock: &dyn Clock,
    ) -> Result<(Vec<Operation>, PendingPlan), GateError> {
        let plan = self.load()?;
        if let Some(supplied) = token {
            if supplied != plan.token {
                return Err(GateError::TokenMismatch);
            }
        }
        if clock.now_ts() > plan.expires_ts {
            return Err(GateError::PendingExpired);
        }
        Ok((plan.approved_operations(), plan))
    }

    /// Remove the staged plan, tolerating its absence.
    pub fn clear(&self) -> Result<(), GateError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(GateError::io(&self.path, err)),
        }
    }

    /// After a rollback, flip approved decisions back to pending so the
    /// same plan is not auto-replayed. No staged plan is a no-op.
    pub fn reset_approvals_after_rollback(&self) -> Result<(), GateError> {
        let mut plan = match self.load() {
            Ok(plan) => plan,
            Err(GateError::NoPendingPlan) => return Ok(()),
            Err(err) => return Err(err),
        };
        let mut changed = false;
        for entry in &mut plan.operations {
            if entry.team_decision == TeamDecision::Approve {
                entry.team_decision = TeamDecision::Pending;
                changed = true;
            }
        }
        if changed {
            self.write(&plan)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mend_plan::{FixedClock, OperationKind};
    use pretty_assertions::assert_eq;

    fn ops() -> Vec<Operation> {
        vec![
            Operation::new(OperationKind::RemoveUnusedImport, "a.py"),
            Operation::new(OperationKind::SplitModule, "b.py"),
        ]
    }

    #[test]
    fn save_stages_with_token_and_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let store = PendingStore::new(dir.path());
        let clock = FixedClock(1_000);
        let plan = store.save(&ops(), None, &clock).unwrap();

        assert_eq!(plan.status, "pending_confirmation");
        assert_eq!(plan.token.len(), 16);
        assert!(plan.token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(plan.created_ts, 1_000);
        assert_eq!(plan.expires_ts, 1_000 + DEFAULT_PENDING_TTL_SECS);
        assert!(plan
            .operations
            .iter()
            .all(|entry| entry.team_decision == TeamDecision::Pending));
        assert!(store.has_pending());

        let loaded = store.load().unwrap();
        assert_eq!(loaded, plan);
    }

    #[test]
    fn ttl_has_a_sixty_second_floor() {
        let dir = tempfile::tempdir().unwrap();
        let store = PendingStore::new(dir.path());
        let plan = store.save(&ops(), Some(5), &FixedClock(0)).unwrap();
        assert_eq!(plan.expires_ts, MIN_PENDING_TTL_SECS);
    }

    #[test]
    fn update_decisions_and_load_approved() {
        let dir = tempfile::tempdir().unwrap();
        let store = PendingStore::new(dir.path());
        let clock = FixedClock(1_000);
        store.save(&ops(), None, &clock).unwrap();

        let approve: BTreeSet<usize> = [1].into();
        let reject: BTreeSet<usize> = [2].into();
        let plan = store.update_decisions(&approve, &reject).unwrap();
        assert_eq!(plan.operations[0].team_decision, TeamDecision::Approve);
        assert_eq!(plan.operations[1].team_decision, TeamDecision::Reject);

        let (approved, _) = store.load_approved(None, &clock).unwrap();
        assert_eq!(approved.len(), 1);
        assert_eq!(approved[0].target_file(), Path::new("a.py"));
    }

    #[test]
    fn token_is_checked_only_when_supplied() {
        let dir = tempfile::tempdir().unwrap();
        let store = PendingStore::new(dir.path());
        let clock = FixedClock(1_000);
        let plan = store.save(&ops(), None, &clock).unwrap();

        let err = store.load_approved(Some("deadbeefdeadbeef"), &clock).unwrap_err();
        assert!(matches!(err, GateError::TokenMismatch));

        assert!(store.load_approved(Some(&plan.token), &clock).is_ok());
        assert!(store.load_approved(None, &clock).is_ok());
    }

    #[test]
    fn expired_plan_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = PendingStore::new(dir.path());
        store.save(&ops(), None, &FixedClock(1_000)).unwrap();

        let late = FixedClock(1_000 + DEFAULT_PENDING_TTL_SECS + 1);
        let err = store.load_approved(None, &late).unwrap_err();
        assert!(matches!(err, GateError::PendingExpired));
    }

    #[test]
    fn missing_plan_is_no_pending_plan() {
        let dir = tempfile::tempdir().unwrap();
        let store = PendingStore::new(dir.path());
        assert!(!store.has_pending());
        assert!(matches!(store.load(), Err(GateError::NoPendingPlan)));
    }

    #[test]
    fn corrupt_plan_is_no_pending_plan() {
        let dir = tempfile::tempdir().unwrap();
        let mend = dir.path().join(MEND_DIR);
        fs::create_dir_all(&mend).unwrap();
        fs::write(mend.join(PENDING_PLAN_FILE), "{broken").unwrap();

        let store = PendingStore::new(dir.path());
        assert!(matches!(store.load(), Err(GateError::NoPendingPlan)));
    }

    #[test]
    fn reset_flips_approvals_back_to_pending() {
        let dir = tempfile::tempdir().unwrap();
        let store = PendingStore::new(dir.path());
        store.save(&ops(), None, &FixedClock(0)).unwrap();
        store
            .update_decisions(&[1, 2].into(), &BTreeSet::new())
            .unwrap();

        store.reset_approvals_after_rollback().unwrap();
        let plan = store.load().unwrap();
        assert!(plan
            .operations
            .iter()
            .all(|entry| entry.team_decision == TeamDecision::Pending));

        store.clear().unwrap();
        assert!(!store.has_pending());
        store.reset_approvals_after_rollback().unwrap();
    }
}
