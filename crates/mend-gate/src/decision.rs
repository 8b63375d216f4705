//! Hard decision gate.
//!
//! Reconciles human/team approval and the critic verdict into the subset of
//! operations that may actually execute. The gate never mutates operations;
//! it pairs each with a [`Decision`] and partitions.

use std::collections::BTreeSet;
use std::fmt::{self, Display, Formatter};

use indexmap::IndexMap;
use mend_plan::{DecisionSummary, Operation, OperationKind};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::GateError;

/// Human/team approval state for one operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    /// May execute, subject to the critic verdict
    #[default]
    Approved,
    /// Explicitly refused
    Rejected,
    /// Awaiting an out-of-band decision
    Pending,
}

impl Display for ApprovalState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ApprovalState::Approved => "approved",
            ApprovalState::Rejected => "rejected",
            ApprovalState::Pending => "pending",
        })
    }
}

/// Critic verdict over one operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriticVerdict {
    /// No objection
    #[default]
    Allow,
    /// Wants human eyes but does not block
    Review,
    /// Blocks execution unless the team overrides
    Deny,
}

impl Display for CriticVerdict {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CriticVerdict::Allow => "allow",
            CriticVerdict::Review => "review",
            CriticVerdict::Deny => "deny",
        })
    }
}

/// Which actor produced a decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    /// Derived by the policy engine
    #[default]
    Policy,
    /// An interactive or index-based human choice
    Human,
    /// The durable team-approval flow
    Team,
}

impl Display for DecisionSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DecisionSource::Policy => "policy",
            DecisionSource::Human => "human",
            DecisionSource::Team => "team",
        })
    }
}

/// The reviewed decision attached to one operation.
///
/// Defaults to approved/allow/policy, matching an unreviewed plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// Approval state
    #[serde(default)]
    pub approval_state: ApprovalState,
    /// Critic verdict
    #[serde(default)]
    pub critic_verdict: CriticVerdict,
    /// Deciding actor
    #[serde(default)]
    pub source: DecisionSource,
    /// Why a rejection happened, when one did
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
}

impl Decision {
    /// An explicit approval from the given actor
    #[must_use]
    pub fn approved_by(source: DecisionSource) -> Self {
        Decision {
            source,
            ..Decision::default()
        }
    }

    /// An explicit rejection with attribution
    #[must_use]
    pub fn rejected_by(source: DecisionSource, reason: impl Into<String>) -> Self {
        Decision {
            approval_state: ApprovalState::Rejected,
            source,
            rejection_reason: Some(reason.into()),
            ..Decision::default()
        }
    }

    /// Whether this decision approves execution
    #[inline]
    #[must_use]
    pub fn is_approved(&self) -> bool {
        self.approval_state == ApprovalState::Approved
    }

    /// Whether this decision explicitly rejects
    #[inline]
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        self.approval_state == ApprovalState::Rejected
    }
}

/// One operation the gate refused, with attribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedDecision {
    /// Target of the refused operation
    pub target_file: String,
    /// Kind of the refused operation
    pub kind: OperationKind,
    /// Approval state at refusal time
    pub approval_state: ApprovalState,
    /// Critic verdict at refusal time
    pub critic_verdict: CriticVerdict,
    /// Deciding actor
    pub source: DecisionSource,
    /// Machine-readable reason, e.g. `approval_state=rejected`
    pub reason: String,
}

/// What the hard gate produced.
#[derive(Debug, Clone, Default)]
pub struct DecisionOutcome {
    /// Operations cleared for execution, plan order preserved
    pub executable: Vec<Operation>,
    /// Refused operations with attribution
    pub skipped: Vec<SkippedDecision>,
}

impl DecisionOutcome {
    /// Target paths of refused operations, in refusal order
    #[must_use]
    pub fn skipped_files(&self) -> Vec<String> {
        self.skipped
            .iter()
            .filter(|s| !s.target_file.is_empty())
            .map(|s| s.target_file.clone())
            .collect()
    }

    /// Ordered target → reason map for the report
    #[must_use]
    pub fn skipped_reasons(&self) -> IndexMap<String, String> {
        let mut reasons = IndexMap::new();
        for skip in &self.skipped {
            if !skip.target_file.is_empty() {
                reasons.insert(skip.target_file.clone(), skip.reason.clone());
            }
        }
        reasons
    }

    /// Per-layer blocked counts for the report
    #[must_use]
    pub fn summary(&self) -> DecisionSummary {
        let mut summary = DecisionSummary::default();
        for skip in &self.skipped {
            if skip.reason.starts_with("critic_verdict=") {
                summary.blocked_by_critic += 1;
            } else if matches!(skip.source, DecisionSource::Human | DecisionSource::Team) {
                summary.blocked_by_human += 1;
            } else {
                summary.blocked_by_policy += 1;
            }
        }
        summary
    }
}

/// Partition operations into executable and skipped.
///
/// An operation executes iff it is approved and the critic does not deny;
/// with `team_override` set, a team-sourced approval bypasses the critic.
/// Missing decisions default to approved/allow, matching an unreviewed plan.
#[must_use]
pub fn decide(operations: &[Operation], decisions: &[Decision], team_override: bool) -> DecisionOutcome {
    let mut outcome = DecisionOutcome::default();
    for (i, op) in operations.iter().enumerate() {
        let decision = decisions.get(i).cloned().unwrap_or_default();
        let reason = if !decision.is_approved() {
            Some(format!("approval_state={}", decision.approval_state))
        } else if team_override && decision.source == DecisionSource::Team {
            None
        } else if decision.critic_verdict == CriticVerdict::Deny {
            Some(format!("critic_verdict={}", decision.critic_verdict))
        } else {
            None
        };
        match reason {
            Some(reason) => {
                debug!(
                    file = %op.target_file().display(),
                    kind = %op.kind(),
                    %reason,
                    "operation blocked by decision gate"
                );
                outcome.skipped.push(SkippedDecision {
                    target_file: op.target_file().display().to_string(),
                    kind: op.kind(),
                    approval_state: decision.approval_state,
                    critic_verdict: decision.critic_verdict,
                    source: decision.source,
                    reason,
                });
            }
            None => outcome.executable.push(op.clone()),
        }
    }
    outcome
}

/// Parse 1-based operation indexes from a CSV flag value.
///
/// # Errors
///
/// [`GateError::Selection`] for non-integer parts or out-of-range indexes.
pub fn parse_operation_indexes(
    raw: Option<&str>,
    total_ops: usize,
    flag_name: &str,
) -> Result<BTreeSet<usize>, GateError> {
    let Some(raw) = raw else {
        return Ok(BTreeSet::new());
    };
    let mut out = BTreeSet::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if !part.chars().all(|c| c.is_ascii_digit()) {
            return Err(GateError::Selection(format!(
                "Invalid {flag_name} value '{part}': expected integers"
            )));
        }
        let idx: usize = part.parse().map_err(|_| {
            GateError::Selection(format!("Invalid {flag_name} value '{part}': expected integers"))
        })?;
        if idx < 1 || idx > total_ops {
            return Err(GateError::Selection(format!(
                "Invalid {flag_name} index {idx}: expected range 1..{total_ops}"
            )));
        }
        out.insert(idx);
    }
    Ok(out)
}

/// Turn explicit approve/reject index selections into per-operation decisions.
///
/// With neither flag given, every operation keeps the default decision. A
/// non-empty approve set implicitly rejects everything outside it.
///
/// # Errors
///
/// [`GateError::Selection`] for unparsable flags or overlapping selections.
pub fn select_by_indexes(
    total_ops: usize,
    approve_ops: Option<&str>,
    reject_ops: Option<&str>,
) -> Result<Vec<Decision>, GateError> {
    let approve_idx = parse_operation_indexes(approve_ops, total_ops, "--approve")?;
    let reject_idx = parse_operation_indexes(reject_ops, total_ops, "--reject")?;
    let overlap: Vec<usize> = approve_idx.intersection(&reject_idx).copied().collect();
    if !overlap.is_empty() {
        return Err(GateError::Selection(format!(
            "Conflicting indexes in --approve and --reject: {overlap:?}"
        )));
    }
    if approve_idx.is_empty() && reject_idx.is_empty() {
        return Ok(vec![Decision::default(); total_ops]);
    }
    let mut decisions = Vec::with_capacity(total_ops);
    for idx in 1..=total_ops {
        if reject_idx.contains(&idx) {
            decisions.push(Decision::rejected_by(DecisionSource::Human, "rejected_by_index"));
        } else if !approve_idx.is_empty() && !approve_idx.contains(&idx) {
            decisions.push(Decision::rejected_by(
                DecisionSource::Human,
                "not_in_approved_set",
            ));
        } else {
            decisions.push(Decision::approved_by(DecisionSource::Human));
        }
    }
    Ok(decisions)
}
