//! Policy engine.
//!
//! Evaluates each proposed operation against the runtime mode's limits and
//! produces an explainability payload alongside every decision. Three layers
//! stack: structural guards (file patterns, op/file caps, API surface), the
//! risk tier of the operation kind, and campaign history (weak pairs,
//! repeated verify failures, whitelists).

use std::collections::{BTreeSet, HashMap};
use std::env;
use std::fmt::{self, Display, Formatter};
use std::fs;
use std::path::Path;

use mend_plan::{Operation, OperationKind};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::session::SessionMemory;
use crate::MEND_DIR;

/// Environment override for the runtime mode.
pub const MODE_ENV: &str = "MEND_FIX_MODE";
/// Environment override for the operation cap.
pub const MAX_OPS_ENV: &str = "MEND_FIX_MAX_OPS";
/// Environment override for the distinct-file cap.
pub const MAX_FILES_ENV: &str = "MEND_FIX_MAX_FILES";
/// Environment override for the highest auto-applied risk tier.
pub const RISK_ENV: &str = "MEND_FIX_RISK";
/// Environment override for comma-separated deny globs.
pub const DENY_ENV: &str = "MEND_FIX_DENY";
/// Environment toggle allowing operations on test files.
pub const ALLOW_TESTS_ENV: &str = "MEND_FIX_ALLOW_TESTS";
/// Environment toggle for the API-surface guard.
pub const API_GUARD_ENV: &str = "MEND_FIX_API_GUARD";

/// Whitelist consulted for known-safe operations, under `.mend/`.
pub const WHITELIST_FILE: &str = "operation_whitelist.json";

/// Glob patterns marking likely API-surface files.
const API_SURFACE_PATTERNS: [&str; 3] = ["*api*.py", "*__init__.py", "api.py"];

/// (smell, action) pairs with a poor verify track record.
const WEAK_PAIRS: [(&str, &str); 6] = [
    ("hub", "split_module"),
    ("bottleneck", "introduce_facade"),
    ("long_function", "extract_nested_function"),
    ("long_function", "extract_block_to_helper"),
    ("deep_nesting", "extract_block_to_helper"),
    ("god_class", "extract_class"),
];

const ROLLBACK_PLAN: &str = "Automatic rollback is triggered on verify failure.";

/// Ordered risk tier of one operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Import hygiene and stub creation
    Low,
    /// Localized extraction
    Medium,
    /// Module-level restructuring
    High,
}

impl RiskLevel {
    fn from_name(raw: &str) -> Option<RiskLevel> {
        match raw.trim().to_lowercase().as_str() {
            "low" => Some(RiskLevel::Low),
            "medium" => Some(RiskLevel::Medium),
            "high" => Some(RiskLevel::High),
            _ => None,
        }
    }
}

impl Display for RiskLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        })
    }
}

/// Runtime mode governing how much the engine may do unattended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    /// Propose everything, apply nothing without explicit selection
    #[default]
    Assist,
    /// Auto-apply low risk, queue the rest for review
    Hybrid,
    /// Apply up to medium risk unattended
    Auto,
}

impl AgentMode {
    /// Parse a mode name, falling back to assist for anything unknown.
    #[must_use]
    pub fn parse_lenient(raw: &str) -> AgentMode {
        match raw.trim().to_lowercase().as_str() {
            "hybrid" => AgentMode::Hybrid,
            "auto" => AgentMode::Auto,
            _ => AgentMode::Assist,
        }
    }
}

impl Display for AgentMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AgentMode::Assist => "assist",
            AgentMode::Hybrid => "hybrid",
            AgentMode::Auto => "auto",
        })
    }
}

/// What the policy engine says about one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyDecision {
    /// Apply without further review
    Allow,
    /// Needs a human decision before applying
    Review,
    /// Must not apply in this mode
    Deny,
}

impl Display for PolicyDecision {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PolicyDecision::Allow => "allow",
            PolicyDecision::Review => "review",
            PolicyDecision::Deny => "deny",
        })
    }
}

/// Risk tier of an operation kind.
#[must_use]
pub fn estimate_risk(kind: OperationKind) -> RiskLevel {
    match kind {
        OperationKind::RemoveUnusedImport
        | OperationKind::RemoveCyclicImport
        | OperationKind::FixImport
        | OperationKind::CreateModuleStub => RiskLevel::Low,
        OperationKind::SplitModule | OperationKind::ExtractClass => RiskLevel::High,
        _ => RiskLevel::Medium,
    }
}

fn expected_outcome(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::RemoveUnusedImport => "Unused imports are removed without changing behavior.",
        OperationKind::RemoveCyclicImport => "Cycle edge is removed and imports become acyclic.",
        OperationKind::SplitModule => {
            "Oversized module is decomposed into a focused extracted module."
        }
        OperationKind::ExtractClass => "Class responsibilities are extracted into a dedicated module.",
        OperationKind::RefactorTodo => "Code smell marker is applied as a refactoring TODO.",
        _ => "Operation is applied and verified in the patch cycle.",
    }
}

/// Whether this operation is a historically weak (smell, action) pair.
#[must_use]
pub fn is_weak_pair(op: &Operation) -> bool {
    let smell = op.smell_type().unwrap_or("");
    let kind = op.kind().as_str();
    WEAK_PAIRS.iter().any(|(s, k)| *s == smell && *k == kind)
}

/// Move weak-pair operations to the end so caps cut them first.
#[must_use]
pub fn deprioritize_weak_pairs(mut operations: Vec<Operation>) -> Vec<Operation> {
    operations.sort_by_key(|op| usize::from(is_weak_pair(op)));
    operations
}

/// Limits and guards for one runtime mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyConfig {
    mode: AgentMode,
    max_ops: usize,
    max_files: usize,
    allow_test_files: bool,
    auto_apply_max_risk: RiskLevel,
    deny_patterns: Vec<String>,
    api_breaking_guard: bool,
}

impl PolicyConfig {
    /// Built-in defaults for a mode.
    #[must_use]
    pub fn for_mode(mode: AgentMode) -> Self {
        match mode {
            AgentMode::Assist => PolicyConfig {
                mode,
                max_ops: 200,
                max_files: 100,
                allow_test_files: false,
                auto_apply_max_risk: RiskLevel::High,
                deny_patterns: Vec::new(),
                api_breaking_guard: false,
            },
            AgentMode::Hybrid => PolicyConfig {
                mode,
                max_ops: 80,
                max_files: 40,
                allow_test_files: false,
                auto_apply_max_risk: RiskLevel::Low,
                deny_patterns: Vec::new(),
                api_breaking_guard: true,
            },
            AgentMode::Auto => PolicyConfig {
                mode,
                max_ops: 120,
                max_files: 60,
                allow_test_files: false,
                auto_apply_max_risk: RiskLevel::Medium,
                deny_patterns: Vec::new(),
                api_breaking_guard: true,
            },
        }
    }

    /// Mode defaults with `MEND_FIX_*` environment overrides applied.
    #[must_use]
    pub fn from_env(mode: AgentMode) -> Self {
        PolicyConfig::for_mode(mode).with_env(&PolicyEnv::from_process())
    }

    fn with_env(mut self, env: &PolicyEnv) -> Self {
        if let Some(raw) = &env.max_ops {
            match raw.trim().parse::<usize>() {
                Ok(v) => self.max_ops = v.max(1),
                Err(_) => warn!(value = %raw, "ignoring unparsable {MAX_OPS_ENV}"),
            }
        }
        if let Some(raw) = &env.max_files {
            match raw.trim().parse::<usize>() {
                Ok(v) => self.max_files = v.max(1),
                Err(_) => warn!(value = %raw, "ignoring unparsable {MAX_FILES_ENV}"),
            }
        }
        if let Some(raw) = &env.risk {
            match RiskLevel::from_name(raw) {
                Some(risk) => self.auto_apply_max_risk = risk,
                None => warn!(value = %raw, "ignoring unknown {RISK_ENV}"),
            }
        }
        if let Some(raw) = &env.deny {
            let patterns: Vec<String> = raw
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(ToString::to_string)
                .collect();
            if !patterns.is_empty() {
                self.deny_patterns = patterns;
            }
        }
        if let Some(raw) = &env.allow_tests {
            self.allow_test_files = is_truthy(raw);
        }
        if let Some(raw) = &env.api_guard {
            self.api_breaking_guard = is_truthy(raw);
        }
        self
    }

    /// Extra deny globs on top of the environment's.
    #[must_use]
    pub fn with_deny_patterns(mut self, patterns: Vec<String>) -> Self {
        self.deny_patterns = patterns;
        self
    }

    /// Runtime mode
    #[inline]
    #[must_use]
    pub fn mode(&self) -> AgentMode {
        self.mode
    }

    /// Operation cap for one plan
    #[inline]
    #[must_use]
    pub fn max_ops(&self) -> usize {
        self.max_ops
    }

    /// Distinct-file cap for one plan
    #[inline]
    #[must_use]
    pub fn max_files(&self) -> usize {
        self.max_files
    }

    /// Highest risk tier this mode applies unattended
    #[inline]
    #[must_use]
    pub fn auto_apply_max_risk(&self) -> RiskLevel {
        self.auto_apply_max_risk
    }

    /// Whether the given risk is within the unattended tier
    #[inline]
    #[must_use]
    pub fn allows_risk(&self, risk: RiskLevel) -> bool {
        risk <= self.auto_apply_max_risk
    }

    /// Whether the target matches any configured deny glob
    #[must_use]
    pub fn matches_deny_pattern(&self, target_file: &str) -> bool {
        if self.deny_patterns.is_empty() || target_file.is_empty() {
            return false;
        }
        let path = target_file.replace('\\', "/");
        self.deny_patterns.iter().any(|p| glob_match(p, &path))
    }

    /// Whether the target looks like an API surface file
    #[must_use]
    pub fn is_api_surface_file(&self, target_file: &str) -> bool {
        if target_file.is_empty() {
            return false;
        }
        let path = target_file.replace('\\', "/");
        API_SURFACE_PATTERNS.iter().any(|p| glob_match(p, &path))
    }
}

#[derive(Debug, Clone, Default)]
struct PolicyEnv {
    max_ops: Option<String>,
    max_files: Option<String>,
    risk: Option<String>,
    deny: Option<String>,
    allow_tests: Option<String>,
    api_guard: Option<String>,
}

impl PolicyEnv {
    fn from_process() -> Self {
        PolicyEnv {
            max_ops: env::var(MAX_OPS_ENV).ok(),
            max_files: env::var(MAX_FILES_ENV).ok(),
            risk: env::var(RISK_ENV).ok(),
            deny: env::var(DENY_ENV).ok(),
            allow_tests: env::var(ALLOW_TESTS_ENV).ok(),
            api_guard: env::var(API_GUARD_ENV).ok(),
        }
    }
}

fn is_truthy(raw: &str) -> bool {
    matches!(raw.trim(), "1" | "true" | "yes")
}

/// fnmatch-style glob: `*` matches any run, `?` any single character.
fn glob_match(pattern: &str, path: &str) -> bool {
    let mut source = String::with_capacity(pattern.len() + 8);
    source.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            _ => source.push_str(&regex::escape(&ch.to_string())),
        }
    }
    source.push('$');
    Regex::new(&source).is_ok_and(|re| re.is_match(path))
}

fn is_test_file(target: &str) -> bool {
    let path = target.replace('\\', "/");
    if path.starts_with("tests/") {
        return true;
    }
    let name = path.rsplit('/').next().unwrap_or(&path);
    name.starts_with("test_") && name.ends_with(".py")
}

/// A whitelisted operation shape with its mode allowances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhitelistEntry {
    /// Operation kind name
    pub kind: String,
    /// Project-relative target the entry covers
    pub target_file: String,
    /// Smell the entry was promoted from; absent matches any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smell_type: Option<String>,
    /// Location within the target; absent matches any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Skip review in hybrid mode
    #[serde(default)]
    pub allow_in_hybrid: bool,
    /// Apply unattended in auto mode
    #[serde(default)]
    pub allow_in_auto: bool,
}

impl WhitelistEntry {
    fn covers(&self, op: &Operation) -> bool {
        self.kind == op.kind().as_str()
            && self.target_file == op.target_file().display().to_string()
            && self
                .smell_type
                .as_deref()
                .map_or(true, |s| Some(s) == op.smell_type())
            && self
                .location
                .as_deref()
                .map_or(true, |l| Some(l) == op.location())
    }

    fn allows_in(&self, mode: AgentMode) -> bool {
        match mode {
            AgentMode::Assist => true,
            AgentMode::Hybrid => self.allow_in_hybrid,
            AgentMode::Auto => self.allow_in_auto,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct WhitelistFile {
    #[serde(default)]
    operations: Vec<WhitelistEntry>,
}

fn load_whitelist(root: &Path) -> Vec<WhitelistEntry> {
    let path = root.join(MEND_DIR).join(WHITELIST_FILE);
    let Ok(raw) = fs::read_to_string(&path) else {
        return Vec::new();
    };
    match serde_json::from_str::<WhitelistFile>(&raw) {
        Ok(file) => file.operations,
        Err(err) => {
            warn!(file = %path.display(), %err, "ignoring unreadable operation whitelist");
            Vec::new()
        }
    }
}

/// Campaign history consulted during evaluation: verify-failure counts and
/// the operation whitelist.
#[derive(Debug, Clone, Default)]
pub struct PolicyHistory {
    fail_counts: HashMap<String, usize>,
    whitelist: Vec<WhitelistEntry>,
}

impl PolicyHistory {
    /// Empty history; evaluation then runs on limits and risk alone.
    #[must_use]
    pub fn new() -> Self {
        PolicyHistory::default()
    }

    /// Load both history sources from the project, tolerating absence.
    #[must_use]
    pub fn load(root: &Path) -> Self {
        PolicyHistory {
            fail_counts: SessionMemory::new(root).verify_fail_counts(),
            whitelist: load_whitelist(root),
        }
    }

    /// Record a synthetic failure count (test and planning hooks).
    #[must_use]
    pub fn with_fail_count(mut self, key: impl Into<String>, count: usize) -> Self {
        self.fail_counts.insert(key.into(), count);
        self
    }

    /// Add a whitelist entry directly.
    #[must_use]
    pub fn with_whitelist_entry(mut self, entry: WhitelistEntry) -> Self {
        self.whitelist.push(entry);
        self
    }

    fn has_repeated_failures(&self, key: &str) -> bool {
        self.fail_counts.get(key).is_some_and(|c| *c >= 2)
    }

    fn whitelist_allows(&self, op: &Operation, mode: AgentMode) -> bool {
        self.whitelist
            .iter()
            .any(|entry| entry.covers(op) && entry.allows_in(mode))
    }
}

/// Explainability payload attached to every policy decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explainability {
    /// The operation's own description, or a placeholder
    pub why: String,
    /// Estimated risk tier
    pub risk: RiskLevel,
    /// What applying the operation should achieve
    pub expected_outcome: String,
    /// How a bad outcome gets undone
    pub rollback_plan: String,
    /// The policy decision itself
    pub policy_decision: PolicyDecision,
    /// Why the policy decided that way
    pub policy_reason: String,
}

/// Result of evaluating one operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationPolicy {
    /// allow, review or deny
    pub decision: PolicyDecision,
    /// Estimated risk tier
    pub risk: RiskLevel,
    /// Reason for the decision
    pub reason: String,
    /// Full explainability payload for reports
    pub explainability: Explainability,
}

/// Report row for one policy evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRecord {
    /// 1-based position in the plan
    pub index: usize,
    /// Target path
    pub target_file: String,
    /// Operation kind
    pub kind: OperationKind,
    /// Decision taken
    pub decision: PolicyDecision,
    /// Reason for the decision
    pub reason: String,
    /// Estimated risk
    pub risk: RiskLevel,
}

/// Policy evaluation over a whole plan.
#[derive(Debug, Clone, Default)]
pub struct PolicyReview {
    /// Operations that stay in the plan, order preserved
    pub kept: Vec<Operation>,
    /// Explainability payloads aligned with `kept`
    pub explainability: Vec<Explainability>,
    /// One record per input operation, 1-based indexes
    pub records: Vec<PolicyRecord>,
}

/// Structural guards plus risk tier, in fixed precedence order.
fn core_rules(
    op: &Operation,
    config: &PolicyConfig,
    index: usize,
    seen_files: &BTreeSet<String>,
    risk: RiskLevel,
) -> (PolicyDecision, String, bool) {
    let target = op.target_file().display().to_string();
    if is_test_file(&target) && !config.allow_test_files {
        return (
            PolicyDecision::Deny,
            "test files are blocked by policy".to_string(),
            true,
        );
    }
    if config.matches_deny_pattern(&target) {
        return (
            PolicyDecision::Deny,
            format!("file matches deny pattern: {target}"),
            true,
        );
    }
    if index > config.max_ops {
        return (
            PolicyDecision::Deny,
            format!("operation limit exceeded (max_ops={})", config.max_ops),
            true,
        );
    }
    if !target.is_empty() && !seen_files.contains(&target) && seen_files.len() >= config.max_files {
        return (
            PolicyDecision::Deny,
            format!("file scope limit exceeded (max_files={})", config.max_files),
            true,
        );
    }
    if config.api_breaking_guard
        && config.is_api_surface_file(&target)
        && risk >= RiskLevel::Medium
    {
        if config.mode == AgentMode::Hybrid {
            return (
                PolicyDecision::Review,
                "API surface file requires manual approval".to_string(),
                true,
            );
        }
        return (
            PolicyDecision::Deny,
            "API surface file blocked by api_breaking_guard".to_string(),
            true,
        );
    }
    if !config.allows_risk(risk) {
        if config.mode == AgentMode::Hybrid {
            return (
                PolicyDecision::Review,
                format!("risk={risk} requires manual approval in hybrid mode"),
                false,
            );
        }
        return (
            PolicyDecision::Deny,
            format!(
                "risk={risk} exceeds auto_apply_max_risk={}",
                config.auto_apply_max_risk
            ),
            false,
        );
    }
    (PolicyDecision::Allow, "allowed by policy".to_string(), false)
}

fn weak_pair_override(op: &Operation, mode: AgentMode) -> Option<(PolicyDecision, String)> {
    if !is_weak_pair(op) {
        return None;
    }
    let smell = op.smell_type().unwrap_or("");
    let kind = op.kind().as_str();
    if mode == AgentMode::Hybrid {
        return Some((
            PolicyDecision::Review,
            format!("historically weak pair requires manual approval: {smell}|{kind}"),
        ));
    }
    Some((
        PolicyDecision::Deny,
        format!("historically weak pair blocked in auto mode: {smell}|{kind}"),
    ))
}

/// Evaluate one operation against the configured policy.
///
/// `index` is 1-based plan position; `seen_files` holds targets of already
/// kept operations. The whitelist can lift risk- and history-based blocks,
/// never structural guards.
#[must_use]
pub fn evaluate_operation(
    op: &Operation,
    config: &PolicyConfig,
    index: usize,
    seen_files: &BTreeSet<String>,
    history: &PolicyHistory,
) -> OperationPolicy {
    let risk = estimate_risk(op.kind());
    let (mut decision, mut reason, structural) = core_rules(op, config, index, seen_files, risk);

    if !structural && decision != PolicyDecision::Deny {
        if let Some((d, r)) = weak_pair_override(op, config.mode) {
            decision = d;
            reason = r;
        }
    }
    if !structural
        && decision != PolicyDecision::Deny
        && config.mode != AgentMode::Assist
        && history.has_repeated_failures(&op.key())
    {
        decision = if config.mode == AgentMode::Auto {
            PolicyDecision::Deny
        } else {
            PolicyDecision::Review
        };
        reason = format!("repeated verify failures: {}", op.key());
    }
    if !structural
        && decision != PolicyDecision::Allow
        && history.whitelist_allows(op, config.mode)
    {
        decision = PolicyDecision::Allow;
        reason = format!("whitelisted target: {}", op.target_file().display());
    }

    let explainability = Explainability {
        why: if op.description().is_empty() {
            "No description provided.".to_string()
        } else {
            op.description().to_string()
        },
        risk,
        expected_outcome: expected_outcome(op.kind()).to_string(),
        rollback_plan: ROLLBACK_PLAN.to_string(),
        policy_decision: decision,
        policy_reason: reason.clone(),
    };
    OperationPolicy {
        decision,
        risk,
        reason,
        explainability,
    }
}

/// Evaluate a whole plan, keeping what the mode permits.
///
/// Assist keeps everything; hybrid keeps allow and review; auto keeps only
/// allow. `seen_files` grows with kept operations so the file cap counts
/// real scope, not proposals.
#[must_use]
pub fn evaluate_plan(
    operations: &[Operation],
    config: &PolicyConfig,
    history: &PolicyHistory,
) -> PolicyReview {
    let mut review = PolicyReview::default();
    let mut seen_files: BTreeSet<String> = BTreeSet::new();
    for (i, op) in operations.iter().enumerate() {
        let index = i + 1;
        let result = evaluate_operation(op, config, index, &seen_files, history);
        review.records.push(PolicyRecord {
            index,
            target_file: op.target_file().display().to_string(),
            kind: op.kind(),
            decision: result.decision,
            reason: result.reason.clone(),
            risk: result.risk,
        });
        let keep = config.mode == AgentMode::Assist
            || result.decision == PolicyDecision::Allow
            || (result.decision == PolicyDecision::Review && config.mode == AgentMode::Hybrid);
        if keep {
            let target = op.target_file().display().to_string();
            if !target.is_empty() {
                seen_files.insert(target);
            }
            review.kept.push(op.clone());
            review.explainability.push(result.explainability);
        } else {
            debug!(
                file = %op.target_file().display(),
                kind = %op.kind(),
                reason = %result.reason,
                "policy dropped operation"
            );
        }
    }
    review
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    fn no_history() -> PolicyHistory {
        PolicyHistory::new()
    }

    fn eval(op: &Operation, config: &PolicyConfig) -> OperationPolicy {
        evaluate_operation(op, config, 1, &BTreeSet::new(), &no_history())
    }

    #[test]
    fn hybrid_marks_high_risk_as_review() {
        let config = PolicyConfig::for_mode(AgentMode::Hybrid);
        let op = Operation::new(OperationKind::SplitModule, "core/pipeline.py")
            .with_description("Split large module");
        let out = eval(&op, &config);
        assert_eq!(out.decision, PolicyDecision::Review);
        assert_eq!(out.risk, RiskLevel::High);
        assert!(out.reason.contains("manual approval"));
    }

    #[test]
    fn test_files_are_denied_by_default() {
        let config = PolicyConfig::for_mode(AgentMode::Auto);
        let op = Operation::new(OperationKind::RemoveUnusedImport, "tests/test_x.py");
        let out = eval(&op, &config);
        assert_eq!(out.decision, PolicyDecision::Deny);
        assert_eq!(out.reason, "test files are blocked by policy");

        let by_name = Operation::new(OperationKind::RemoveUnusedImport, "pkg/test_api.py");
        assert_eq!(eval(&by_name, &config).decision, PolicyDecision::Deny);
    }

    #[test]
    fn allow_tests_env_lifts_the_block() {
        let env = PolicyEnv {
            allow_tests: Some("1".into()),
            ..PolicyEnv::default()
        };
        let config = PolicyConfig::for_mode(AgentMode::Auto).with_env(&env);
        let op = Operation::new(OperationKind::RemoveUnusedImport, "tests/test_x.py");
        assert_eq!(eval(&op, &config).decision, PolicyDecision::Allow);
    }

    #[test]
    fn operation_limit_denies_past_the_cap() {
        let env = PolicyEnv {
            max_ops: Some("2".into()),
            ..PolicyEnv::default()
        };
        let config = PolicyConfig::for_mode(AgentMode::Auto).with_env(&env);
        let op = Operation::new(OperationKind::RemoveUnusedImport, "foo.py");
        let out = evaluate_operation(&op, &config, 3, &BTreeSet::new(), &no_history());
        assert_eq!(out.decision, PolicyDecision::Deny);
        assert_eq!(out.reason, "operation limit exceeded (max_ops=2)");
    }

    #[test]
    fn file_scope_limit_denies_new_files() {
        let env = PolicyEnv {
            max_files: Some("2".into()),
            ..PolicyEnv::default()
        };
        let config = PolicyConfig::for_mode(AgentMode::Auto).with_env(&env);
        let seen: BTreeSet<String> = ["a.py".to_string(), "b.py".to_string()].into();
        let new_file = Operation::new(OperationKind::RemoveUnusedImport, "c.py");
        let out = evaluate_operation(&new_file, &config, 3, &seen, &no_history());
        assert_eq!(out.decision, PolicyDecision::Deny);
        assert_eq!(out.reason, "file scope limit exceeded (max_files=2)");

        let known = Operation::new(OperationKind::RemoveUnusedImport, "a.py");
        let out = evaluate_operation(&known, &config, 3, &seen, &no_history());
        assert_eq!(out.decision, PolicyDecision::Allow);
    }

    #[test]
    fn deny_patterns_block_matching_files() {
        let config = PolicyConfig::for_mode(AgentMode::Auto)
            .with_deny_patterns(vec!["*api*.py".into(), "*_internal*".into()]);
        let op = Operation::new(OperationKind::RemoveUnusedImport, "foo/api_bar.py");
        let out = eval(&op, &config);
        assert_eq!(out.decision, PolicyDecision::Deny);
        assert_eq!(out.reason, "file matches deny pattern: foo/api_bar.py");
    }

    #[test]
    fn api_guard_denies_auto_on_api_surface() {
        let config = PolicyConfig::for_mode(AgentMode::Auto);
        let env = PolicyEnv {
            risk: Some("high".into()),
            ..PolicyEnv::default()
        };
        let config = config.with_env(&env);
        let op = Operation::new(OperationKind::SplitModule, "mend/api/__init__.py");
        let out = eval(&op, &config);
        assert_eq!(out.decision, PolicyDecision::Deny);
        assert_eq!(out.reason, "API surface file blocked by api_breaking_guard");
    }

    #[test]
    fn api_guard_reviews_in_hybrid() {
        let config = PolicyConfig::for_mode(AgentMode::Hybrid);
        let op = Operation::new(OperationKind::ExtractClass, "pkg/__init__.py");
        let out = eval(&op, &config);
        assert_eq!(out.decision, PolicyDecision::Review);
        assert_eq!(out.reason, "API surface file requires manual approval");
    }

    #[test]
    fn weak_pair_denies_in_auto_and_reviews_in_hybrid() {
        let op = Operation::new(OperationKind::SplitModule, "x.py").with_smell_type("hub");
        let env = PolicyEnv {
            risk: Some("high".into()),
            ..PolicyEnv::default()
        };

        let auto = PolicyConfig::for_mode(AgentMode::Auto).with_env(&env);
        let out = eval(&op, &auto);
        assert_eq!(out.decision, PolicyDecision::Deny);
        assert_eq!(
            out.reason,
            "historically weak pair blocked in auto mode: hub|split_module"
        );

        let hybrid = PolicyConfig::for_mode(AgentMode::Hybrid);
        let out = eval(&op, &hybrid);
        assert_eq!(out.decision, PolicyDecision::Review);
        assert!(out.reason.contains("weak pair"));
    }

    #[test]
    fn extract_block_and_god_class_pairs_are_weak() {
        let env = PolicyEnv {
            risk: Some("high".into()),
            ..PolicyEnv::default()
        };
        let auto = PolicyConfig::for_mode(AgentMode::Auto).with_env(&env);

        let block = Operation::new(OperationKind::ExtractBlockToHelper, "x.py")
            .with_smell_type("deep_nesting");
        assert_eq!(eval(&block, &auto).decision, PolicyDecision::Deny);

        let class = Operation::new(OperationKind::ExtractClass, "x.py").with_smell_type("god_class");
        assert_eq!(eval(&class, &auto).decision, PolicyDecision::Deny);

        let unrelated = Operation::new(OperationKind::ExtractClass, "x.py")
            .with_smell_type("god_module");
        assert_eq!(eval(&unrelated, &auto).decision, PolicyDecision::Allow);
    }

    #[test]
    fn low_risk_allowed_in_auto() {
        let config = PolicyConfig::for_mode(AgentMode::Auto);
        let op = Operation::new(OperationKind::RemoveUnusedImport, "src/foo.py");
        let out = eval(&op, &config);
        assert_eq!(out.decision, PolicyDecision::Allow);
        assert_eq!(out.reason, "allowed by policy");
        assert_eq!(out.explainability.policy_decision, PolicyDecision::Allow);
        assert_eq!(out.explainability.why, "No description provided.");
        assert_eq!(
            out.explainability.expected_outcome,
            "Unused imports are removed without changing behavior."
        );
    }

    #[test]
    fn risk_above_cap_denies_in_auto() {
        let config = PolicyConfig::for_mode(AgentMode::Auto);
        let op = Operation::new(OperationKind::SplitModule, "big.py");
        let out = eval(&op, &config);
        assert_eq!(out.decision, PolicyDecision::Deny);
        assert_eq!(
            out.reason,
            "risk=high exceeds auto_apply_max_risk=medium"
        );
    }

    #[test]
    fn repeated_verify_failures_deny_in_auto() {
        let env = PolicyEnv {
            risk: Some("high".into()),
            ..PolicyEnv::default()
        };
        let config = PolicyConfig::for_mode(AgentMode::Auto).with_env(&env);
        let op = Operation::new(OperationKind::SplitModule, "x.py")
            .with_smell_type("god_module")
            .with_location("foo");
        let history = no_history().with_fail_count(op.key(), 2);
        let out = evaluate_operation(&op, &config, 1, &BTreeSet::new(), &history);
        assert_eq!(out.decision, PolicyDecision::Deny);
        assert!(out.reason.contains("repeated verify failures"));
    }

    #[test]
    fn whitelist_lifts_history_and_weak_pair_blocks() {
        let env = PolicyEnv {
            risk: Some("high".into()),
            ..PolicyEnv::default()
        };
        let config = PolicyConfig::for_mode(AgentMode::Auto).with_env(&env);
        let op = Operation::new(OperationKind::ExtractBlockToHelper, "mend/api/chat.py")
            .with_smell_type("deep_nesting")
            .with_location("_build_chat_context");
        let history = no_history().with_fail_count(op.key(), 2).with_whitelist_entry(
            WhitelistEntry {
                kind: "extract_block_to_helper".into(),
                target_file: "mend/api/chat.py".into(),
                smell_type: Some("deep_nesting".into()),
                location: Some("_build_chat_context".into()),
                allow_in_hybrid: true,
                allow_in_auto: true,
            },
        );
        let out = evaluate_operation(&op, &config, 1, &BTreeSet::new(), &history);
        assert_eq!(out.decision, PolicyDecision::Allow);
        assert!(out.reason.contains("whitelisted target"));
    }

    #[test]
    fn whitelist_never_lifts_structural_guards() {
        let config = PolicyConfig::for_mode(AgentMode::Auto)
            .with_deny_patterns(vec!["mend/api/*.py".into()]);
        let op = Operation::new(OperationKind::RemoveUnusedImport, "mend/api/chat.py");
        let history = no_history().with_whitelist_entry(WhitelistEntry {
            kind: "remove_unused_import".into(),
            target_file: "mend/api/chat.py".into(),
            smell_type: None,
            location: None,
            allow_in_hybrid: true,
            allow_in_auto: true,
        });
        let out = evaluate_operation(&op, &config, 1, &BTreeSet::new(), &history);
        assert_eq!(out.decision, PolicyDecision::Deny);
        assert!(out.reason.contains("deny pattern"));
    }

    #[test]
    fn assist_keeps_everything_in_plan_review() {
        let ops = vec![
            Operation::new(OperationKind::SplitModule, "a.py").with_smell_type("hub"),
            Operation::new(OperationKind::RemoveUnusedImport, "b.py"),
        ];
        let config = PolicyConfig::for_mode(AgentMode::Assist);
        let review = evaluate_plan(&ops, &config, &no_history());
        assert_eq!(review.kept.len(), 2);
        assert_eq!(review.records.len(), 2);
        assert_eq!(review.explainability.len(), 2);
    }

    #[test]
    fn auto_drops_denied_operations() {
        let ops = vec![
            Operation::new(OperationKind::RemoveUnusedImport, "a.py"),
            Operation::new(OperationKind::SplitModule, "b.py"),
            Operation::new(OperationKind::FixImport, "c.py"),
        ];
        let config = PolicyConfig::for_mode(AgentMode::Auto);
        let review = evaluate_plan(&ops, &config, &no_history());
        let kept: Vec<_> = review.kept.iter().map(|op| op.target_file()).collect();
        assert_eq!(kept, vec![Path::new("a.py"), Path::new("c.py")]);
        assert_eq!(review.records[1].decision, PolicyDecision::Deny);
        assert_eq!(review.records[1].index, 2);
    }

    #[test]
    fn weak_pairs_sort_to_the_end() {
        let ops = vec![
            Operation::new(OperationKind::SplitModule, "weak.py").with_smell_type("hub"),
            Operation::new(OperationKind::RemoveUnusedImport, "a.py"),
            Operation::new(OperationKind::RemoveUnusedImport, "b.py"),
        ];
        let sorted = deprioritize_weak_pairs(ops);
        let targets: Vec<_> = sorted.iter().map(|op| op.target_file()).collect();
        assert_eq!(
            targets,
            vec![Path::new("a.py"), Path::new("b.py"), Path::new("weak.py")]
        );
    }

    #[test]
    fn env_overrides_parse_leniently() {
        let env = PolicyEnv {
            max_ops: Some("0".into()),
            max_files: Some("nonsense".into()),
            risk: Some("LOW".into()),
            deny: Some(" *api*.py , ,docs/*".into()),
            allow_tests: None,
            api_guard: Some("0".into()),
        };
        let config = PolicyConfig::for_mode(AgentMode::Auto).with_env(&env);
        assert_eq!(config.max_ops(), 1);
        assert_eq!(config.max_files(), 60);
        assert_eq!(config.auto_apply_max_risk(), RiskLevel::Low);
        assert!(config.matches_deny_pattern("x/api_y.py"));
        assert!(config.matches_deny_pattern("docs/readme.py"));
        assert!(!config.is_api_surface_file(""));
    }

    #[test]
    fn glob_semantics_match_fnmatch() {
        assert!(glob_match("*__init__.py", "pkg/__init__.py"));
        assert!(glob_match("*__init__.py", "__init__.py"));
        assert!(glob_match("api.py", "api.py"));
        assert!(!glob_match("api.py", "pkg/api.py"));
        assert!(glob_match("a?c.py", "abc.py"));
        assert!(!glob_match("a?c.py", "abbc.py"));
    }

    #[test]
    fn mode_parses_leniently() {
        assert_eq!(AgentMode::parse_lenient("auto"), AgentMode::Auto);
        assert_eq!(AgentMode::parse_lenient(" Hybrid "), AgentMode::Hybrid);
        assert_eq!(AgentMode::parse_lenient("bogus"), AgentMode::Assist);
    }
}
