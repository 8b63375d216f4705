//! Whitelist draft generation.
//!
//! Turns campaign verify-success evidence into a reviewable draft file. The
//! draft is never consumed directly: a human inspects the evidence, prunes
//! entries and renames the file to `operation_whitelist.json` to activate
//! it. By default only the safest kind survives the filter.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use mend_gate::{SessionMemory, MEND_DIR};
use mend_plan::OperationKind;
use serde::{Deserialize, Serialize};

use crate::MemoryError;

/// Draft file under `.mend/`.
pub const WHITELIST_DRAFT_FILE: &str = "operation_whitelist.draft.json";
/// Successes a key needs before it is drafted.
pub const DEFAULT_DRAFT_MIN_SUCCESS: usize = 2;
/// The kind drafted when no filter is given.
pub const DEFAULT_DRAFT_KIND: &str = "extract_block_to_helper";

const EVIDENCE_SOURCE: &str = "campaign_memory";

/// Knobs for one draft run.
#[derive(Debug, Clone)]
pub struct DraftOptions {
    /// Successes a key needs before it is drafted
    pub min_success: usize,
    /// Emit entries with `allow_in_auto` set
    pub allow_auto: bool,
    /// Ignore the kind filter entirely
    pub all_kinds: bool,
    /// Kinds to keep when `all_kinds` is off
    pub kinds: BTreeSet<String>,
}

impl Default for DraftOptions {
    fn default() -> Self {
        DraftOptions {
            min_success: DEFAULT_DRAFT_MIN_SUCCESS,
            allow_auto: false,
            all_kinds: false,
            kinds: [DEFAULT_DRAFT_KIND.to_string()].into(),
        }
    }
}

/// Why one key was drafted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftEvidence {
    /// Successes inside the campaign window
    pub verify_success_count: usize,
    /// Failures inside the campaign window
    pub verify_fail_count: usize,
    /// Where the evidence came from
    pub source: String,
}

/// One draft entry, shaped like a whitelist entry plus evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftEntry {
    /// Operation kind name
    pub kind: String,
    /// Target path
    pub target_file: String,
    /// Location within the target, when the key carried one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Skip review in hybrid mode
    pub allow_in_hybrid: bool,
    /// Apply unattended in auto mode
    pub allow_in_auto: bool,
    /// Supporting counts
    pub evidence: DraftEvidence,
}

/// Draft provenance block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftMeta {
    /// Tool that produced the draft
    pub generated_by: String,
    /// Threshold used
    pub min_success: usize,
    /// Whether auto mode was allowed
    pub allow_auto: bool,
    /// Whether the kind filter was bypassed
    pub all_kinds: bool,
    /// Kind filter in effect
    pub kinds: Vec<String>,
    /// Entries emitted
    pub candidates_count: usize,
}

/// The draft file as written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftFile {
    /// Provenance
    pub meta: DraftMeta,
    /// Drafted entries
    pub operations: Vec<DraftEntry>,
}

/// Where the draft landed and how many entries it holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftReport {
    /// Written file
    pub written: PathBuf,
    /// Entries emitted
    pub operations: usize,
}

/// Reject kind names that are not operations.
pub fn validate_draft_kinds(kinds: &BTreeSet<String>) -> Result<(), MemoryError> {
    let unknown: Vec<&str> = kinds
        .iter()
        .filter(|k| OperationKind::from_str(k).is_err())
        .map(String::as_str)
        .collect();
    if unknown.is_empty() {
        return Ok(());
    }
    let allowed: Vec<&str> = OperationKind::ALL.iter().map(|k| k.as_str()).collect();
    Err(MemoryError::UnknownDraftKinds {
        unknown: unknown.join(", "),
        allowed: allowed.join(", "),
    })
}

/// Generate the draft from campaign memory and write it under `.mend/`.
pub fn write_whitelist_draft(
    root: &Path,
    memory: &SessionMemory,
    options: &DraftOptions,
) -> Result<DraftReport, MemoryError> {
    validate_draft_kinds(&options.kinds)?;

    let success_counts = memory.verify_success_counts();
    let fail_counts = memory.verify_fail_counts();
    let candidates = memory.campaign_whitelist_candidates(options.min_success);

    let mut operations = Vec::new();
    for key in &candidates {
        let mut parts = key.splitn(3, '|');
        let (Some(target_file), Some(kind), Some(location)) =
            (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        if target_file.is_empty() || kind.is_empty() {
            continue;
        }
        if !options.all_kinds && !options.kinds.is_empty() && !options.kinds.contains(kind) {
            continue;
        }
        operations.push(DraftEntry {
            kind: kind.to_string(),
            target_file: target_file.to_string(),
            location: (!location.is_empty()).then(|| location.to_string()),
            allow_in_hybrid: true,
            allow_in_auto: options.allow_auto,
            evidence: DraftEvidence {
                verify_success_count: success_counts.get(key).copied().unwrap_or(0),
                verify_fail_count: fail_counts.get(key).copied().unwrap_or(0),
                source: EVIDENCE_SOURCE.to_string(),
            },
        });
    }

    let draft = DraftFile {
        meta: DraftMeta {
            generated_by: "mend whitelist-draft".to_string(),
            min_success: options.min_success,
            allow_auto: options.allow_auto,
            all_kinds: options.all_kinds,
            kinds: options.kinds.iter().cloned().collect(),
            candidates_count: operations.len(),
        },
        operations,
    };

    let path = root.join(MEND_DIR).join(WHITELIST_DRAFT_FILE);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| MemoryError::io(parent, e))?;
    }
    let mut body = serde_json::to_string_pretty(&draft)?;
    body.push('\n');
    fs::write(&path, body).map_err(|e| MemoryError::io(&path, e))?;

    Ok(DraftReport {
        written: path,
        operations: draft.meta.candidates_count,
    })
}
