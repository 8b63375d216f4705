//! Atomic multi-file literal replacement.
//!
//! Every edit is validated and staged in memory before anything is written.
//! A rejected edit therefore costs nothing, and a write failure midway
//! puts the already-written originals back, so one failure means zero net
//! filesystem effect.

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use mend_plan::resolve_in_root;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::backup::BackupRun;
use crate::PatchError;

/// Most edits one batch may carry.
pub const MAX_BATCH_OPS: usize = 50;

/// Cap on the combined `old_text` + `new_text` length across a batch.
pub const MAX_BATCH_TEXT: usize = 200_000;

/// One literal replacement in one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchEdit {
    /// Project-relative file to edit.
    pub file: PathBuf,
    /// Text that must occur exactly once in the staged content.
    pub old_text: String,
    /// Replacement text.
    pub new_text: String,
}

/// What a batch did (or, under dry-run, would do).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// No writes were performed.
    pub dry_run: bool,
    /// Files whose content changed, in first-edit order.
    pub modified: Vec<PathBuf>,
    /// Staged content per file; populated only under dry-run.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub previews: IndexMap<String, String>,
}

struct Staged {
    abs: PathBuf,
    original: String,
    content: String,
}

/// Applies a batch of literal replacements, all or nothing.
///
/// Edits against the same file stack: each later edit matches against the
/// content produced by the earlier ones. When a [`BackupRun`] is supplied,
/// every to-be-written file is captured before the first write.
///
/// # Errors
///
/// [`PatchError::BatchRejected`] for validation failures (nothing written),
/// [`PatchError::BatchAborted`] when a write failed partway (originals put
/// back), and I/O errors from the pre-write read phase.
pub fn apply_batch(
    root: &Path,
    edits: &[BatchEdit],
    dry_run: bool,
    backup_run: Option<&mut BackupRun>,
) -> Result<BatchReport, PatchError> {
    let mut report = BatchReport {
        dry_run,
        modified: Vec::new(),
        previews: IndexMap::new(),
    };
    if edits.is_empty() {
        return Ok(report);
    }
    if edits.len() > MAX_BATCH_OPS {
        return Err(PatchError::BatchRejected(format!(
            "too many edits: {} > {MAX_BATCH_OPS}",
            edits.len()
        )));
    }
    let total: usize = edits
        .iter()
        .map(|edit| edit.old_text.len() + edit.new_text.len())
        .sum();
    if total > MAX_BATCH_TEXT {
        return Err(PatchError::BatchRejected(format!(
            "edit text too large: {total} > {MAX_BATCH_TEXT}"
        )));
    }

    let mut staged: IndexMap<PathBuf, Staged> = IndexMap::new();
    for edit in edits {
        if edit.old_text.is_empty() {
            return Err(PatchError::BatchRejected(format!(
                "empty old_text for {}",
                edit.file.display()
            )));
        }
        let abs = resolve_in_root(root, &edit.file)
            .map_err(|err| PatchError::BatchRejected(err.to_string()))?;
        if !staged.contains_key(&edit.file) {
            if !abs.is_file() {
                return Err(PatchError::BatchRejected(format!(
                    "target not found: {}",
                    edit.file.display()
                )));
            }
            let original = fs::read_to_string(&abs).map_err(|e| PatchError::io(&abs, e))?;
            staged.insert(
                edit.file.clone(),
                Staged {
                    abs,
                    content: original.clone(),
                    original,
                },
            );
        }
        let entry = staged
            .get_mut(&edit.file)
            .ok_or_else(|| PatchError::BatchRejected(format!("unstaged {}", edit.file.display())))?;
        let count = entry.content.matches(&edit.old_text).count();
        if count == 0 {
            return Err(PatchError::BatchRejected(format!(
                "text to replace not found in {}",
                edit.file.display()
            )));
        }
        if count > 1 {
            return Err(PatchError::BatchRejected(format!(
                "text occurs {count} times in {}",
                edit.file.display()
            )));
        }
        entry.content = entry.content.replacen(&edit.old_text, &edit.new_text, 1);
    }
    staged.retain(|_, s| s.content != s.original);

    if dry_run {
        for (rel, s) in &staged {
            report.modified.push(rel.clone());
            report
                .previews
                .insert(rel.display().to_string(), s.content.clone());
        }
        return Ok(report);
    }

    if let Some(run) = backup_run {
        for rel in staged.keys() {
            run.capture(rel)?;
        }
    }

    let mut written: Vec<&Staged> = Vec::new();
    for (rel, s) in &staged {
        match fs::write(&s.abs, s.content.as_bytes()) {
            Ok(()) => {
                written.push(s);
                report.modified.push(rel.clone());
            }
            Err(err) => {
                let mut undo_errors = Vec::new();
                for prev in &written {
                    if let Err(undo) = fs::write(&prev.abs, prev.original.as_bytes()) {
                        undo_errors.push(format!("{}: {undo}", prev.abs.display()));
                    }
                }
                if !undo_errors.is_empty() {
                    warn!(errors = ?undo_errors, "batch undo left damage");
                }
                let mut msg = format!("write failed for {}: {err}", rel.display());
                if !undo_errors.is_empty() {
                    msg.push_str(&format!("; restore errors: {}", undo_errors.join(", ")));
                }
                return Err(PatchError::BatchAborted(msg));
            }
        }
    }
    debug!(modified = report.modified.len(), "batch applied");
    Ok(report)
}
