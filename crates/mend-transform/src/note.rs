//! Literal-content transforms: refactoring notes and whole-file repairs.

use mend_plan::{Operation, OperationKind};
use tracing::debug;

use crate::transform::{validate_candidate, Transform, TransformOutcome};
use crate::{TransformContext, TransformError};

/// Appends a refactoring note to the end of the target file.
///
/// Idempotent by content: a file already carrying the note text, or the
/// `# TODO: Refactor <target>` marker, is left alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppendTodoNote;

impl Transform for AppendTodoNote {
    fn kind(&self) -> OperationKind {
        OperationKind::RefactorTodo
    }

    fn apply(
        &self,
        source: &str,
        op: &Operation,
        _ctx: &TransformContext,
    ) -> Result<TransformOutcome, TransformError> {
        let note = op.content().ok_or(TransformError::MissingParam("content"))?;
        if source.contains(note.trim()) {
            return Err(TransformError::AlreadyApplied);
        }
        let marker = format!("# TODO: Refactor {}", op.target_file().display());
        if source.contains(&marker) {
            return Err(TransformError::AlreadyApplied);
        }

        let mut candidate = String::with_capacity(source.len() + note.len() + 2);
        candidate.push_str(source);
        if !candidate.is_empty() && !candidate.ends_with('\n') {
            candidate.push('\n');
        }
        candidate.push('\n');
        candidate.push_str(note);
        if !candidate.ends_with('\n') {
            candidate.push('\n');
        }
        validate_candidate(&candidate)?;
        Ok(TransformOutcome::rewrite(candidate, "appended refactoring note"))
    }
}

/// Replaces the whole file with repaired content.
///
/// Import repair synthesizes the full corrected text upstream; this
/// transform only guards it (already-applied detection and re-parse) and
/// hands it through.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplaceFileContent;

impl Transform for ReplaceFileContent {
    fn kind(&self) -> OperationKind {
        OperationKind::FixImport
    }

    fn apply(
        &self,
        source: &str,
        op: &Operation,
        _ctx: &TransformContext,
    ) -> Result<TransformOutcome, TransformError> {
        let content = op.content().ok_or(TransformError::MissingParam("content"))?;
        if content == source {
            return Err(TransformError::AlreadyApplied);
        }
        validate_candidate(content)?;
        debug!(file = %op.target_file().display(), "rewriting file with repaired imports");
        Ok(TransformOutcome::rewrite(content, "rewrote imports"))
    }
}
