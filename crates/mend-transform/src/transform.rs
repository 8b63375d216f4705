//! The transform contract and its outcome type.

use std::path::PathBuf;

use mend_plan::{Operation, OperationKind};
use mend_syntax::ParsedModule;

use crate::{TransformContext, TransformError};

/// A sibling file produced alongside the rewritten target.
///
/// Companion paths are relative to the target file's directory, never
/// absolute; the executor resolves and refuses to overwrite existing files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanionFile {
    /// Path relative to the directory containing the target file.
    pub rel_path: PathBuf,
    /// Complete content of the companion module.
    pub content: String,
}

impl CompanionFile {
    #[must_use]
    pub fn new(rel_path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self {
            rel_path: rel_path.into(),
            content: content.into(),
        }
    }
}

/// Result of a successful transform.
#[derive(Debug, Clone)]
pub struct TransformOutcome {
    /// Complete replacement text for the target file.
    new_source: String,
    /// Companion files to create next to the target.
    companions: Vec<CompanionFile>,
    /// One-line human summary of what changed.
    summary: String,
}

impl TransformOutcome {
    /// Outcome that rewrites the target and creates no companions.
    #[must_use]
    pub fn rewrite(new_source: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            new_source: new_source.into(),
            companions: Vec::new(),
            summary: summary.into(),
        }
    }

    /// Attach a companion file to this outcome.
    #[must_use]
    pub fn with_companion(mut self, companion: CompanionFile) -> Self {
        self.companions.push(companion);
        self
    }

    #[inline]
    #[must_use]
    pub fn new_source(&self) -> &str {
        &self.new_source
    }

    #[inline]
    #[must_use]
    pub fn companions(&self) -> &[CompanionFile] {
        &self.companions
    }

    #[inline]
    #[must_use]
    pub fn summary(&self) -> &str {
        &self.summary
    }

    /// Whether the target file's content actually changes.
    ///
    /// A facade leaves the target alone and only emits a companion.
    #[must_use]
    pub fn changes_target(&self, original: &str) -> bool {
        self.new_source != original
    }

    /// Consume the outcome, yielding the replacement text and companions.
    #[must_use]
    pub fn into_parts(self) -> (String, Vec<CompanionFile>) {
        (self.new_source, self.companions)
    }
}

/// A single source-to-source transform.
///
/// Implementations must be pure over their inputs: same source and
/// operation, same outcome. All filesystem work lives in the executor.
pub trait Transform: Send + Sync {
    /// The operation kind this transform handles.
    fn kind(&self) -> OperationKind;

    /// Produce a complete candidate text for `source`, or fail.
    ///
    /// # Errors
    ///
    /// Returns a [`TransformError`] describing why the transform refused;
    /// the caller treats most variants as per-operation skips.
    fn apply(
        &self,
        source: &str,
        op: &Operation,
        ctx: &TransformContext,
    ) -> Result<TransformOutcome, TransformError>;
}

/// Parse `source`, rejecting syntactically broken input.
pub(crate) fn parse_source(source: &str) -> Result<ParsedModule, TransformError> {
    let module = ParsedModule::parse(source).map_err(TransformError::SourceInvalid)?;
    module.check_valid().map_err(TransformError::SourceInvalid)?;
    Ok(module)
}

/// Re-parse an assembled candidate text before handing it back.
///
/// This is the validation half of the transform contract: a candidate that
/// fails to parse is discarded and the original file is never touched.
pub(crate) fn validate_candidate(candidate: &str) -> Result<(), TransformError> {
    let parsed = ParsedModule::parse(candidate).map_err(TransformError::SourceInvalid)?;
    match parsed.check_valid() {
        Ok(()) => Ok(()),
        Err(mend_syntax::SyntaxError::Invalid { line }) => {
            Err(TransformError::ValidationFailed { line })
        }
        Err(err) => Err(TransformError::SourceInvalid(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrite_outcome_reports_target_change() {
        let outcome = TransformOutcome::rewrite("x = 2\n", "bumped x");
        assert!(outcome.changes_target("x = 1\n"));
        assert!(!outcome.changes_target("x = 2\n"));
        assert!(outcome.companions().is_empty());
    }

    #[test]
    fn companions_accumulate_in_order() {
        let outcome = TransformOutcome::rewrite("pass\n", "split")
            .with_companion(CompanionFile::new("a_extracted.py", "A = 1\n"))
            .with_companion(CompanionFile::new("a_api.py", "B = 2\n"));
        let (_, companions) = outcome.into_parts();
        assert_eq!(companions.len(), 2);
        assert_eq!(companions[0].rel_path, PathBuf::from("a_extracted.py"));
    }

    #[test]
    fn validate_candidate_rejects_broken_text() {
        assert!(validate_candidate("def f(:\n    pass\n").is_err());
        assert!(validate_candidate("def f():\n    pass\n").is_ok());
    }

    #[test]
    fn parse_source_rejects_broken_text() {
        let err = parse_source("def f(:\n").unwrap_err();
        assert!(matches!(err, TransformError::SourceInvalid(_)));
    }
}
