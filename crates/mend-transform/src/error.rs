//! Error types for transform evaluation.

use mend_plan::OperationKind;
use mend_syntax::{EditError, SyntaxError};
use thiserror::Error;

/// Errors surfaced by transforms.
///
/// Every variant leaves the target file untouched: a transform either
/// returns a complete replacement text or one of these.
#[derive(Debug, Error)]
pub enum TransformError {
    /// The input source does not parse, so no transform can reason about it.
    #[error("source does not parse: {0}")]
    SourceInvalid(#[source] SyntaxError),

    /// No transform is registered for the requested operation kind.
    #[error("no transform registered for kind '{0}'")]
    UnsupportedKind(OperationKind),

    /// The operation is missing a parameter this transform requires.
    #[error("operation missing required param '{0}'")]
    MissingParam(&'static str),

    /// Nothing in the file qualifies for this transform.
    #[error("no candidate: {0}")]
    NoCandidate(String),

    /// Two or more candidates rank equally and no deterministic winner exists.
    #[error("ambiguous extraction: {0}")]
    AmbiguousExtraction(String),

    /// The candidate region reads names that nothing would explain after
    /// extraction.
    #[error("unresolved names after extraction: {}", names.join(", "))]
    UnresolvedNames { names: Vec<String> },

    /// The candidate region needs more extra parameters than the cap allows.
    #[error("extraction needs {count} extra parameters, cap is {cap}")]
    FreeSetTooLarge { count: usize, cap: usize },

    /// The candidate region contains `break`, `continue` or `return` that
    /// would change meaning once the region runs in its own frame.
    #[error("candidate region contains a control-flow escape")]
    ControlFlowEscape,

    /// The candidate region declares `global` or `nonlocal` mutation.
    #[error("candidate region mutates an outer scope")]
    OuterScopeMutation,

    /// The transform has already been applied to this file.
    #[error("already applied")]
    AlreadyApplied,

    /// Internal edit-set failure while splicing the candidate text.
    #[error("edit failed")]
    Edit(#[from] EditError),

    /// The fully assembled candidate text failed re-parse validation.
    #[error("transform produced invalid source (first error at line {line})")]
    ValidationFailed { line: usize },
}

impl TransformError {
    /// Whether this failure is a per-operation skip rather than a hard error.
    ///
    /// Skips leave the file untouched and let the patch cycle continue with
    /// the next operation.
    #[must_use]
    pub fn is_skip(&self) -> bool {
        !matches!(self, Self::Edit(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolved_names_message_lists_names() {
        let err = TransformError::UnresolvedNames {
            names: vec!["alpha".into(), "beta".into()],
        };
        assert_eq!(
            err.to_string(),
            "unresolved names after extraction: alpha, beta"
        );
    }

    #[test]
    fn free_set_message_carries_counts() {
        let err = TransformError::FreeSetTooLarge { count: 5, cap: 3 };
        assert_eq!(err.to_string(), "extraction needs 5 extra parameters, cap is 3");
    }

    #[test]
    fn skips_exclude_edit_failures() {
        assert!(TransformError::AlreadyApplied.is_skip());
        assert!(TransformError::ControlFlowEscape.is_skip());
        assert!(!TransformError::Edit(EditError::Overlap {
            first: 0..1,
            second: 0..1,
        })
        .is_skip());
    }
}
