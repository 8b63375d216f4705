//! Patch plans: ordered operation batches
//!
//! A [`PatchPlan`] holds the application order. The duplicate-key invariant
//! rejects two operations with the same (target, kind, location) unless the
//! plan was explicitly built as an intentional batch.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::operation::Operation;

/// Ordered batch of operations against one project root
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchPlan {
    root: PathBuf,
    operations: Vec<Operation>,
    #[serde(default)]
    allow_duplicates: bool,
}

impl PatchPlan {
    /// Empty plan for a project root
    #[inline]
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            operations: Vec::new(),
            allow_duplicates: false,
        }
    }

    /// Build a plan from operations, enforcing the duplicate-key invariant
    ///
    /// # Errors
    /// [`PlanError::DuplicateOperation`] when two operations share a key.
    pub fn with_operations(
        root: impl Into<PathBuf>,
        operations: Vec<Operation>,
    ) -> Result<Self, PlanError> {
        let mut plan = Self::new(root);
        for op in operations {
            plan.push(op)?;
        }
        Ok(plan)
    }

    /// Build an intentional batch: duplicate keys are allowed
    #[must_use]
    pub fn batch(root: impl Into<PathBuf>, operations: Vec<Operation>) -> Self {
        Self {
            root: root.into(),
            operations,
            allow_duplicates: true,
        }
    }

    /// Append an operation, enforcing the duplicate-key invariant
    ///
    /// # Errors
    /// [`PlanError::DuplicateOperation`] when the key is already present and
    /// the plan is not an intentional batch.
    pub fn push(&mut self, op: Operation) -> Result<(), PlanError> {
        if !self.allow_duplicates {
            let key = op.key();
            if self.operations.iter().any(|existing| existing.key() == key) {
                return Err(PlanError::DuplicateOperation { key });
            }
        }
        self.operations.push(op);
        Ok(())
    }

    /// Project root the plan applies to
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Operations in application order
    #[inline]
    #[must_use]
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Number of operations
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// True when the plan carries no operations
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Whether duplicate keys were intentionally permitted
    #[inline]
    #[must_use]
    pub fn allows_duplicates(&self) -> bool {
        self.allow_duplicates
    }

    /// Distinct target files, first-seen order
    #[must_use]
    pub fn target_files(&self) -> Vec<&Path> {
        let mut seen = HashSet::new();
        self.operations
            .iter()
            .map(Operation::target_file)
            .filter(|p| seen.insert(*p))
            .collect()
    }

    /// Keep only operations whose index (0-based) passes the filter
    #[must_use]
    pub fn retain_indices(&self, keep: &HashSet<usize>) -> Self {
        Self {
            root: self.root.clone(),
            operations: self
                .operations
                .iter()
                .enumerate()
                .filter(|(i, _)| keep.contains(i))
                .map(|(_, op)| op.clone())
                .collect(),
            allow_duplicates: self.allow_duplicates,
        }
    }
}

/// Errors raised while building or resolving plans
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// Two operations share (target, kind, location)
    #[error("duplicate operation: {key}")]
    DuplicateOperation {
        /// The offending `target|kind|location` key
        key: String,
    },

    /// Operation carries an empty target path
    #[error("operation missing target_file")]
    MissingTarget,

    /// Target resolves outside the project root
    #[error("target escapes project root: {target}")]
    OutsideRoot {
        /// The offending target path
        target: PathBuf,
    },

    /// Unrecognized operation kind name
    #[error("unknown operation kind: {0}")]
    UnknownKind(String),
}
