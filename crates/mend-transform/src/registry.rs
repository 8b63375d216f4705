//! Dispatch table from operation kind to transform.

use std::collections::HashMap;
use std::fmt;

use mend_plan::{Operation, OperationKind};
use tracing::trace;

use crate::transform::{Transform, TransformOutcome};
use crate::{
    AppendTodoNote, ExtractBlockToHelper, ExtractClass, ExtractNestedFunction, IntroduceFacade,
    RemoveModuleImport, RemoveUnusedImports, ReplaceFileContent, SplitModule, TransformContext,
    TransformError,
};

/// Looks up the transform for an operation and applies it.
///
/// `CreateModuleStub` is intentionally absent: it creates a file instead of
/// rewriting one, so the patch executor handles it before consulting the
/// registry.
pub struct TransformRegistry {
    transforms: HashMap<OperationKind, Box<dyn Transform>>,
}

impl TransformRegistry {
    /// Empty registry. Useful for tests that pin down dispatch behavior.
    #[must_use]
    pub fn new() -> Self {
        Self {
            transforms: HashMap::new(),
        }
    }

    /// Registry with every built-in transform registered.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(RemoveUnusedImports));
        registry.register(Box::new(RemoveModuleImport));
        registry.register(Box::new(ExtractNestedFunction));
        registry.register(Box::new(ExtractBlockToHelper));
        registry.register(Box::new(SplitModule));
        registry.register(Box::new(ExtractClass));
        registry.register(Box::new(IntroduceFacade));
        registry.register(Box::new(ReplaceFileContent));
        registry.register(Box::new(AppendTodoNote));
        registry
    }

    /// Registers a transform under the kind it reports, replacing any
    /// previous registration for that kind.
    pub fn register(&mut self, transform: Box<dyn Transform>) {
        self.transforms.insert(transform.kind(), transform);
    }

    #[must_use]
    pub fn get(&self, kind: OperationKind) -> Option<&dyn Transform> {
        self.transforms.get(&kind).map(Box::as_ref)
    }

    #[inline]
    #[must_use]
    pub fn supports(&self, kind: OperationKind) -> bool {
        self.transforms.contains_key(&kind)
    }

    /// Registered kinds in a stable order.
    #[must_use]
    pub fn kinds(&self) -> Vec<OperationKind> {
        let mut kinds: Vec<OperationKind> = self.transforms.keys().copied().collect();
        kinds.sort_by_key(|kind| kind.as_str());
        kinds
    }

    /// Applies the transform registered for `op.kind()` to `source`.
    ///
    /// # Errors
    ///
    /// [`TransformError::UnsupportedKind`] when no transform is registered
    /// for the operation's kind, otherwise whatever the transform returns.
    pub fn run(
        &self,
        source: &str,
        op: &Operation,
        ctx: &TransformContext,
    ) -> Result<TransformOutcome, TransformError> {
        let transform = self
            .get(op.kind())
            .ok_or(TransformError::UnsupportedKind(op.kind()))?;
        trace!(kind = op.kind().as_str(), file = %op.target_file().display(), "dispatching transform");
        transform.apply(source, op, ctx)
    }
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
