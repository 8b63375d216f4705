//! Free-set safety gate shared by the extraction transforms.
//!
//! A region can only be lifted out of its parent scope when every name it
//! reads but does not bind is explained by exactly one of: an extra
//! parameter (drawn from the parent's locals, capped), a module-level
//! binding, or a builtin. Anything left over rejects the extraction.

use std::collections::BTreeSet;

use mend_syntax::{ByteRange, ParsedModule, ScopeAnalysis};

use crate::TransformError;

/// Name environment of the scope a region is being lifted out of.
#[derive(Debug, Clone)]
pub struct RegionScope {
    parent_params: BTreeSet<String>,
    parent_locals: BTreeSet<String>,
}

impl RegionScope {
    /// Build a scope from explicit parameter and local-binding sets.
    #[must_use]
    pub fn new(
        params: impl IntoIterator<Item = String>,
        locals: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            parent_params: params.into_iter().collect(),
            parent_locals: locals.into_iter().collect(),
        }
    }

    /// Build the scope of a function, with its bindings resolved by `analysis`.
    ///
    /// Parameters are counted among the locals as well; a region reading a
    /// parent parameter still needs it passed in.
    pub fn of_function<A: ScopeAnalysis>(
        analysis: &A,
        module: &ParsedModule,
        params: &[String],
        range: &ByteRange,
    ) -> Self {
        let mut locals = analysis.bound_names(module, range);
        locals.extend(params.iter().cloned());
        Self {
            parent_params: params.iter().cloned().collect(),
            parent_locals: locals,
        }
    }

    #[inline]
    #[must_use]
    pub fn parent_params(&self) -> &BTreeSet<String> {
        &self.parent_params
    }

    #[inline]
    #[must_use]
    pub fn parent_locals(&self) -> &BTreeSet<String> {
        &self.parent_locals
    }
}

/// Free names of a region that forms its own scope (a nested function):
/// reads minus the names the region itself binds.
pub fn scope_free_names<A: ScopeAnalysis>(
    analysis: &A,
    module: &ParsedModule,
    region: &ByteRange,
) -> BTreeSet<String> {
    let reads = analysis.reads(module, region);
    let bound = analysis.bound_names(module, region);
    reads.difference(&bound).cloned().collect()
}

/// Free names of a plain statement block: reads minus names assigned
/// anywhere inside the block.
pub fn block_free_names<A: ScopeAnalysis>(
    analysis: &A,
    module: &ParsedModule,
    region: &ByteRange,
) -> BTreeSet<String> {
    let reads = analysis.reads(module, region);
    let writes = analysis.writes(module, region);
    reads.difference(&writes).cloned().collect()
}

/// Reject regions that declare `global` or `nonlocal` mutation.
///
/// # Errors
///
/// [`TransformError::OuterScopeMutation`] when such a declaration exists.
pub fn ensure_no_outer_mutation<A: ScopeAnalysis>(
    analysis: &A,
    module: &ParsedModule,
    region: &ByteRange,
) -> Result<(), TransformError> {
    if analysis.declares_outer_mutation(module, region) {
        return Err(TransformError::OuterScopeMutation);
    }
    Ok(())
}

/// Reject regions containing `break`, `continue` or `return`.
///
/// Applies to block extraction only; a nested function's own returns are
/// its normal interface.
///
/// # Errors
///
/// [`TransformError::ControlFlowEscape`] when an escape statement exists.
pub fn ensure_no_control_flow_escape<A: ScopeAnalysis>(
    analysis: &A,
    module: &ParsedModule,
    region: &ByteRange,
) -> Result<(), TransformError> {
    if analysis.has_control_flow_escape(module, region) {
        return Err(TransformError::ControlFlowEscape);
    }
    Ok(())
}

/// Resolve a region's free names against the surrounding environment.
///
/// Names shadowed by the parent's locals become extra parameters and are
/// returned in sorted order; names explained by module bindings or builtins
/// need nothing. Resolution order matters: a parent local shadows a
/// module-level binding of the same name.
///
/// # Errors
///
/// [`TransformError::UnresolvedNames`] when a free name has no explanation,
/// [`TransformError::FreeSetTooLarge`] when the extras exceed `cap`.
pub fn resolve_free_names<A: ScopeAnalysis>(
    analysis: &A,
    free: &BTreeSet<String>,
    scope: &RegionScope,
    module_bindings: &BTreeSet<String>,
    cap: usize,
) -> Result<Vec<String>, TransformError> {
    let mut extras = Vec::new();
    let mut unresolved = Vec::new();

    for name in free {
        if scope.parent_locals.contains(name) {
            extras.push(name.clone());
        } else if module_bindings.contains(name) || analysis.is_builtin(name) {
            continue;
        } else {
            unresolved.push(name.clone());
        }
    }

    if !unresolved.is_empty() {
        return Err(TransformError::UnresolvedNames { names: unresolved });
    }
    if extras.len() > cap {
        return Err(TransformError::FreeSetTooLarge {
            count: extras.len(),
            cap,
        });
    }
    Ok(extras)
}
