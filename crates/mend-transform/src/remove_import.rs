//! Import pruning: unused imports and cycle-breaking removals.
//!
//! Both transforms work from the load-context reachability of a module:
//! names read anywhere in the file, names in an `__all__` export list, and
//! names bound by type-only guarded imports count as reachable. Future and
//! star imports are never touched.

use std::collections::BTreeSet;

use mend_plan::{Operation, OperationKind};
use mend_syntax::{
    collect_imports, dunder_all_names, ByteRange, EditSet, ImportItem, ImportKind,
    ImportStatement, ParsedModule, PythonAnalysis, ScopeAnalysis, TextEdit,
};
use tracing::debug;

use crate::transform::{parse_source, validate_candidate, Transform, TransformOutcome};
use crate::{TransformContext, TransformError};

fn module_range(module: &ParsedModule) -> ByteRange {
    0..module.source().len()
}

/// Names the module reaches: all load-context reads plus export-list names
/// plus anything a type-only import binds.
fn reachable_names(module: &ParsedModule, imports: &[ImportStatement]) -> BTreeSet<String> {
    let mut used = PythonAnalysis.reads(module, &module_range(module));
    if let Some(exported) = dunder_all_names(module) {
        used.extend(exported);
    }
    for statement in imports {
        if statement.in_type_checking {
            for item in &statement.items {
                used.insert(item.bound_name.clone());
            }
        }
    }
    used
}

fn render_statement(statement: &ImportStatement, items: &[&ImportItem]) -> String {
    let list = items
        .iter()
        .map(|i| i.text.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    match &statement.kind {
        ImportKind::From { module } => format!("from {module} import {list}"),
        ImportKind::Plain | ImportKind::Future => format!("import {list}"),
    }
}

/// Drops import names never read in load context.
///
/// A statement whose names all die is deleted whole; a statement with
/// survivors is rewritten to list only the survivors.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveUnusedImports;

impl Transform for RemoveUnusedImports {
    fn kind(&self) -> OperationKind {
        OperationKind::RemoveUnusedImport
    }

    fn apply(
        &self,
        source: &str,
        op: &Operation,
        _ctx: &TransformContext,
    ) -> Result<TransformOutcome, TransformError> {
        let module = parse_source(source)?;
        let imports = collect_imports(&module);
        let used = reachable_names(&module, &imports);

        let mut edits = EditSet::new();
        let mut removed = 0usize;
        for statement in &imports {
            if matches!(statement.kind, ImportKind::Future)
                || statement.is_star
                || statement.in_type_checking
                || statement.items.is_empty()
            {
                continue;
            }
            let surviving: Vec<&ImportItem> = statement
                .items
                .iter()
                .filter(|item| used.contains(&item.bound_name))
                .collect();
            if surviving.len() == statement.items.len() {
                continue;
            }
            removed += statement.items.len() - surviving.len();
            if surviving.is_empty() {
                edits.push(TextEdit::delete(
                    module.expand_to_lines(statement.range.clone()),
                ));
            } else {
                edits.push(TextEdit::replace(
                    statement.range.clone(),
                    render_statement(statement, &surviving),
                ));
            }
        }

        if edits.is_empty() {
            return Err(TransformError::NoCandidate(
                "every import is referenced".to_owned(),
            ));
        }
        debug!(file = %op.target_file().display(), removed, "pruning unused imports");
        let candidate = edits.apply(module.source())?;
        validate_candidate(&candidate)?;
        Ok(TransformOutcome::rewrite(
            candidate,
            format!("removed {removed} unused import names"),
        ))
    }
}

/// Removes the import edge to one named module, breaking an import cycle.
///
/// Plain imports lose only the aliases rooted at the target; `from` imports
/// of the target lose the whole statement. Relative imports with no module
/// part and type-only imports carry no load edge and stay put.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveModuleImport;

impl Transform for RemoveModuleImport {
    fn kind(&self) -> OperationKind {
        OperationKind::RemoveCyclicImport
    }

    fn apply(
        &self,
        source: &str,
        op: &Operation,
        _ctx: &TransformContext,
    ) -> Result<TransformOutcome, TransformError> {
        let target = op
            .param_str("module")
            .ok_or(TransformError::MissingParam("module"))?;
        let target_first = target.split('.').next().unwrap_or(target);

        let module = parse_source(source)?;
        let mut edits = EditSet::new();
        for statement in &collect_imports(&module) {
            if statement.in_type_checking {
                continue;
            }
            match &statement.kind {
                ImportKind::Plain => {
                    let surviving: Vec<&ImportItem> = statement
                        .items
                        .iter()
                        .filter(|item| first_segment(&item.module) != target_first)
                        .collect();
                    if surviving.len() == statement.items.len() {
                        continue;
                    }
                    if surviving.is_empty() {
                        edits.push(TextEdit::delete(
                            module.expand_to_lines(statement.range.clone()),
                        ));
                    } else {
                        edits.push(TextEdit::replace(
                            statement.range.clone(),
                            render_statement(statement, &surviving),
                        ));
                    }
                }
                ImportKind::From { module: from } => {
                    let stem = from.trim_start_matches('.');
                    // A bare `from . import x` names no module to match.
                    if stem.is_empty() {
                        continue;
                    }
                    if first_segment(stem) == target_first {
                        edits.push(TextEdit::delete(
                            module.expand_to_lines(statement.range.clone()),
                        ));
                    }
                }
                ImportKind::Future => {}
            }
        }

        if edits.is_empty() {
            return Err(TransformError::NoCandidate(format!(
                "no import of '{target}' to remove"
            )));
        }
        debug!(file = %op.target_file().display(), module = target, "removing cyclic import");
        let candidate = edits.apply(module.source())?;
        validate_candidate(&candidate)?;
        Ok(TransformOutcome::rewrite(
            candidate,
            format!("removed import of '{target}'"),
        ))
    }
}

fn first_segment(dotted: &str) -> &str {
    dotted.split('.').next().unwrap_or(dotted)
}
