//! Function extraction: hoisting nested functions and deep blocks.
//!
//! Both transforms lift a region out of a parent function to module level.
//! Candidates are ranked (nested functions by size, blocks by depth then
//! size) and the single best wins; a tie at the top is ambiguous and
//! refused. Block extraction doubles as the fallback when no nested
//! function qualifies.

use std::collections::BTreeSet;

use mend_plan::{Operation, OperationKind};
use mend_syntax::{
    call_sites, candidate_blocks, dedent, find_function, indentation_of, nested_functions,
    reindent, top_level_defs, BlockInfo, EditSet, FunctionInfo, ParsedModule, PythonAnalysis,
    ScopeAnalysis, TextEdit,
};
use tracing::debug;

use crate::free_set::{
    block_free_names, ensure_no_control_flow_escape, ensure_no_outer_mutation,
    resolve_free_names, scope_free_names, RegionScope,
};
use crate::transform::{parse_source, validate_candidate, Transform, TransformOutcome};
use crate::{TransformContext, TransformError};

/// Hoists the largest qualifying nested function to module level, inserted
/// before the parent's top-level container. Calls inside the parent gain
/// the extra arguments; the hoisted signature gains the matching
/// parameters. Falls back to block extraction when no nested function
/// qualifies.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractNestedFunction;

/// Replaces the deepest large statement block with a call to a hoisted
/// helper named after the block's line.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractBlockToHelper;

impl Transform for ExtractNestedFunction {
    fn kind(&self) -> OperationKind {
        OperationKind::ExtractNestedFunction
    }

    fn apply(
        &self,
        source: &str,
        op: &Operation,
        ctx: &TransformContext,
    ) -> Result<TransformOutcome, TransformError> {
        let module = parse_source(source)?;
        let parent = locate_parent(&module, op)?;
        let env = Environment::of(&module, &parent);

        match best_nested(&module, op, &parent, &env, ctx) {
            Ok((nested, extras)) => hoist_nested(&module, &parent, &nested, &extras),
            // A disqualified nested function is not the end of the road;
            // the deepest extractable block may still pay off.
            Err(err @ TransformError::AmbiguousExtraction(_)) => Err(err),
            Err(nested_err) => {
                debug!(parent = %parent.name, %nested_err, "falling back to block extraction");
                match best_block(&module, op, &parent, &env, ctx) {
                    Ok((block, extras)) => hoist_block(&module, &parent, &block, &extras),
                    Err(TransformError::NoCandidate(_))
                        if !matches!(nested_err, TransformError::NoCandidate(_)) =>
                    {
                        Err(nested_err)
                    }
                    Err(block_err) => Err(block_err),
                }
            }
        }
    }
}

impl Transform for ExtractBlockToHelper {
    fn kind(&self) -> OperationKind {
        OperationKind::ExtractBlockToHelper
    }

    fn apply(
        &self,
        source: &str,
        op: &Operation,
        ctx: &TransformContext,
    ) -> Result<TransformOutcome, TransformError> {
        let module = parse_source(source)?;
        let parent = locate_parent(&module, op)?;
        let env = Environment::of(&module, &parent);
        let (block, extras) = best_block(&module, op, &parent, &env, ctx)?;
        hoist_block(&module, &parent, &block, &extras)
    }
}

/// Parent scope plus the module-level names visible from it.
struct Environment {
    scope: RegionScope,
    module_bindings: BTreeSet<String>,
}

impl Environment {
    fn of(module: &ParsedModule, parent: &FunctionInfo) -> Self {
        let scope = RegionScope::of_function(&PythonAnalysis, module, &parent.params, &parent.range);
        let module_bindings =
            PythonAnalysis.bound_names(module, &(0..module.source().len()));
        Self {
            scope,
            module_bindings,
        }
    }
}

fn locate_parent(module: &ParsedModule, op: &Operation) -> Result<FunctionInfo, TransformError> {
    let name = op.location().ok_or(TransformError::MissingParam("location"))?;
    find_function(module, name)
        .ok_or_else(|| TransformError::NoCandidate(format!("function '{name}' not found")))
}

/// Largest nested function whose free names resolve against the parent's
/// parameters; first in source order wins a size tie only by erroring.
fn best_nested(
    module: &ParsedModule,
    op: &Operation,
    parent: &FunctionInfo,
    env: &Environment,
    ctx: &TransformContext,
) -> Result<(FunctionInfo, Vec<String>), TransformError> {
    let pinned = op.param_str("nested_function");
    let mut eligible: Vec<(FunctionInfo, Vec<String>)> = Vec::new();
    let mut first_rejection = None;

    for nested in nested_functions(module, parent) {
        if pinned.is_some_and(|name| name != nested.name) {
            continue;
        }
        if nested.line_count() < ctx.min_nested_lines() {
            continue;
        }
        match qualify_nested(module, &nested, env, ctx) {
            Ok(extras) => eligible.push((nested, extras)),
            Err(err) => {
                if first_rejection.is_none() {
                    first_rejection = Some(err);
                }
            }
        }
    }

    if eligible.is_empty() {
        return Err(first_rejection.unwrap_or_else(|| {
            TransformError::NoCandidate(format!(
                "no extractable nested function in '{}'",
                parent.name
            ))
        }));
    }

    let mut best: Option<usize> = None;
    let mut tied = false;
    for (index, (candidate, _)) in eligible.iter().enumerate() {
        let size = candidate.line_count();
        match best {
            None => best = Some(index),
            Some(current) => {
                let current_size = eligible[current].0.line_count();
                if size > current_size {
                    best = Some(index);
                    tied = false;
                } else if size == current_size {
                    tied = true;
                }
            }
        }
    }
    let index = best.ok_or_else(|| {
        TransformError::NoCandidate(format!("no extractable nested function in '{}'", parent.name))
    })?;
    if tied {
        return Err(TransformError::AmbiguousExtraction(format!(
            "multiple nested functions in '{}' span {} lines",
            parent.name,
            eligible[index].0.line_count()
        )));
    }
    Ok(eligible.swap_remove(index))
}

fn qualify_nested(
    module: &ParsedModule,
    nested: &FunctionInfo,
    env: &Environment,
    ctx: &TransformContext,
) -> Result<Vec<String>, TransformError> {
    ensure_no_outer_mutation(&PythonAnalysis, module, &nested.range)?;
    let free = scope_free_names(&PythonAnalysis, module, &nested.range);
    let extras = resolve_free_names(
        &PythonAnalysis,
        &free,
        &env.scope,
        &env.module_bindings,
        ctx.max_extra_params(),
    )?;
    // Values computed mid-function may not exist at every call site;
    // only parameters are guaranteed from entry.
    for name in &extras {
        if !env.scope.parent_params().contains(name) {
            return Err(TransformError::NoCandidate(format!(
                "'{}' depends on local '{}' computed inside its parent",
                nested.name, name
            )));
        }
    }
    Ok(extras)
}

fn hoist_nested(
    module: &ParsedModule,
    parent: &FunctionInfo,
    nested: &FunctionInfo,
    extras: &[String],
) -> Result<TransformOutcome, TransformError> {
    if top_level_defs(module).iter().any(|def| def.name == nested.name) {
        return Err(TransformError::AlreadyApplied);
    }

    let lifted = module.expand_to_lines(nested.full_range.clone());
    let snippet = dedent(module.slice(lifted.clone()));
    let hoisted = widen_signature(&snippet, &nested.name, extras)?;

    let mut edits = EditSet::new();
    edits.push(TextEdit::insert(
        insertion_anchor(module, parent),
        format!("{hoisted}\n"),
    ));
    edits.push(TextEdit::delete(lifted.clone()));
    if !extras.is_empty() {
        let joined = extras.join(", ");
        for site in call_sites(module, &parent.range, &nested.name) {
            // Calls inside the lifted text are patched in the snippet pass.
            if site.args_range.start >= lifted.start && site.args_range.end <= lifted.end {
                continue;
            }
            let args_text = module.slice(site.args_range.clone());
            edits.push(TextEdit::insert(
                site.args_range.end - 1,
                append_inside_parens(args_text, &joined),
            ));
        }
    }

    let candidate = edits.apply(module.source())?;
    validate_candidate(&candidate)?;
    let summary = if extras.is_empty() {
        format!("hoisted '{}' out of '{}'", nested.name, parent.name)
    } else {
        format!(
            "hoisted '{}' out of '{}' passing {}",
            nested.name,
            parent.name,
            extras.join(", ")
        )
    };
    Ok(TransformOutcome::rewrite(candidate, summary))
}

/// Deepest, then largest, block whose free names resolve; candidates below
/// the size floor never compete.
fn best_block(
    module: &ParsedModule,
    op: &Operation,
    parent: &FunctionInfo,
    env: &Environment,
    ctx: &TransformContext,
) -> Result<(BlockInfo, Vec<String>), TransformError> {
    let pinned = op.param_usize("block_start_line");
    let mut eligible: Vec<(BlockInfo, Vec<String>)> = Vec::new();
    let mut first_rejection = None;

    for block in candidate_blocks(module, parent) {
        if pinned.is_some_and(|line| line != block.start_line) {
            continue;
        }
        if block.line_count < ctx.min_block_lines() {
            continue;
        }
        match qualify_block(module, &block, env, ctx) {
            Ok(extras) => eligible.push((block, extras)),
            Err(err) => {
                if first_rejection.is_none() {
                    first_rejection = Some(err);
                }
            }
        }
    }

    if eligible.is_empty() {
        return Err(first_rejection.unwrap_or_else(|| {
            TransformError::NoCandidate(format!("no extractable block in '{}'", parent.name))
        }));
    }

    let mut best: Option<usize> = None;
    let mut tied = false;
    for (index, (block, _)) in eligible.iter().enumerate() {
        let key = (block.depth, block.line_count);
        match best {
            None => best = Some(index),
            Some(current) => {
                let current_key = (eligible[current].0.depth, eligible[current].0.line_count);
                if key > current_key {
                    best = Some(index);
                    tied = false;
                } else if key == current_key {
                    tied = true;
                }
            }
        }
    }
    let index = best.ok_or_else(|| {
        TransformError::NoCandidate(format!("no extractable block in '{}'", parent.name))
    })?;
    if tied {
        return Err(TransformError::AmbiguousExtraction(format!(
            "multiple blocks in '{}' rank equally at depth {}",
            parent.name, eligible[index].0.depth
        )));
    }
    Ok(eligible.swap_remove(index))
}

fn qualify_block(
    module: &ParsedModule,
    block: &BlockInfo,
    env: &Environment,
    ctx: &TransformContext,
) -> Result<Vec<String>, TransformError> {
    ensure_no_control_flow_escape(&PythonAnalysis, module, &block.body_range)?;
    ensure_no_outer_mutation(&PythonAnalysis, module, &block.body_range)?;
    let free = block_free_names(&PythonAnalysis, module, &block.body_range);
    let extras = resolve_free_names(
        &PythonAnalysis,
        &free,
        &env.scope,
        &env.module_bindings,
        ctx.max_extra_params(),
    )?;
    for name in &extras {
        if !env.scope.parent_params().contains(name) {
            return Err(TransformError::NoCandidate(format!(
                "block at line {} depends on local '{}'",
                block.start_line, name
            )));
        }
    }
    Ok(extras)
}

fn hoist_block(
    module: &ParsedModule,
    parent: &FunctionInfo,
    block: &BlockInfo,
    extras: &[String],
) -> Result<TransformOutcome, TransformError> {
    let helper_name = format!("_extracted_block_{}", block.start_line);
    if top_level_defs(module).iter().any(|def| def.name == helper_name) {
        return Err(TransformError::AlreadyApplied);
    }

    let body_lines = module.expand_to_lines(block.body_range.clone());
    let flat = dedent(module.slice(body_lines.clone()));
    let helper = format!(
        "def {helper_name}({}):\n{}",
        extras.join(", "),
        reindent(&flat, "    ")
    );

    let indent = indentation_of(module.source(), block.body_range.start);
    let call = format!("{indent}{helper_name}({})\n", extras.join(", "));

    let mut edits = EditSet::new();
    edits.push(TextEdit::insert(
        insertion_anchor(module, parent),
        format!("{helper}\n"),
    ));
    edits.push(TextEdit::replace(body_lines, call));

    let candidate = edits.apply(module.source())?;
    validate_candidate(&candidate)?;
    Ok(TransformOutcome::rewrite(
        candidate,
        format!(
            "extracted {}-line block at line {} into '{}'",
            block.line_count, block.start_line, helper_name
        ),
    ))
}

/// Byte offset of the top-level statement containing `parent`; hoisted
/// definitions are inserted there, before the whole container.
fn insertion_anchor(module: &ParsedModule, parent: &FunctionInfo) -> usize {
    for def in top_level_defs(module) {
        if def.range.start <= parent.full_range.start && def.range.end >= parent.full_range.end {
            return def.range.start;
        }
    }
    module.expand_to_lines(parent.full_range.clone()).start
}

/// Adds `extras` to the hoisted function's signature and to its own
/// recursive call sites, working on the already-dedented snippet.
fn widen_signature(
    snippet: &str,
    name: &str,
    extras: &[String],
) -> Result<String, TransformError> {
    if extras.is_empty() {
        return Ok(snippet.to_owned());
    }
    let parsed = ParsedModule::parse(snippet).map_err(TransformError::SourceInvalid)?;
    let def = find_function(&parsed, name).ok_or_else(|| {
        TransformError::NoCandidate(format!("hoisted text lost definition '{name}'"))
    })?;
    let joined = extras.join(", ");

    let mut edits = EditSet::new();
    let params_text = parsed.slice(def.params_range.clone());
    edits.push(TextEdit::insert(
        def.params_range.end - 1,
        append_inside_parens(params_text, &joined),
    ));
    for site in call_sites(&parsed, &(0..snippet.len()), name) {
        let args_text = parsed.slice(site.args_range.clone());
        edits.push(TextEdit::insert(
            site.args_range.end - 1,
            append_inside_parens(args_text, &joined),
        ));
    }
    Ok(edits.apply(snippet)?)
}

/// Text to splice just before the closing parenthesis of `parenthesized`.
fn append_inside_parens(parenthesized: &str, joined: &str) -> String {
    let bare = parenthesized
        .trim_start_matches('(')
        .trim_end_matches(')')
        .trim();
    if bare.is_empty() {
        joined.to_owned()
    } else if bare.ends_with(',') {
        format!(" {joined}")
    } else {
        format!(", {joined}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn nested_op(parent: &str) -> Operation {
        Operation::new(OperationKind::ExtractNestedFunction, "mod.py").with_location(parent)
    }

    fn block_op(parent: &str) -> Operation {
        Operation::new(OperationKind::ExtractBlockToHelper, "mod.py").with_location(parent)
    }

    fn ctx() -> TransformContext {
        TransformContext::new()
    }

    #[test]
    fn nested_function_hoisted_with_parent_param() {
        let source = "def outer(x):\n    def inner():\n        doubled = x * 2\n        return doubled\n    return inner()\n";
        let outcome = ExtractNestedFunction
            .apply(source, &nested_op("outer"), &ctx())
            .unwrap();
        assert_eq!(
            outcome.new_source(),
            "def inner(x):\n    doubled = x * 2\n    return doubled\n\ndef outer(x):\n    return inner(x)\n"
        );
    }

    #[test]
    fn self_contained_nested_needs_no_params() {
        let source = "def outer():\n    def table():\n        rows = [1, 2]\n        return rows\n    return table()\n";
        let outcome = ExtractNestedFunction
            .apply(source, &nested_op("outer"), &ctx())
            .unwrap();
        assert_eq!(
            outcome.new_source(),
            "def table():\n    rows = [1, 2]\n    return rows\n\ndef outer():\n    return table()\n"
        );
    }

    #[test]
    fn larger_nested_function_wins() {
        let source = concat!(
            "def outer(x):\n",
            "    def small():\n",
            "        a = 1\n",
            "        return a\n",
            "    def large():\n",
            "        a = 1\n",
            "        b = 2\n",
            "        c = 3\n",
            "        return a + b + c\n",
            "    return small() + large()\n",
        );
        let outcome = ExtractNestedFunction
            .apply(source, &nested_op("outer"), &ctx())
            .unwrap();
        assert!(outcome.new_source().starts_with("def large():"));
        assert!(outcome.new_source().contains("    def small():"));
    }

    #[test]
    fn equal_sizes_are_ambiguous() {
        let source = concat!(
            "def outer():\n",
            "    def first():\n",
            "        a = 1\n",
            "        return a\n",
            "    def second():\n",
            "        b = 2\n",
            "        return b\n",
            "    return first() + second()\n",
        );
        let err = ExtractNestedFunction
            .apply(source, &nested_op("outer"), &ctx())
            .unwrap_err();
        assert!(matches!(err, TransformError::AmbiguousExtraction(_)));
    }

    #[test]
    fn pinned_nested_name_overrides_ranking() {
        let source = concat!(
            "def outer():\n",
            "    def small():\n",
            "        a = 1\n",
            "        return a\n",
            "    def large():\n",
            "        a = 1\n",
            "        b = 2\n",
            "        c = 3\n",
            "        return a + b + c\n",
            "    return small() + large()\n",
        );
        let op = nested_op("outer").with_param("nested_function", "small");
        let outcome = ExtractNestedFunction.apply(source, &op, &ctx()).unwrap();
        assert!(outcome.new_source().starts_with("def small():"));
    }

    #[test]
    fn free_set_over_cap_rejected() {
        let source = concat!(
            "def outer(a, b, c, d):\n",
            "    def mix():\n",
            "        total = a + b + c + d\n",
            "        return total\n",
            "    return mix()\n",
        );
        let err = ExtractNestedFunction
            .apply(source, &nested_op("outer"), &ctx())
            .unwrap_err();
        assert!(matches!(
            err,
            TransformError::FreeSetTooLarge { count: 4, cap: 3 }
        ));
    }

    #[test]
    fn unresolved_free_name_rejected() {
        let source = "def outer():\n    def inner():\n        a = 1\n        return a + mystery\n    return inner()\n";
        let err = ExtractNestedFunction
            .apply(source, &nested_op("outer"), &ctx())
            .unwrap_err();
        match err {
            TransformError::UnresolvedNames { names } => {
                assert_eq!(names, vec!["mystery".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn module_binding_resolves_free_name() {
        let source = "LIMIT = 10\n\ndef outer():\n    def check():\n        ok = LIMIT > 5\n        return ok\n    return check()\n";
        let outcome = ExtractNestedFunction
            .apply(source, &nested_op("outer"), &ctx())
            .unwrap();
        // LIMIT resolves at module level, so no parameter is added.
        assert!(outcome.new_source().contains("def check():\n    ok = LIMIT > 5"));
    }

    #[test]
    fn nonlocal_nested_rejected() {
        let source = concat!(
            "def outer():\n",
            "    count = 0\n",
            "    def bump():\n",
            "        nonlocal count\n",
            "        count += 1\n",
            "        return count\n",
            "    return bump()\n",
        );
        let err = ExtractNestedFunction
            .apply(source, &nested_op("outer"), &ctx())
            .unwrap_err();
        assert!(matches!(err, TransformError::OuterScopeMutation));
    }

    #[test]
    fn dependency_on_computed_local_rejected() {
        let source = concat!(
            "def outer():\n",
            "    derived = 41 + 1\n",
            "    def show():\n",
            "        text = str(derived)\n",
            "        return text\n",
            "    return show()\n",
        );
        let err = ExtractNestedFunction
            .apply(source, &nested_op("outer"), &ctx())
            .unwrap_err();
        assert!(matches!(err, TransformError::NoCandidate(_)));
    }

    #[test]
    fn existing_top_level_name_already_applied() {
        let source = concat!(
            "def inner(x):\n",
            "    return x\n",
            "\n",
            "def outer(x):\n",
            "    def inner():\n",
            "        doubled = x * 2\n",
            "        return doubled\n",
            "    return inner()\n",
        );
        let err = ExtractNestedFunction
            .apply(source, &nested_op("outer"), &ctx())
            .unwrap_err();
        assert!(matches!(err, TransformError::AlreadyApplied));
    }

    #[test]
    fn rerun_after_hoist_finds_nothing() {
        let source = "def outer(x):\n    def inner():\n        doubled = x * 2\n        return doubled\n    return inner()\n";
        let once = ExtractNestedFunction
            .apply(source, &nested_op("outer"), &ctx())
            .unwrap();
        let err = ExtractNestedFunction
            .apply(once.new_source(), &nested_op("outer"), &ctx())
            .unwrap_err();
        assert!(matches!(err, TransformError::NoCandidate(_)));
    }

    #[test]
    fn recursion_inside_hoisted_text_gets_arguments() {
        let source = concat!(
            "def outer(x):\n",
            "    def walk(n):\n",
            "        if n <= 0:\n",
            "            return x\n",
            "        return walk(n - 1)\n",
            "    return walk(3)\n",
        );
        let outcome = ExtractNestedFunction
            .apply(source, &nested_op("outer"), &ctx())
            .unwrap();
        assert!(outcome.new_source().contains("def walk(n, x):"));
        assert!(outcome.new_source().contains("return walk(n - 1, x)"));
        assert!(outcome.new_source().contains("return walk(3, x)"));
    }

    #[test]
    fn block_extracted_with_helper_call() {
        let source = concat!(
            "def work(items):\n",
            "    if items:\n",
            "        a = 1\n",
            "        b = 2\n",
            "        c = 3\n",
            "        d = 4\n",
            "        e = 5\n",
            "    return items\n",
        );
        let outcome = ExtractBlockToHelper
            .apply(source, &block_op("work"), &ctx())
            .unwrap();
        assert_eq!(
            outcome.new_source(),
            concat!(
                "def _extracted_block_2():\n",
                "    a = 1\n",
                "    b = 2\n",
                "    c = 3\n",
                "    d = 4\n",
                "    e = 5\n",
                "\n",
                "def work(items):\n",
                "    if items:\n",
                "        _extracted_block_2()\n",
                "    return items\n",
            )
        );
    }

    #[test]
    fn deeper_block_preferred() {
        let source = concat!(
            "def work(flag, xs):\n",
            "    if flag:\n",
            "        t = 1\n",
            "        if xs:\n",
            "            a = 1\n",
            "            b = 2\n",
            "            c = 3\n",
            "            d = 4\n",
            "            e = 5\n",
            "    return flag\n",
        );
        let outcome = ExtractBlockToHelper
            .apply(source, &block_op("work"), &ctx())
            .unwrap();
        assert!(outcome.new_source().starts_with("def _extracted_block_4():"));
        assert!(outcome.new_source().contains("        t = 1\n"));
    }

    #[test]
    fn block_with_return_rejected() {
        let source = concat!(
            "def work(items):\n",
            "    if items:\n",
            "        a = 1\n",
            "        b = 2\n",
            "        c = 3\n",
            "        d = 4\n",
            "        return items\n",
            "    return None\n",
        );
        let err = ExtractBlockToHelper
            .apply(source, &block_op("work"), &ctx())
            .unwrap_err();
        assert!(matches!(err, TransformError::ControlFlowEscape));
    }

    #[test]
    fn block_passing_parent_params() {
        let source = concat!(
            "def report(items, limit):\n",
            "    if items:\n",
            "        shown = items[:limit]\n",
            "        print(len(shown))\n",
            "        print(limit)\n",
            "        print(shown)\n",
            "        print(items)\n",
            "    return None\n",
        );
        let outcome = ExtractBlockToHelper
            .apply(source, &block_op("report"), &ctx())
            .unwrap();
        assert!(outcome.new_source().contains("def _extracted_block_2(items, limit):"));
        assert!(outcome.new_source().contains("        _extracted_block_2(items, limit)\n"));
    }

    #[test]
    fn pinned_block_line_selected() {
        let source = concat!(
            "def work(flag, xs):\n",
            "    if flag:\n",
            "        t = 1\n",
            "        if xs:\n",
            "            a = 1\n",
            "            b = 2\n",
            "            c = 3\n",
            "            d = 4\n",
            "            e = 5\n",
            "    return flag\n",
        );
        let op = block_op("work").with_param("block_start_line", 2);
        let outcome = ExtractBlockToHelper.apply(source, &op, &ctx()).unwrap();
        assert!(outcome.new_source().starts_with("def _extracted_block_2(xs):"));
    }

    #[test]
    fn small_blocks_never_compete() {
        let source = "def work(items):\n    if items:\n        a = 1\n        b = 2\n    return items\n";
        let err = ExtractBlockToHelper
            .apply(source, &block_op("work"), &ctx())
            .unwrap_err();
        assert!(matches!(err, TransformError::NoCandidate(_)));
    }

    #[test]
    fn nested_transform_falls_back_to_blocks() {
        let source = concat!(
            "def work(items):\n",
            "    if items:\n",
            "        a = 1\n",
            "        b = 2\n",
            "        c = 3\n",
            "        d = 4\n",
            "        e = 5\n",
            "    return items\n",
        );
        let outcome = ExtractNestedFunction
            .apply(source, &nested_op("work"), &ctx())
            .unwrap();
        assert!(outcome.new_source().starts_with("def _extracted_block_2():"));
    }

    #[test]
    fn block_rerun_finds_nothing() {
        let source = concat!(
            "def work(items):\n",
            "    if items:\n",
            "        a = 1\n",
            "        b = 2\n",
            "        c = 3\n",
            "        d = 4\n",
            "        e = 5\n",
            "    return items\n",
        );
        let once = ExtractBlockToHelper
            .apply(source, &block_op("work"), &ctx())
            .unwrap();
        let err = ExtractBlockToHelper
            .apply(once.new_source(), &block_op("work"), &ctx())
            .unwrap_err();
        assert!(err.is_skip());
    }

    #[test]
    fn missing_parent_is_no_candidate() {
        let err = ExtractNestedFunction
            .apply("x = 1\n", &nested_op("ghost"), &ctx())
            .unwrap_err();
        assert!(matches!(err, TransformError::NoCandidate(_)));
    }

    #[test]
    fn location_is_required() {
        let op = Operation::new(OperationKind::ExtractNestedFunction, "mod.py");
        let err = ExtractNestedFunction.apply("x = 1\n", &op, &ctx()).unwrap_err();
        assert!(matches!(err, TransformError::MissingParam("location")));
    }
}
