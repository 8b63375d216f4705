//! Class extraction: moving self-independent methods to a companion class.

use mend_plan::{Operation, OperationKind};
use mend_syntax::{
    dedent, find_class, find_function, import_insertion_point, indentation_of, reindent,
    ClassInfo, EditSet, MethodInfo, ParsedModule, TextEdit,
};
use tracing::debug;

use crate::transform::{parse_source, validate_candidate, CompanionFile, Transform, TransformOutcome};
use crate::{TransformContext, TransformError};

/// Moves methods that never touch `self` onto a static companion class in
/// a sibling module. The original methods become thin delegations, so
/// existing callers keep working.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractClass;

impl Transform for ExtractClass {
    fn kind(&self) -> OperationKind {
        OperationKind::ExtractClass
    }

    fn apply(
        &self,
        source: &str,
        op: &Operation,
        ctx: &TransformContext,
    ) -> Result<TransformOutcome, TransformError> {
        let class_name = op.location().ok_or(TransformError::MissingParam("location"))?;
        let stem = op
            .target_file()
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| TransformError::NoCandidate("target has no module stem".to_owned()))?
            .to_owned();

        let module = parse_source(source)?;
        let class = find_class(&module, class_name)
            .ok_or_else(|| TransformError::NoCandidate(format!("class '{class_name}' not found")))?;

        let new_class = op
            .param_str("new_class")
            .map_or_else(|| format!("{class_name}Extracted"), ToOwned::to_owned);
        let companion_stem = format!("{stem}_{}", new_class.to_lowercase());
        let import_line = format!("from {companion_stem} import {new_class}");
        if source.contains(&import_line) {
            return Err(TransformError::AlreadyApplied);
        }

        let moved = eligible_methods(&module, &class, op)?;
        if moved.len() < ctx.min_class_methods() {
            return Err(TransformError::NoCandidate(format!(
                "no self-independent methods in '{class_name}'"
            )));
        }

        let companion_content = render_companion(&module, &new_class, &moved)?;
        validate_candidate(&companion_content)?;

        // The first moved method's slot receives the delegations; the other
        // moved methods are simply deleted.
        let indent = indentation_of(module.source(), moved[0].range.start);
        let delegations: Vec<String> = moved
            .iter()
            .map(|method| {
                let params = module.slice(method.params_range.clone());
                let args: Vec<&str> = method
                    .params
                    .iter()
                    .filter(|p| p.as_str() != "self")
                    .map(String::as_str)
                    .collect();
                format!(
                    "{indent}def {name}{params}:\n{indent}    return {new_class}.{name}({args})\n",
                    name = method.name,
                    args = args.join(", ")
                )
            })
            .collect();

        let mut edits = EditSet::new();
        edits.push(TextEdit::insert(
            import_insertion_point(&module),
            format!("{import_line}\n"),
        ));
        edits.push(TextEdit::replace(
            module.expand_to_lines(moved[0].range.clone()),
            delegations.join("\n"),
        ));
        for method in moved.iter().skip(1) {
            edits.push(TextEdit::delete(module.expand_to_lines(method.range.clone())));
        }

        let candidate = edits.apply(module.source())?;
        validate_candidate(&candidate)?;

        debug!(class = class_name, moved = moved.len(), companion = %companion_stem, "extracting class");
        let companion = CompanionFile::new(format!("{companion_stem}.py"), companion_content);
        Ok(TransformOutcome::rewrite(
            candidate,
            format!("moved {} methods from '{class_name}' to '{new_class}'", moved.len()),
        )
        .with_companion(companion))
    }
}

/// Methods safe to move: no `self` in the body, no splat parameters (their
/// delegation call could not forward faithfully), and no dunder protocol
/// hooks.
fn eligible_methods(
    module: &ParsedModule,
    class: &ClassInfo,
    op: &Operation,
) -> Result<Vec<MethodInfo>, TransformError> {
    let pinned = op.param_str_list("methods_to_extract");
    let mut out = Vec::new();
    for method in &class.methods {
        if method.reads_self {
            continue;
        }
        if method.name.starts_with("__") && method.name.ends_with("__") {
            continue;
        }
        if module.slice(method.params_range.clone()).contains('*') {
            continue;
        }
        if !pinned.is_empty() && !pinned.iter().any(|p| p == &method.name) {
            continue;
        }
        out.push(method.clone());
    }
    Ok(out)
}

fn render_companion(
    module: &ParsedModule,
    new_class: &str,
    moved: &[MethodInfo],
) -> Result<String, TransformError> {
    let mut content =
        String::from("\"\"\"Extracted from parent class to reduce complexity.\"\"\"\n\n\n");
    content.push_str(&format!("class {new_class}:\n"));
    for (index, method) in moved.iter().enumerate() {
        if index > 0 {
            content.push('\n');
        }
        let lines = module.expand_to_lines(method.def_range.clone());
        let flat = dedent(module.slice(lines));
        let without_self = strip_self_param(&flat, &method.name)?;
        content.push_str("    @staticmethod\n");
        content.push_str(&reindent(&without_self, "    "));
    }
    Ok(content)
}

/// Removes a leading `self` parameter from a dedented `def` snippet.
fn strip_self_param(def_text: &str, name: &str) -> Result<String, TransformError> {
    let parsed = ParsedModule::parse(def_text).map_err(TransformError::SourceInvalid)?;
    let Some(info) = find_function(&parsed, name) else {
        return Err(TransformError::NoCandidate(format!(
            "companion text lost method '{name}'"
        )));
    };
    let params_text = parsed.slice(info.params_range.clone());
    let inner = params_text
        .trim_start_matches('(')
        .trim_end_matches(')')
        .trim();
    let replacement = if inner == "self" {
        "()".to_owned()
    } else if let Some(rest) = inner.strip_prefix("self") {
        let rest = rest.trim_start();
        match rest.strip_prefix(',') {
            Some(tail) => format!("({})", tail.trim_start()),
            None => return Ok(def_text.to_owned()),
        }
    } else {
        return Ok(def_text.to_owned());
    };
    let mut edits = EditSet::new();
    edits.push(TextEdit::replace(info.params_range.clone(), replacement));
    Ok(edits.apply(def_text)?)
}
