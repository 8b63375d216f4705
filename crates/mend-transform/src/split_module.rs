//! Module splitting: moving a cohesive group of definitions to a companion.
//!
//! Three strategies run in order and the first that proposes a plan wins:
//! single-import affinity (functions whose outside reads all come from one
//! imported project module), then the largest self-contained class, then
//! the largest self-contained function. Self-contained means every free
//! name is a builtin.

use std::collections::BTreeMap;
use std::path::Component;

use mend_plan::{Operation, OperationKind};
use mend_syntax::{
    collect_imports, import_insertion_point, top_level_defs, ByteRange, DefKind, EditSet,
    ImportKind, ParsedModule, PythonAnalysis, ScopeAnalysis, TextEdit, TopLevelDef,
};
use tracing::debug;

use crate::free_set::block_free_names;
use crate::transform::{parse_source, validate_candidate, CompanionFile, Transform, TransformOutcome};
use crate::{TransformContext, TransformError};

const MIN_CLASS_LINES: usize = 3;

/// Splits a module by moving one cohesive group of top-level definitions
/// into `<stem>_extracted.py`, re-importing the moved names so existing
/// callers keep resolving them.
#[derive(Debug, Clone, Copy, Default)]
pub struct SplitModule;

impl Transform for SplitModule {
    fn kind(&self) -> OperationKind {
        OperationKind::SplitModule
    }

    fn apply(
        &self,
        source: &str,
        op: &Operation,
        ctx: &TransformContext,
    ) -> Result<TransformOutcome, TransformError> {
        let (stem, dotted) = module_path(op)?;
        let suffix = ctx.companion_stem();
        if stem.ends_with(suffix) {
            return Err(TransformError::AlreadyApplied);
        }
        let back_import_prefix = format!("from {dotted}{suffix} import ");
        if source.contains(&back_import_prefix) {
            return Err(TransformError::AlreadyApplied);
        }

        let module = parse_source(source)?;
        let strategies: [&dyn SplitStrategy; 3] = [&AffinitySplit, &ClassSplit, &FunctionSplit];
        let mut plan = None;
        for strategy in strategies {
            if let Some(found) = strategy.propose(&module, op)? {
                plan = Some(found);
                break;
            }
        }
        let Some(plan) = plan else {
            return Err(TransformError::NoCandidate(
                "module has no separable group of definitions".to_owned(),
            ));
        };

        let mut companion_content =
            String::from("\"\"\"Extracted from parent module to reduce complexity.\"\"\"\n");
        if let Some(line) = &plan.import_line {
            companion_content.push('\n');
            companion_content.push_str(line);
            companion_content.push('\n');
        }
        for range in &plan.ranges {
            companion_content.push_str("\n\n");
            companion_content.push_str(module.slice(range.clone()));
        }
        validate_candidate(&companion_content)?;

        let back_import = format!("{back_import_prefix}{}\n", plan.names.join(", "));
        let mut edits = EditSet::new();
        edits.push(TextEdit::insert(import_insertion_point(&module), back_import));
        for range in &plan.ranges {
            edits.push(TextEdit::delete(range.clone()));
        }
        let candidate = edits.apply(module.source())?;
        validate_candidate(&candidate)?;

        debug!(strategy = plan.label, moved = plan.names.len(), "splitting module");
        let companion = CompanionFile::new(format!("{stem}{suffix}.py"), companion_content);
        Ok(TransformOutcome::rewrite(
            candidate,
            format!(
                "split {} definitions into {stem}{suffix}.py by {}",
                plan.names.len(),
                plan.label
            ),
        )
        .with_companion(companion))
    }
}

struct SplitPlan {
    names: Vec<String>,
    /// Full-line ranges of the moved definitions, in source order.
    ranges: Vec<ByteRange>,
    /// Import the moved group depends on, copied into the companion.
    import_line: Option<String>,
    label: &'static str,
}

trait SplitStrategy {
    fn propose(
        &self,
        module: &ParsedModule,
        op: &Operation,
    ) -> Result<Option<SplitPlan>, TransformError>;
}

/// Groups functions by the single imported project module they read from;
/// the stem with the most functions wins.
struct AffinitySplit;

/// Largest class whose free names are all builtins.
struct ClassSplit;

/// Largest function whose free names are all builtins.
struct FunctionSplit;

impl SplitStrategy for AffinitySplit {
    fn propose(
        &self,
        module: &ParsedModule,
        op: &Operation,
    ) -> Result<Option<SplitPlan>, TransformError> {
        let import_stems: Vec<String> = op
            .param_str_list("imports_from")
            .iter()
            .filter_map(|path| {
                let stem = std::path::Path::new(path).file_stem()?.to_str()?;
                (stem != "__init__").then(|| stem.to_owned())
            })
            .collect();
        if import_stems.is_empty() {
            return Ok(None);
        }

        let mut bound_to_stem: BTreeMap<String, String> = BTreeMap::new();
        let mut statement_by_stem: Vec<(String, ByteRange)> = Vec::new();
        for statement in collect_imports(module) {
            if statement.in_type_checking || statement.is_star {
                continue;
            }
            match &statement.kind {
                ImportKind::Plain => {
                    for item in &statement.items {
                        let stem = first_segment(&item.module).to_owned();
                        bound_to_stem.insert(item.bound_name.clone(), stem.clone());
                        statement_by_stem.push((stem, statement.range.clone()));
                    }
                }
                ImportKind::From { module: from } => {
                    let trimmed = from.trim_start_matches('.');
                    let Some(stem) = trimmed.split('.').next_back().filter(|s| !s.is_empty())
                    else {
                        continue;
                    };
                    for item in &statement.items {
                        bound_to_stem.insert(item.bound_name.clone(), stem.to_owned());
                    }
                    statement_by_stem.push((stem.to_owned(), statement.range.clone()));
                }
                ImportKind::Future => {}
            }
        }
        if bound_to_stem.is_empty() {
            return Ok(None);
        }

        let mut groups: BTreeMap<String, Vec<TopLevelDef>> = BTreeMap::new();
        for def in top_level_defs(module) {
            if def.kind != DefKind::Function {
                continue;
            }
            let free = block_free_names(&PythonAnalysis, module, &def.range);
            let mut stems = Vec::new();
            let mut foreign = false;
            for name in &free {
                if let Some(stem) = bound_to_stem.get(name) {
                    if !stems.contains(stem) {
                        stems.push(stem.clone());
                    }
                } else if !PythonAnalysis.is_builtin(name) {
                    foreign = true;
                    break;
                }
            }
            if foreign || stems.len() != 1 {
                continue;
            }
            if !import_stems.contains(&stems[0]) {
                continue;
            }
            groups.entry(stems[0].clone()).or_default().push(def);
        }

        let mut best: Option<(&String, usize)> = None;
        let mut tied = false;
        for (stem, defs) in &groups {
            match best {
                None => best = Some((stem, defs.len())),
                Some((_, count)) => {
                    if defs.len() > count {
                        best = Some((stem, defs.len()));
                        tied = false;
                    } else if defs.len() == count {
                        tied = true;
                    }
                }
            }
        }
        let Some((stem, _)) = best else {
            return Ok(None);
        };
        if tied {
            return Err(TransformError::AmbiguousExtraction(
                "two imported modules attract equally many functions".to_owned(),
            ));
        }
        let stem = stem.clone();

        let import_line = statement_by_stem
            .iter()
            .find(|(s, _)| s == &stem)
            .map(|(_, range)| module.slice(range.clone()).to_owned());
        let defs = groups.remove(&stem).unwrap_or_default();
        Ok(Some(SplitPlan {
            names: defs.iter().map(|d| d.name.clone()).collect(),
            ranges: defs
                .iter()
                .map(|d| module.expand_to_lines(d.range.clone()))
                .collect(),
            import_line,
            label: "import affinity",
        }))
    }
}

impl SplitStrategy for ClassSplit {
    fn propose(
        &self,
        module: &ParsedModule,
        _op: &Operation,
    ) -> Result<Option<SplitPlan>, TransformError> {
        let candidates: Vec<TopLevelDef> = top_level_defs(module)
            .into_iter()
            .filter(|def| def.kind == DefKind::Class)
            .filter(|def| line_count(def) >= MIN_CLASS_LINES)
            .filter(|def| is_self_contained(module, def))
            .collect();
        single_largest(module, candidates, "self-contained class")
    }
}

impl SplitStrategy for FunctionSplit {
    fn propose(
        &self,
        module: &ParsedModule,
        _op: &Operation,
    ) -> Result<Option<SplitPlan>, TransformError> {
        let candidates: Vec<TopLevelDef> = top_level_defs(module)
            .into_iter()
            .filter(|def| def.kind == DefKind::Function)
            .filter(|def| is_self_contained(module, def))
            .collect();
        single_largest(module, candidates, "self-contained function")
    }
}

fn is_self_contained(module: &ParsedModule, def: &TopLevelDef) -> bool {
    block_free_names(&PythonAnalysis, module, &def.range)
        .iter()
        .all(|name| PythonAnalysis.is_builtin(name))
}

fn line_count(def: &TopLevelDef) -> usize {
    def.end_line.saturating_sub(def.start_line) + 1
}

fn single_largest(
    module: &ParsedModule,
    candidates: Vec<TopLevelDef>,
    label: &'static str,
) -> Result<Option<SplitPlan>, TransformError> {
    let mut best: Option<usize> = None;
    let mut tied = false;
    for (index, def) in candidates.iter().enumerate() {
        let size = line_count(def);
        match best {
            None => best = Some(index),
            Some(current) => {
                let current_size = line_count(&candidates[current]);
                if size > current_size {
                    best = Some(index);
                    tied = false;
                } else if size == current_size {
                    tied = true;
                }
            }
        }
    }
    let Some(index) = best else {
        return Ok(None);
    };
    if tied {
        return Err(TransformError::AmbiguousExtraction(format!(
            "multiple candidates for largest {label}"
        )));
    }
    let def = &candidates[index];
    Ok(Some(SplitPlan {
        names: vec![def.name.clone()],
        ranges: vec![module.expand_to_lines(def.range.clone())],
        import_line: None,
        label,
    }))
}

/// Target's module stem and its dotted path from the project root.
fn module_path(op: &Operation) -> Result<(String, String), TransformError> {
    let base = op.target_file().with_extension("");
    let mut parts: Vec<&str> = Vec::new();
    for component in base.components() {
        if let Component::Normal(part) = component {
            parts.push(part.to_str().ok_or_else(|| {
                TransformError::NoCandidate("target path is not valid UTF-8".to_owned())
            })?);
        }
    }
    let stem = parts
        .last()
        .copied()
        .ok_or_else(|| TransformError::NoCandidate("target has no module stem".to_owned()))?;
    Ok((stem.to_owned(), parts.join(".")))
}

fn first_segment(dotted: &str) -> &str {
    dotted.split('.').next().unwrap_or(dotted)
}
