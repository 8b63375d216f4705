//! Facade introduction: a companion module re-exporting a stable surface.

use mend_plan::{Operation, OperationKind};
use mend_syntax::{dunder_all_names, top_level_defs, DefKind};
use tracing::debug;

use crate::transform::{parse_source, validate_candidate, CompanionFile, Transform, TransformOutcome};
use crate::{TransformContext, TransformError};

/// Writes `<stem>_api.py` next to the target, re-exporting its public
/// surface. The target file itself is left untouched; callers migrate to
/// the facade at their own pace.
///
/// The surface comes from `__all__` when declared, otherwise from every
/// non-underscore top-level function and class. An empty surface or a
/// target that already is a facade fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntroduceFacade;

impl Transform for IntroduceFacade {
    fn kind(&self) -> OperationKind {
        OperationKind::IntroduceFacade
    }

    fn apply(
        &self,
        source: &str,
        op: &Operation,
        _ctx: &TransformContext,
    ) -> Result<TransformOutcome, TransformError> {
        let stem = op
            .target_file()
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| TransformError::NoCandidate("target has no module stem".to_owned()))?
            .to_owned();
        if stem.ends_with("_api") {
            return Err(TransformError::AlreadyApplied);
        }

        let module = parse_source(source)?;
        let names = match dunder_all_names(&module) {
            Some(declared) => declared,
            None => top_level_defs(&module)
                .into_iter()
                .filter(|def| matches!(def.kind, DefKind::Function | DefKind::Class))
                .filter(|def| !def.name.starts_with('_'))
                .map(|def| def.name)
                .collect(),
        };
        if names.is_empty() {
            return Err(TransformError::NoCandidate(
                "no public names to re-export".to_owned(),
            ));
        }

        let mut doc = format!("Facade for {stem} (stable API boundary).");
        let callers = op.param_str_list("callers");
        if !callers.is_empty() {
            let shown: Vec<&str> = callers.iter().take(5).map(String::as_str).collect();
            doc.push_str("\n\nCallers (candidates to switch): ");
            doc.push_str(&shown.join(", "));
            if callers.len() > 5 {
                doc.push_str(", ...");
            }
        }

        let exports = names.join(", ");
        let quoted: Vec<String> = names.iter().map(|n| format!("'{n}'")).collect();
        let content = format!(
            "\"\"\"{doc}\"\"\"\n\nfrom {stem} import {exports}\n\n__all__ = [{}]\n",
            quoted.join(", ")
        );
        validate_candidate(&content)?;

        debug!(file = %op.target_file().display(), exported = names.len(), "introducing facade");
        let companion = CompanionFile::new(format!("{stem}_api.py"), content);
        Ok(TransformOutcome::rewrite(
            source,
            format!("introduced {stem}_api.py re-exporting {} names", names.len()),
        )
        .with_companion(companion))
    }
}
