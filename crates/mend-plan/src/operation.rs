//! Operations: single proposed source edits
//!
//! An [`Operation`] is immutable once placed in a plan; construction uses the
//! builder-style `with_*` methods.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{self, Display, Formatter};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use crate::plan::PlanError;

/// Default cap on outer-scope names an extraction may pull in as parameters.
///
/// A configurable complexity guard, not a domain law; transform contexts may
/// override it.
pub const DEFAULT_MAX_EXTRA_PARAMS: usize = 3;

/// The kinds of source edit the engine knows how to apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Drop imports never read in load context
    RemoveUnusedImport,
    /// Drop the import of one named module to break a cycle
    RemoveCyclicImport,
    /// Hoist a nested function to module level
    ExtractNestedFunction,
    /// Replace a deep statement block with a helper call
    ExtractBlockToHelper,
    /// Move a cohesive group of definitions into a companion module
    SplitModule,
    /// Move self-independent methods onto an extracted class
    ExtractClass,
    /// Generate a re-export facade module
    IntroduceFacade,
    /// Repair a broken import found by verification
    FixImport,
    /// Create a new module from literal content
    CreateModuleStub,
    /// Leave an idempotent refactoring note
    RefactorTodo,
}

impl OperationKind {
    /// All kinds in declaration order
    pub const ALL: [OperationKind; 10] = [
        OperationKind::RemoveUnusedImport,
        OperationKind::RemoveCyclicImport,
        OperationKind::ExtractNestedFunction,
        OperationKind::ExtractBlockToHelper,
        OperationKind::SplitModule,
        OperationKind::ExtractClass,
        OperationKind::IntroduceFacade,
        OperationKind::FixImport,
        OperationKind::CreateModuleStub,
        OperationKind::RefactorTodo,
    ];

    /// Stable snake_case name, also used in persisted plans and keys
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::RemoveUnusedImport => "remove_unused_import",
            OperationKind::RemoveCyclicImport => "remove_cyclic_import",
            OperationKind::ExtractNestedFunction => "extract_nested_function",
            OperationKind::ExtractBlockToHelper => "extract_block_to_helper",
            OperationKind::SplitModule => "split_module",
            OperationKind::ExtractClass => "extract_class",
            OperationKind::IntroduceFacade => "introduce_facade",
            OperationKind::FixImport => "fix_import",
            OperationKind::CreateModuleStub => "create_module_stub",
            OperationKind::RefactorTodo => "refactor_todo",
        }
    }

    /// Kinds that write a second, companion file next to the target
    #[inline]
    #[must_use]
    pub fn produces_companion(self) -> bool {
        matches!(
            self,
            OperationKind::SplitModule | OperationKind::ExtractClass | OperationKind::IntroduceFacade
        )
    }
}

impl Display for OperationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = PlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperationKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| PlanError::UnknownKind(s.to_string()))
    }
}

/// One proposed source edit
///
/// # Invariants
/// - `target_file` is project-relative and must resolve inside the project root
/// - `extra_params` keep the caller-supplied order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    kind: OperationKind,
    target_file: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    smell_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    location: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    extra_params: Vec<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    params: IndexMap<String, Value>,
    #[serde(default)]
    description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

impl Operation {
    /// Create a new operation for a target file
    #[inline]
    #[must_use]
    pub fn new(kind: OperationKind, target_file: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            target_file: target_file.into(),
            smell_type: None,
            location: None,
            extra_params: Vec::new(),
            params: IndexMap::new(),
            description: String::new(),
            content: None,
        }
    }

    /// Tag with the smell that produced this operation
    #[inline]
    #[must_use]
    pub fn with_smell_type(mut self, smell: impl Into<String>) -> Self {
        self.smell_type = Some(smell.into());
        self
    }

    /// Locator within the target (symbol name, line id)
    #[inline]
    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Ordered outer-scope names an extraction is allowed to parameterize
    #[inline]
    #[must_use]
    pub fn with_extra_params(mut self, params: Vec<String>) -> Self {
        self.extra_params = params;
        self
    }

    /// Attach a kind-specific parameter
    #[inline]
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Human-readable description
    #[inline]
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Literal content for stub/note kinds
    #[inline]
    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Operation kind
    #[inline]
    #[must_use]
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Project-relative target path
    #[inline]
    #[must_use]
    pub fn target_file(&self) -> &Path {
        &self.target_file
    }

    /// Smell tag, when known
    #[inline]
    #[must_use]
    pub fn smell_type(&self) -> Option<&str> {
        self.smell_type.as_deref()
    }

    /// Locator within the target
    #[inline]
    #[must_use]
    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    /// Outer-scope parameter names, caller order preserved
    #[inline]
    #[must_use]
    pub fn extra_params(&self) -> &[String] {
        &self.extra_params
    }

    /// Kind-specific parameters
    #[inline]
    #[must_use]
    pub fn params(&self) -> &IndexMap<String, Value> {
        &self.params
    }

    /// Kind-specific string parameter, when present and a string
    #[must_use]
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    /// Kind-specific string-list parameter; non-string elements are dropped
    #[must_use]
    pub fn param_str_list(&self, key: &str) -> Vec<String> {
        self.params
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Kind-specific integer parameter, when present and non-negative
    #[must_use]
    pub fn param_usize(&self, key: &str) -> Option<usize> {
        self.params
            .get(key)
            .and_then(Value::as_u64)
            .and_then(|v| usize::try_from(v).ok())
    }

    /// Description text
    #[inline]
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Literal content, when carried
    #[inline]
    #[must_use]
    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    /// Stable identity used by decision and session stores:
    /// `target|kind|location` (empty location when absent)
    #[must_use]
    pub fn key(&self) -> String {
        format!(
            "{}|{}|{}",
            self.target_file.display(),
            self.kind.as_str(),
            self.location.as_deref().unwrap_or("")
        )
    }
}

/// Resolve a project-relative target against the root, rejecting escapes.
///
/// Purely lexical: absolute targets and `..` components that would leave the
/// root are refused without touching the filesystem.
///
/// # Errors
/// [`PlanError::MissingTarget`] for empty paths, [`PlanError::OutsideRoot`]
/// for absolute paths or traversal escaping the root.
pub fn resolve_in_root(root: &Path, target: &Path) -> Result<PathBuf, PlanError> {
    if target.as_os_str().is_empty() {
        return Err(PlanError::MissingTarget);
    }
    if target.is_absolute() {
        return Err(PlanError::OutsideRoot {
            target: target.to_path_buf(),
        });
    }
    let mut depth: i32 = 0;
    for component in target.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::ParentDir => {
                depth -= 1;
                if depth < 0 {
                    return Err(PlanError::OutsideRoot {
                        target: target.to_path_buf(),
                    });
                }
            }
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => {
                return Err(PlanError::OutsideRoot {
                    target: target.to_path_buf(),
                });
            }
        }
    }
    Ok(root.join(target))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_str() {
        for kind in OperationKind::ALL {
            let parsed: OperationKind = kind.as_str().parse().unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn kind_unknown_str_is_rejected() {
        let result: Result<OperationKind, _> = "reticulate_splines".parse();
        assert!(matches!(result, Err(PlanError::UnknownKind(_))));
    }

    #[test]
    fn companion_kinds() {
        assert!(OperationKind::SplitModule.produces_companion());
        assert!(OperationKind::IntroduceFacade.produces_companion());
        assert!(!OperationKind::RemoveUnusedImport.produces_companion());
    }

    #[test]
    fn operation_key_includes_location() {
        let op = Operation::new(OperationKind::ExtractNestedFunction, "pkg/mod.py")
            .with_location("outer");
        assert_eq!(op.key(), "pkg/mod.py|extract_nested_function|outer");
    }

    #[test]
    fn operation_key_empty_location() {
        let op = Operation::new(OperationKind::RemoveUnusedImport, "a.py");
        assert_eq!(op.key(), "a.py|remove_unused_import|");
    }

    #[test]
    fn operation_serde_round_trip() {
        let op = Operation::new(OperationKind::SplitModule, "big.py")
            .with_smell_type("hub")
            .with_location("big")
            .with_param("imports_from", serde_json::json!(["pkg/helper.py"]))
            .with_description("split hub module");
        let json = serde_json::to_string(&op).unwrap();
        let back: Operation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, op);
    }

    #[test]
    fn typed_param_getters() {
        let op = Operation::new(OperationKind::ExtractBlockToHelper, "mod.py")
            .with_param("helper_name", "_extracted_block_12")
            .with_param("block_start_line", 12)
            .with_param("methods_to_extract", serde_json::json!(["fmt", "norm"]));
        assert_eq!(op.param_str("helper_name"), Some("_extracted_block_12"));
        assert_eq!(op.param_usize("block_start_line"), Some(12));
        assert_eq!(op.param_str_list("methods_to_extract"), vec!["fmt", "norm"]);
        assert_eq!(op.param_str("absent"), None);
        assert!(op.param_str_list("absent").is_empty());
    }

    #[test]
    fn resolve_in_root_plain() {
        let resolved = resolve_in_root(Path::new("/project"), Path::new("pkg/mod.py")).unwrap();
        assert_eq!(resolved, PathBuf::from("/project/pkg/mod.py"));
    }

    #[test]
    fn resolve_in_root_rejects_empty() {
        let result = resolve_in_root(Path::new("/project"), Path::new(""));
        assert!(matches!(result, Err(PlanError::MissingTarget)));
    }

    #[test]
    fn resolve_in_root_rejects_absolute() {
        let result = resolve_in_root(Path::new("/project"), Path::new("/etc/passwd"));
        assert!(matches!(result, Err(PlanError::OutsideRoot { .. })));
    }

    #[test]
    fn resolve_in_root_rejects_escape() {
        let result = resolve_in_root(Path::new("/project"), Path::new("../other/file.py"));
        assert!(matches!(result, Err(PlanError::OutsideRoot { .. })));

        let result = resolve_in_root(Path::new("/project"), Path::new("a/../../file.py"));
        assert!(matches!(result, Err(PlanError::OutsideRoot { .. })));
    }

    #[test]
    fn resolve_in_root_allows_internal_parent() {
        let resolved = resolve_in_root(Path::new("/project"), Path::new("a/b/../c.py")).unwrap();
        assert_eq!(resolved, PathBuf::from("/project/a/b/../c.py"));
    }
}
