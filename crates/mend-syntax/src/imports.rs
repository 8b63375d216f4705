//! Import statements as structured data
//!
//! Collects every import in a module (any nesting depth) into a flat model:
//! which statement, which module, and which names it binds. Transforms that
//! add, drop, or rewrite imports work against this model instead of walking
//! the tree themselves.

use tree_sitter::Node;

use crate::analysis::ByteRange;
use crate::defs::module_docstring_range;
use crate::module::{walk_tree, ParsedModule};

/// Statement form of an import
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportKind {
    /// `import a.b` or `import a.b as c`
    Plain,
    /// `from <module> import name, ...`
    From {
        /// Source module, including any leading relative dots
        module: String,
    },
    /// `from __future__ import ...`; never removable
    Future,
}

/// One imported name within a statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportItem {
    /// Item as written, e.g. `os.path` or `loads as parse`
    pub text: String,
    /// Module the item resolves against
    pub module: String,
    /// Name the item binds in the importing scope
    pub bound_name: String,
}

/// A single import statement and the names it binds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportStatement {
    /// Bytes covered by the statement
    pub range: ByteRange,
    /// 1-based line of the statement start
    pub line: usize,
    /// Statement form
    pub kind: ImportKind,
    /// Whether this is `from m import *`
    pub is_star: bool,
    /// Whether the statement sits under an `if TYPE_CHECKING:` guard
    pub in_type_checking: bool,
    /// Whether the statement is a direct child of the module
    pub is_top_level: bool,
    /// Imported names; empty for star imports
    pub items: Vec<ImportItem>,
}

impl ImportStatement {
    /// Module this statement draws from: the `from` module, or the first
    /// item's module for plain imports
    #[must_use]
    pub fn source_module(&self) -> Option<&str> {
        match &self.kind {
            ImportKind::From { module } => Some(module),
            ImportKind::Future => Some("__future__"),
            ImportKind::Plain => self.items.first().map(|i| i.module.as_str()),
        }
    }

    /// Whether any item binds `name`
    #[must_use]
    pub fn binds(&self, name: &str) -> bool {
        self.items.iter().any(|i| i.bound_name == name)
    }
}

/// Collects all import statements in the module, at any depth, in source
/// order.
#[must_use]
pub fn collect_imports(module: &ParsedModule) -> Vec<ImportStatement> {
    let mut out = Vec::new();
    walk_tree(module.root(), &mut |node| match node.kind() {
        "import_statement" => out.push(plain_import(module, node)),
        "import_from_statement" => out.push(from_import(module, node)),
        "future_import_statement" => out.push(future_import(module, node)),
        _ => {}
    });
    out
}

/// Byte offset at which a new import line belongs: after the last top-level
/// import, otherwise after the module docstring, otherwise the start of the
/// file.
#[must_use]
pub fn import_insertion_point(module: &ParsedModule) -> usize {
    let root = module.root();
    let mut cursor = root.walk();
    let mut last_import_end = None;
    for child in root.named_children(&mut cursor) {
        if matches!(
            child.kind(),
            "import_statement" | "import_from_statement" | "future_import_statement"
        ) {
            last_import_end = Some(child.byte_range().end);
        }
    }
    if let Some(end) = last_import_end {
        return next_line_start(module.source(), end);
    }
    if let Some(doc) = module_docstring_range(module) {
        return next_line_start(module.source(), doc.end);
    }
    0
}

fn next_line_start(source: &str, from: usize) -> usize {
    source[from..]
        .find('\n')
        .map_or(source.len(), |i| from + i + 1)
}

fn statement_shell(module: &ParsedModule, node: Node<'_>, kind: ImportKind) -> ImportStatement {
    ImportStatement {
        range: node.byte_range(),
        line: module.start_line(node),
        kind,
        is_star: false,
        in_type_checking: under_type_checking(module, node),
        is_top_level: node.parent().is_some_and(|p| p.kind() == "module"),
        items: Vec::new(),
    }
}

fn plain_import(module: &ParsedModule, node: Node<'_>) -> ImportStatement {
    let mut statement = statement_shell(module, node, ImportKind::Plain);
    let mut cursor = node.walk();
    for child in node.children_by_field_name("name", &mut cursor) {
        match child.kind() {
            "dotted_name" => {
                let dotted = module.text(child).to_string();
                let first = dotted.split('.').next().unwrap_or(&dotted).to_string();
                statement.items.push(ImportItem {
                    text: dotted.clone(),
                    module: dotted,
                    bound_name: first,
                });
            }
            "aliased_import" => {
                if let Some(item) = aliased_item(module, child, None) {
                    statement.items.push(item);
                }
            }
            _ => {}
        }
    }
    statement
}

fn from_import(module: &ParsedModule, node: Node<'_>) -> ImportStatement {
    let source = node
        .child_by_field_name("module_name")
        .map(|m| module.text(m).to_string())
        .unwrap_or_default();
    let mut statement = statement_shell(
        module,
        node,
        ImportKind::From {
            module: source.clone(),
        },
    );
    fill_from_items(module, node, &source, &mut statement);
    statement
}

fn future_import(module: &ParsedModule, node: Node<'_>) -> ImportStatement {
    let mut statement = statement_shell(module, node, ImportKind::Future);
    fill_from_items(module, node, "__future__", &mut statement);
    statement
}

fn fill_from_items(
    module: &ParsedModule,
    node: Node<'_>,
    source: &str,
    statement: &mut ImportStatement,
) {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        match child.kind() {
            "wildcard_import" => statement.is_star = true,
            "dotted_name" if !is_module_name(node, child) => {
                let name = module.text(child).to_string();
                statement.items.push(ImportItem {
                    text: name.clone(),
                    module: source.to_string(),
                    bound_name: name,
                });
            }
            "aliased_import" => {
                if let Some(item) = aliased_item(module, child, Some(source)) {
                    statement.items.push(item);
                }
            }
            _ => {}
        }
    }
}

fn is_module_name(statement: Node<'_>, child: Node<'_>) -> bool {
    statement
        .child_by_field_name("module_name")
        .is_some_and(|m| m.id() == child.id())
}

fn aliased_item(
    module: &ParsedModule,
    node: Node<'_>,
    from_module: Option<&str>,
) -> Option<ImportItem> {
    let name = node.child_by_field_name("name")?;
    let alias = node.child_by_field_name("alias")?;
    let name_text = module.text(name).to_string();
    Some(ImportItem {
        text: format!("{} as {}", name_text, module.text(alias)),
        module: from_module.map_or_else(|| name_text.clone(), ToString::to_string),
        bound_name: module.text(alias).to_string(),
    })
}

fn under_type_checking(module: &ParsedModule, node: Node<'_>) -> bool {
    let mut current = node.parent();
    while let Some(ancestor) = current {
        if ancestor.kind() == "if_statement" {
            if let Some(condition) = ancestor.child_by_field_name("condition") {
                if module.text(condition).contains("TYPE_CHECKING") {
                    return true;
                }
            }
        }
        current = ancestor.parent();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn plain_import_binds_first_segment() {
        let module = ParsedModule::parse("import os.path\n").unwrap();
        let imports = collect_imports(&module);
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].kind, ImportKind::Plain);
        assert_eq!(imports[0].items[0].module, "os.path");
        assert_eq!(imports[0].items[0].bound_name, "os");
    }

    #[test]
    fn aliased_import_binds_alias() {
        let module = ParsedModule::parse("import numpy as np\nfrom json import loads as parse\n")
            .unwrap();
        let imports = collect_imports(&module);
        assert_eq!(imports[0].items[0].bound_name, "np");
        assert_eq!(imports[0].items[0].module, "numpy");
        assert_eq!(imports[1].items[0].bound_name, "parse");
        assert_eq!(imports[1].items[0].module, "json");
        assert_eq!(imports[1].items[0].text, "loads as parse");
    }

    #[test]
    fn from_import_carries_module_and_names() {
        let module = ParsedModule::parse("from pkg.sub import alpha, beta\n").unwrap();
        let imports = collect_imports(&module);
        assert_eq!(
            imports[0].kind,
            ImportKind::From {
                module: "pkg.sub".into()
            }
        );
        let bound: Vec<_> = imports[0].items.iter().map(|i| i.bound_name.as_str()).collect();
        assert_eq!(bound, vec!["alpha", "beta"]);
    }

    #[test]
    fn relative_import_keeps_dots() {
        let module = ParsedModule::parse("from ..utils import helper\n").unwrap();
        let imports = collect_imports(&module);
        assert_eq!(imports[0].source_module(), Some("..utils"));
        assert!(imports[0].binds("helper"));
    }

    #[test]
    fn star_import_flagged() {
        let module = ParsedModule::parse("from os.path import *\n").unwrap();
        let imports = collect_imports(&module);
        assert!(imports[0].is_star);
        assert!(imports[0].items.is_empty());
    }

    #[test]
    fn future_import_classified() {
        let module = ParsedModule::parse("from __future__ import annotations\n").unwrap();
        let imports = collect_imports(&module);
        assert_eq!(imports[0].kind, ImportKind::Future);
        assert!(imports[0].binds("annotations"));
    }

    #[test]
    fn type_checking_guard_detected() {
        let source = "from typing import TYPE_CHECKING\n\nif TYPE_CHECKING:\n    from heavy import Thing\n";
        let module = ParsedModule::parse(source).unwrap();
        let imports = collect_imports(&module);
        assert!(!imports[0].in_type_checking);
        assert!(imports[1].in_type_checking);
        assert!(!imports[1].is_top_level);
    }

    #[test]
    fn nested_imports_collected() {
        let source = "def lazy():\n    import json\n    return json.dumps({})\n";
        let module = ParsedModule::parse(source).unwrap();
        let imports = collect_imports(&module);
        assert_eq!(imports.len(), 1);
        assert!(!imports[0].is_top_level);
        assert_eq!(imports[0].line, 2);
    }

    #[test]
    fn insertion_point_after_last_import() {
        let source = "\"\"\"Docstring.\"\"\"\nimport os\nimport sys\n\nVALUE = 1\n";
        let module = ParsedModule::parse(source).unwrap();
        let at = import_insertion_point(&module);
        assert_eq!(&source[..at], "\"\"\"Docstring.\"\"\"\nimport os\nimport sys\n");
    }

    #[test]
    fn insertion_point_after_docstring_when_no_imports() {
        let source = "\"\"\"Docstring.\"\"\"\n\nVALUE = 1\n";
        let module = ParsedModule::parse(source).unwrap();
        let at = import_insertion_point(&module);
        assert_eq!(&source[..at], "\"\"\"Docstring.\"\"\"\n");
    }

    #[test]
    fn insertion_point_zero_for_bare_module() {
        let module = ParsedModule::parse("x = 1\n").unwrap();
        assert_eq!(import_insertion_point(&module), 0);
    }
}
