//! Scope analysis behind a grammar-neutral interface
//!
//! The engine asks three questions about a byte-range region: what does it
//! read, what does it write, and what does a scope bind. [`PythonAnalysis`]
//! answers them for the Python grammar; nothing above this module names a
//! tree-sitter node kind.

use once_cell::sync::Lazy;
use std::collections::BTreeSet;
use std::ops::Range;
use tree_sitter::Node;

use crate::imports::collect_imports;
use crate::module::{walk_tree, ParsedModule};

/// Region within a module's source text
pub type ByteRange = Range<usize>;

/// Read/write/bound-name queries over source regions
///
/// Implementations answer for one grammar; the free-set algorithm and the
/// transforms stay language-neutral by going through this trait.
pub trait ScopeAnalysis {
    /// Names read (load context) inside the region; attribute roots count,
    /// attribute members do not
    fn reads(&self, module: &ParsedModule, region: &ByteRange) -> BTreeSet<String>;

    /// Names assigned inside the region (targets, loop vars, aliases)
    fn writes(&self, module: &ParsedModule, region: &ByteRange) -> BTreeSet<String>;

    /// Names a scope binds: parameters, local assignments, nested definition
    /// names, and (for the module scope) import bindings. Nested scopes are
    /// not descended into.
    fn bound_names(&self, module: &ParsedModule, scope: &ByteRange) -> BTreeSet<String>;

    /// Whether the language predefines this name
    fn is_builtin(&self, name: &str) -> bool;

    /// Whether control flow could leave the region (break/continue/return
    /// anywhere inside counts, even when the loop is local to the region)
    fn has_control_flow_escape(&self, module: &ParsedModule, region: &ByteRange) -> bool;

    /// Whether the region declares mutation of an outer binding
    /// (global/nonlocal); hoisting such a region would change semantics
    fn declares_outer_mutation(&self, module: &ParsedModule, region: &ByteRange) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Read,
    Write,
    ReadWrite,
    Skip,
}

/// Python adapter for [`ScopeAnalysis`]
#[derive(Debug, Clone, Copy, Default)]
pub struct PythonAnalysis;

impl PythonAnalysis {
    fn classify(
        &self,
        module: &ParsedModule,
        region: &ByteRange,
        skip_nested_scopes: bool,
    ) -> Vec<(String, Role)> {
        let Some(covering) = module.covering_node(region.clone()) else {
            return Vec::new();
        };
        let scope_root = unwrap_decorated(covering);
        let mut out = Vec::new();
        visit(module, scope_root, scope_root, region, skip_nested_scopes, &mut out);
        out
    }
}

impl ScopeAnalysis for PythonAnalysis {
    fn reads(&self, module: &ParsedModule, region: &ByteRange) -> BTreeSet<String> {
        self.classify(module, region, false)
            .into_iter()
            .filter(|(_, role)| matches!(role, Role::Read | Role::ReadWrite))
            .map(|(name, _)| name)
            .collect()
    }

    fn writes(&self, module: &ParsedModule, region: &ByteRange) -> BTreeSet<String> {
        self.classify(module, region, false)
            .into_iter()
            .filter(|(_, role)| matches!(role, Role::Write | Role::ReadWrite))
            .map(|(name, _)| name)
            .collect()
    }

    fn bound_names(&self, module: &ParsedModule, scope: &ByteRange) -> BTreeSet<String> {
        let mut bound: BTreeSet<String> = self
            .classify(module, scope, true)
            .into_iter()
            .filter(|(_, role)| matches!(role, Role::Write | Role::ReadWrite))
            .map(|(name, _)| name)
            .collect();

        // Import bindings are invisible to the identifier walk; the module
        // scope picks them up from the import model.
        let root_range = module.root().byte_range();
        if scope.start <= root_range.start && scope.end >= root_range.end {
            for statement in collect_imports(module) {
                for item in &statement.items {
                    bound.insert(item.bound_name.clone());
                }
            }
        }
        bound
    }

    fn is_builtin(&self, name: &str) -> bool {
        PY_BUILTINS.contains(name)
    }

    fn has_control_flow_escape(&self, module: &ParsedModule, region: &ByteRange) -> bool {
        let Some(covering) = module.covering_node(region.clone()) else {
            return false;
        };
        let mut found = false;
        walk_tree(covering, &mut |node| {
            if found || !contains(region, node) {
                return;
            }
            if matches!(
                node.kind(),
                "return_statement" | "break_statement" | "continue_statement"
            ) {
                found = true;
            }
        });
        found
    }

    fn declares_outer_mutation(&self, module: &ParsedModule, region: &ByteRange) -> bool {
        let Some(covering) = module.covering_node(region.clone()) else {
            return false;
        };
        let mut found = false;
        walk_tree(covering, &mut |node| {
            if found || !contains(region, node) {
                return;
            }
            if matches!(node.kind(), "global_statement" | "nonlocal_statement") {
                found = true;
            }
        });
        found
    }
}

fn contains(region: &ByteRange, node: Node<'_>) -> bool {
    node.start_byte() >= region.start && node.end_byte() <= region.end
}

fn unwrap_decorated(node: Node<'_>) -> Node<'_> {
    if node.kind() == "decorated_definition" {
        node.child_by_field_name("definition").unwrap_or(node)
    } else {
        node
    }
}

fn visit<'t>(
    module: &ParsedModule,
    node: Node<'t>,
    scope_root: Node<'t>,
    region: &ByteRange,
    skip_nested_scopes: bool,
    out: &mut Vec<(String, Role)>,
) {
    if skip_nested_scopes && node.id() != scope_root.id() {
        match node.kind() {
            "function_definition" | "class_definition" => {
                // The definition's name binds in this scope; its body is a
                // separate scope and is not descended into.
                if contains(region, node) {
                    if let Some(name) = node.child_by_field_name("name") {
                        out.push((module.text(name).to_string(), Role::Write));
                    }
                }
                return;
            }
            "lambda" => return,
            _ => {}
        }
    }

    if node.kind() == "identifier" && contains(region, node) {
        let role = identifier_role(node);
        if role != Role::Skip {
            out.push((module.text(node).to_string(), role));
        }
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        visit(module, child, scope_root, region, skip_nested_scopes, out);
    }
}

fn is_field(parent: Node<'_>, field: &str, node: Node<'_>) -> bool {
    parent
        .child_by_field_name(field)
        .is_some_and(|c| c.id() == node.id())
}

fn identifier_role(node: Node<'_>) -> Role {
    let Some(parent) = node.parent() else {
        return Role::Read;
    };
    match parent.kind() {
        // Attribute members are not variables; the object root reads.
        "attribute" => {
            if is_field(parent, "attribute", node) {
                Role::Skip
            } else {
                Role::Read
            }
        }
        "keyword_argument" => {
            if is_field(parent, "name", node) {
                Role::Skip
            } else {
                Role::Read
            }
        }
        // Import machinery is handled by the import model, not the name walk.
        "dotted_name" | "aliased_import" | "import_statement" | "import_from_statement"
        | "future_import_statement" | "relative_import" | "wildcard_import" => Role::Skip,
        "function_definition" | "class_definition" => {
            if is_field(parent, "name", node) {
                Role::Write
            } else {
                Role::Read
            }
        }
        "parameters" | "lambda_parameters" | "pattern_list" | "tuple_pattern" | "list_pattern"
        | "as_pattern_target" => Role::Write,
        "list_splat_pattern" | "dictionary_splat_pattern" => Role::Write,
        "typed_parameter" => {
            if is_field(parent, "type", node) {
                Role::Read
            } else {
                Role::Write
            }
        }
        "default_parameter" | "typed_default_parameter" => {
            if is_field(parent, "name", node) {
                Role::Write
            } else {
                Role::Read
            }
        }
        "assignment" => {
            if is_field(parent, "left", node) {
                Role::Write
            } else {
                Role::Read
            }
        }
        "augmented_assignment" => {
            if is_field(parent, "left", node) {
                Role::ReadWrite
            } else {
                Role::Read
            }
        }
        "named_expression" => {
            if is_field(parent, "name", node) {
                Role::Write
            } else {
                Role::Read
            }
        }
        "for_statement" | "for_in_clause" => {
            if is_field(parent, "left", node) {
                Role::Write
            } else {
                Role::Read
            }
        }
        // A global/nonlocal name refers to an outer binding: keeping it a
        // read makes it show up free, which is the fail-closed direction.
        "global_statement" | "nonlocal_statement" => Role::Read,
        _ => Role::Read,
    }
}

static PY_BUILTINS: Lazy<BTreeSet<&'static str>> = Lazy::new(|| {
    [
        "abs", "aiter", "all", "anext", "any", "ascii", "bin", "bool", "breakpoint", "bytearray",
        "bytes", "callable", "chr", "classmethod", "compile", "complex", "delattr", "dict", "dir",
        "divmod", "enumerate", "eval", "exec", "filter", "float", "format", "frozenset", "getattr",
        "globals", "hasattr", "hash", "hex", "id", "input", "int", "isinstance", "issubclass",
        "iter", "len", "list", "locals", "map", "max", "memoryview", "min", "next", "object",
        "oct", "open", "ord", "pow", "print", "property", "range", "repr", "reversed", "round",
        "set", "setattr", "slice", "sorted", "staticmethod", "str", "sum", "super", "tuple",
        "type", "vars", "zip", "__import__", "__name__", "__file__", "__doc__", "__debug__",
        "True", "False", "None", "NotImplemented", "Ellipsis", "BaseException", "Exception",
        "ArithmeticError", "AssertionError", "AttributeError", "BlockingIOError", "BrokenPipeError",
        "BufferError", "BytesWarning", "ChildProcessError", "ConnectionAbortedError",
        "ConnectionError", "ConnectionRefusedError", "ConnectionResetError", "DeprecationWarning",
        "EOFError", "EncodingWarning", "FileExistsError", "FileNotFoundError", "FloatingPointError",
        "FutureWarning", "GeneratorExit", "IOError", "ImportError", "ImportWarning",
        "IndentationError", "IndexError", "InterruptedError", "IsADirectoryError", "KeyError",
        "KeyboardInterrupt", "LookupError", "MemoryError", "ModuleNotFoundError", "NameError",
        "NotADirectoryError", "NotImplementedError", "OSError", "OverflowError",
        "PendingDeprecationWarning", "PermissionError", "ProcessLookupError", "RecursionError",
        "ReferenceError", "ResourceWarning", "RuntimeError", "RuntimeWarning", "SyntaxWarning",
        "StopAsyncIteration", "StopIteration", "SyntaxError", "SystemError", "SystemExit",
        "TabError", "TimeoutError", "TypeError", "UnboundLocalError", "UnicodeDecodeError",
        "UnicodeEncodeError", "UnicodeError", "UnicodeTranslateError", "UnicodeWarning",
        "UserWarning", "ValueError", "Warning", "ZeroDivisionError",
    ]
    .into_iter()
    .collect()
});
