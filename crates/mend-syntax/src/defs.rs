//! Definition lookup: functions, classes, and module-level structure
//!
//! Everything here answers "where is X and what shape does it have" so the
//! transforms can lift whole definitions by byte range without re-deriving
//! grammar details.

use tree_sitter::Node;

use crate::analysis::ByteRange;
use crate::module::{walk_tree, ParsedModule};

/// What a top-level definition is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefKind {
    /// `def` at module level
    Function,
    /// `class` at module level
    Class,
    /// Simple `name = ...` at module level
    Assignment,
}

/// One direct child of the module worth moving or referencing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopLevelDef {
    /// Definition category
    pub kind: DefKind,
    /// Bound name
    pub name: String,
    /// Full extent, including decorators
    pub range: ByteRange,
    /// 1-based first line
    pub start_line: usize,
    /// 1-based last line
    pub end_line: usize,
}

/// A function definition with the ranges transforms cut along
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionInfo {
    /// Function name
    pub name: String,
    /// The `def` statement itself
    pub range: ByteRange,
    /// The `def` plus any decorators
    pub full_range: ByteRange,
    /// The parameter list, parentheses included
    pub params_range: ByteRange,
    /// The indented body block
    pub body_range: ByteRange,
    /// Bare parameter names in order
    pub params: Vec<String>,
    /// 1-based first line of `full_range`
    pub start_line: usize,
    /// 1-based last line
    pub end_line: usize,
    /// Whether declared `async def`
    pub is_async: bool,
}

impl FunctionInfo {
    /// Line count of the full definition
    #[must_use]
    pub fn line_count(&self) -> usize {
        self.end_line.saturating_sub(self.start_line) + 1
    }
}

/// One method inside a class body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    /// Method name
    pub name: String,
    /// Full extent, including decorators
    pub range: ByteRange,
    /// The `def` statement alone
    pub def_range: ByteRange,
    /// The parameter list, parentheses included
    pub params_range: ByteRange,
    /// Bare parameter names in order
    pub params: Vec<String>,
    /// Whether the body mentions `self`
    pub reads_self: bool,
    /// 1-based first line
    pub start_line: usize,
    /// 1-based last line
    pub end_line: usize,
}

/// A class definition with its methods
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassInfo {
    /// Class name
    pub name: String,
    /// The `class` statement itself
    pub range: ByteRange,
    /// The `class` plus any decorators
    pub full_range: ByteRange,
    /// The indented body block
    pub body_range: ByteRange,
    /// Superclass expressions as written
    pub bases: Vec<String>,
    /// Methods in source order
    pub methods: Vec<MethodInfo>,
    /// 1-based first line of `full_range`
    pub start_line: usize,
    /// 1-based last line
    pub end_line: usize,
}

impl ClassInfo {
    /// Line count of the full definition
    #[must_use]
    pub fn line_count(&self) -> usize {
        self.end_line.saturating_sub(self.start_line) + 1
    }
}

/// Direct children of the module that bind a name, in source order.
#[must_use]
pub fn top_level_defs(module: &ParsedModule) -> Vec<TopLevelDef> {
    let root = module.root();
    let mut cursor = root.walk();
    let mut out = Vec::new();
    for child in root.named_children(&mut cursor) {
        let (def, full) = unwrap_decorated(child);
        match def.kind() {
            "function_definition" | "class_definition" => {
                if let Some(name) = def.child_by_field_name("name") {
                    let kind = if def.kind() == "function_definition" {
                        DefKind::Function
                    } else {
                        DefKind::Class
                    };
                    out.push(TopLevelDef {
                        kind,
                        name: module.text(name).to_string(),
                        range: full.byte_range(),
                        start_line: module.start_line(full),
                        end_line: end_line(module, full),
                    });
                }
            }
            "expression_statement" => {
                if let Some(name) = simple_assignment_target(module, def) {
                    out.push(TopLevelDef {
                        kind: DefKind::Assignment,
                        name,
                        range: def.byte_range(),
                        start_line: module.start_line(def),
                        end_line: end_line(module, def),
                    });
                }
            }
            _ => {}
        }
    }
    out
}

/// Byte range of the module docstring, if the file opens with one.
#[must_use]
pub fn module_docstring_range(module: &ParsedModule) -> Option<ByteRange> {
    let first = module.root().named_child(0)?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let inner = first.named_child(0)?;
    (inner.kind() == "string").then(|| first.byte_range())
}

/// Names listed in a top-level `__all__ = [...]`, if present.
#[must_use]
pub fn dunder_all_names(module: &ParsedModule) -> Option<Vec<String>> {
    let root = module.root();
    let mut cursor = root.walk();
    for child in root.named_children(&mut cursor) {
        if child.kind() != "expression_statement" {
            continue;
        }
        let Some(assignment) = child.named_child(0).filter(|n| n.kind() == "assignment") else {
            continue;
        };
        let Some(left) = assignment.child_by_field_name("left") else {
            continue;
        };
        if left.kind() != "identifier" || module.text(left) != "__all__" {
            continue;
        }
        let Some(right) = assignment.child_by_field_name("right") else {
            continue;
        };
        if !matches!(right.kind(), "list" | "tuple") {
            continue;
        }
        let mut names = Vec::new();
        let mut elements = right.walk();
        for element in right.named_children(&mut elements) {
            if element.kind() == "string" {
                if let Some(content) = string_content(module, element) {
                    names.push(content);
                }
            }
        }
        return Some(names);
    }
    None
}

/// Finds a function by name, preferring top-level definitions and falling
/// back to any nesting depth.
#[must_use]
pub fn find_function(module: &ParsedModule, name: &str) -> Option<FunctionInfo> {
    find_definition(module, "function_definition", name).map(|(def, full)| {
        function_info(module, def, full)
    })
}

/// Finds a class by name, preferring top-level definitions and falling back
/// to any nesting depth.
#[must_use]
pub fn find_class(module: &ParsedModule, name: &str) -> Option<ClassInfo> {
    let (def, full) = find_definition(module, "class_definition", name)?;
    let body = def.child_by_field_name("body")?;
    let bases = def
        .child_by_field_name("superclasses")
        .map(|sup| {
            let mut cursor = sup.walk();
            sup.named_children(&mut cursor)
                .map(|b| module.text(b).to_string())
                .collect()
        })
        .unwrap_or_default();
    let mut methods = Vec::new();
    let mut cursor = body.walk();
    for child in body.named_children(&mut cursor) {
        let (inner, outer) = unwrap_decorated(child);
        if inner.kind() != "function_definition" {
            continue;
        }
        let Some(method_name) = inner.child_by_field_name("name") else {
            continue;
        };
        let mut reads_self = false;
        if let Some(method_body) = inner.child_by_field_name("body") {
            walk_tree(method_body, &mut |n| {
                if n.kind() == "identifier" && module.text(n) == "self" {
                    reads_self = true;
                }
            });
        }
        methods.push(MethodInfo {
            name: module.text(method_name).to_string(),
            range: outer.byte_range(),
            def_range: inner.byte_range(),
            params_range: inner
                .child_by_field_name("parameters")
                .map_or_else(|| inner.byte_range(), |p| p.byte_range()),
            params: param_names(module, inner),
            reads_self,
            start_line: module.start_line(outer),
            end_line: end_line(module, outer),
        });
    }
    Some(ClassInfo {
        name: name.to_string(),
        range: def.byte_range(),
        full_range: full.byte_range(),
        body_range: body.byte_range(),
        bases,
        methods,
        start_line: module.start_line(full),
        end_line: end_line(module, full),
    })
}

/// One compound-statement body eligible for helper extraction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    /// 1-based line of the owning statement (`if`/`for`/`while`/`try`/`with`)
    pub start_line: usize,
    /// Byte range of the indented body
    pub body_range: ByteRange,
    /// Nesting depth below the enclosing function
    pub depth: usize,
    /// Lines the body spans
    pub line_count: usize,
}

/// A call expression to a named callee
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    /// Byte range of the argument list, parentheses included
    pub args_range: ByteRange,
    /// Whether the call already passes arguments
    pub has_args: bool,
}

/// Compound-statement bodies anywhere inside `parent`, with nesting depth.
#[must_use]
pub fn candidate_blocks(module: &ParsedModule, parent: &FunctionInfo) -> Vec<BlockInfo> {
    let Some(parent_node) = module.covering_node(parent.range.clone()) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    collect_blocks(module, parent_node, 0, &mut out);
    out
}

fn collect_blocks(module: &ParsedModule, node: Node<'_>, depth: usize, out: &mut Vec<BlockInfo>) {
    let body_field = match node.kind() {
        "if_statement" | "elif_clause" => Some("consequence"),
        "for_statement" | "while_statement" | "try_statement" | "with_statement"
        | "else_clause" => Some("body"),
        _ => None,
    };
    if let Some(field) = body_field {
        if let Some(body) = node.child_by_field_name(field) {
            out.push(BlockInfo {
                start_line: module.start_line(node),
                body_range: body.byte_range(),
                depth,
                line_count: module.line_span(body),
            });
        }
    }
    let nests = matches!(
        node.kind(),
        "if_statement" | "for_statement" | "while_statement" | "try_statement" | "with_statement"
    );
    let next_depth = if nests { depth + 1 } else { depth };
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_blocks(module, child, next_depth, out);
    }
}

/// Calls to `callee` (bare name) fully inside `region`.
#[must_use]
pub fn call_sites(module: &ParsedModule, region: &ByteRange, callee: &str) -> Vec<CallSite> {
    let Some(covering) = module.covering_node(region.clone()) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    walk_tree(covering, &mut |node| {
        if node.kind() != "call"
            || node.start_byte() < region.start
            || node.end_byte() > region.end
        {
            return;
        }
        let Some(function) = node.child_by_field_name("function") else {
            return;
        };
        if function.kind() != "identifier" || module.text(function) != callee {
            return;
        }
        if let Some(args) = node.child_by_field_name("arguments") {
            out.push(CallSite {
                args_range: args.byte_range(),
                has_args: args.named_child_count() > 0,
            });
        }
    });
    out
}

/// Functions defined directly in `parent`'s body, in source order.
#[must_use]
pub fn nested_functions(module: &ParsedModule, parent: &FunctionInfo) -> Vec<FunctionInfo> {
    let Some(parent_node) = module.covering_node(parent.range.clone()) else {
        return Vec::new();
    };
    let Some(body) = parent_node.child_by_field_name("body") else {
        return Vec::new();
    };
    let mut out = Vec::new();
    let mut cursor = body.walk();
    for child in body.named_children(&mut cursor) {
        let (def, full) = unwrap_decorated(child);
        if def.kind() == "function_definition" {
            out.push(function_info(module, def, full));
        }
    }
    out
}

fn find_definition<'t>(
    module: &'t ParsedModule,
    def_kind: &str,
    name: &str,
) -> Option<(Node<'t>, Node<'t>)> {
    let root = module.root();
    let mut cursor = root.walk();
    for child in root.named_children(&mut cursor) {
        let (def, full) = unwrap_decorated(child);
        if def.kind() == def_kind && named(module, def) == Some(name) {
            return Some((def, full));
        }
    }
    let mut found = None;
    walk_tree(root, &mut |node| {
        if found.is_none() && node.kind() == def_kind && named(module, node) == Some(name) {
            let full = node
                .parent()
                .filter(|p| p.kind() == "decorated_definition")
                .unwrap_or(node);
            found = Some((node, full));
        }
    });
    found
}

fn named<'t>(module: &'t ParsedModule, node: Node<'t>) -> Option<&'t str> {
    node.child_by_field_name("name").map(|n| module.text(n))
}

fn unwrap_decorated(node: Node<'_>) -> (Node<'_>, Node<'_>) {
    if node.kind() == "decorated_definition" {
        match node.child_by_field_name("definition") {
            Some(def) => (def, node),
            None => (node, node),
        }
    } else {
        (node, node)
    }
}

fn function_info(module: &ParsedModule, def: Node<'_>, full: Node<'_>) -> FunctionInfo {
    let name = named(module, def).unwrap_or("").to_string();
    let body_range = def
        .child_by_field_name("body")
        .map_or_else(|| def.byte_range(), |b| b.byte_range());
    FunctionInfo {
        name,
        range: def.byte_range(),
        full_range: full.byte_range(),
        params_range: def
            .child_by_field_name("parameters")
            .map_or_else(|| def.byte_range(), |p| p.byte_range()),
        body_range,
        params: param_names(module, def),
        start_line: module.start_line(full),
        end_line: end_line(module, full),
        is_async: module.text(def).starts_with("async"),
    }
}

fn end_line(module: &ParsedModule, node: Node<'_>) -> usize {
    module.start_line(node) + module.line_span(node) - 1
}

fn param_names(module: &ParsedModule, def: Node<'_>) -> Vec<String> {
    let Some(params) = def.child_by_field_name("parameters") else {
        return Vec::new();
    };
    let mut out = Vec::new();
    let mut cursor = params.walk();
    for child in params.named_children(&mut cursor) {
        match child.kind() {
            "identifier" => out.push(module.text(child).to_string()),
            "default_parameter" | "typed_default_parameter" => {
                if let Some(name) = child.child_by_field_name("name") {
                    out.push(module.text(name).to_string());
                }
            }
            "typed_parameter" => {
                if let Some(inner) = child.named_child(0) {
                    if let Some(name) = splat_or_identifier(module, inner) {
                        out.push(name);
                    }
                }
            }
            "list_splat_pattern" | "dictionary_splat_pattern" => {
                if let Some(name) = splat_or_identifier(module, child) {
                    out.push(name);
                }
            }
            _ => {}
        }
    }
    out
}

fn splat_or_identifier(module: &ParsedModule, node: Node<'_>) -> Option<String> {
    match node.kind() {
        "identifier" => Some(module.text(node).to_string()),
        "list_splat_pattern" | "dictionary_splat_pattern" => node
            .named_child(0)
            .filter(|n| n.kind() == "identifier")
            .map(|n| module.text(n).to_string()),
        _ => None,
    }
}

fn simple_assignment_target(module: &ParsedModule, statement: Node<'_>) -> Option<String> {
    let assignment = statement
        .named_child(0)
        .filter(|n| n.kind() == "assignment")?;
    let left = assignment.child_by_field_name("left")?;
    (left.kind() == "identifier").then(|| module.text(left).to_string())
}

fn string_content(module: &ParsedModule, string: Node<'_>) -> Option<String> {
    let mut found = None;
    walk_tree(string, &mut |n| {
        if found.is_none() && n.kind() == "string_content" {
            found = Some(module.text(n).to_string());
        }
    });
    found
}
