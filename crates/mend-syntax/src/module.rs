//! Parsed source modules
//!
//! [`ParsedModule`] owns the source text and its syntax tree together so node
//! ranges always index into the text they were produced from.

use once_cell::sync::Lazy;
use tree_sitter::{Language, Node, Parser, Tree};

static PYTHON: Lazy<Language> = Lazy::new(|| tree_sitter_python::LANGUAGE.into());

/// Errors from parsing source text
#[derive(Debug, thiserror::Error)]
pub enum SyntaxError {
    /// The grammar could not be loaded into the parser
    #[error("grammar rejected by parser: {0}")]
    Grammar(String),

    /// The parser produced no tree (cancellation or internal failure)
    #[error("parser produced no tree")]
    ParseFailed,

    /// The tree parsed but contains syntax errors
    #[error("source contains syntax errors near line {line}")]
    Invalid {
        /// 1-based line of the first error node
        line: usize,
    },
}

/// Owned source + syntax tree pair
pub struct ParsedModule {
    source: String,
    tree: Tree,
}

impl ParsedModule {
    /// Parse source text
    ///
    /// The tree is kept even when it contains error nodes; use
    /// [`ParsedModule::has_errors`] or [`ParsedModule::check_valid`] where
    /// validity matters.
    ///
    /// # Errors
    /// [`SyntaxError::Grammar`] or [`SyntaxError::ParseFailed`].
    pub fn parse(source: &str) -> Result<Self, SyntaxError> {
        let mut parser = Parser::new();
        parser
            .set_language(&PYTHON)
            .map_err(|e| SyntaxError::Grammar(e.to_string()))?;
        let tree = parser
            .parse(source, None)
            .ok_or(SyntaxError::ParseFailed)?;
        Ok(Self {
            source: source.to_string(),
            tree,
        })
    }

    /// The source text
    #[inline]
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Root node of the tree
    #[inline]
    #[must_use]
    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }

    /// Whether the tree contains any error or missing nodes
    #[inline]
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.tree.root_node().has_error()
    }

    /// Reject trees with syntax errors
    ///
    /// # Errors
    /// [`SyntaxError::Invalid`] naming the first error line.
    pub fn check_valid(&self) -> Result<(), SyntaxError> {
        if !self.has_errors() {
            return Ok(());
        }
        let line = first_error_line(self.root()).unwrap_or(1);
        Err(SyntaxError::Invalid { line })
    }

    /// Text of a node, empty when the range is somehow out of bounds
    #[inline]
    #[must_use]
    pub fn text(&self, node: Node<'_>) -> &str {
        self.source.get(node.byte_range()).unwrap_or("")
    }

    /// Text of a byte range, empty when out of bounds
    #[inline]
    #[must_use]
    pub fn slice(&self, range: std::ops::Range<usize>) -> &str {
        self.source.get(range).unwrap_or("")
    }

    /// 1-based start line of a node
    #[inline]
    #[must_use]
    pub fn start_line(&self, node: Node<'_>) -> usize {
        node.start_position().row + 1
    }

    /// Number of source lines a node spans
    #[inline]
    #[must_use]
    pub fn line_span(&self, node: Node<'_>) -> usize {
        node.end_position().row - node.start_position().row + 1
    }

    /// Expand a byte range to whole lines: back over leading indentation and
    /// forward through the trailing newline
    #[must_use]
    pub fn expand_to_lines(&self, range: std::ops::Range<usize>) -> std::ops::Range<usize> {
        let bytes = self.source.as_bytes();
        let mut start = range.start.min(self.source.len());
        while start > 0 && matches!(bytes.get(start - 1), Some(b' ' | b'\t')) {
            start -= 1;
        }
        let mut end = range.end.min(self.source.len());
        if bytes.get(end) == Some(&b'\r') {
            end += 1;
        }
        if bytes.get(end) == Some(&b'\n') {
            end += 1;
        }
        start..end
    }

    /// Smallest node covering a byte range
    #[must_use]
    pub fn covering_node(&self, range: std::ops::Range<usize>) -> Option<Node<'_>> {
        self.root().descendant_for_byte_range(range.start, range.end)
    }
}

impl std::fmt::Debug for ParsedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParsedModule")
            .field("len", &self.source.len())
            .field("has_errors", &self.has_errors())
            .finish()
    }
}

fn first_error_line(node: Node<'_>) -> Option<usize> {
    if node.is_error() || node.is_missing() {
        return Some(node.start_position().row + 1);
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.has_error() {
            if let Some(line) = first_error_line(child) {
                return Some(line);
            }
        }
    }
    None
}

/// Depth-first walk over a subtree, visiting every node
pub(crate) fn walk_tree<'t>(node: Node<'t>, f: &mut impl FnMut(Node<'t>)) {
    f(node);
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        walk_tree(child, f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_module() {
        let module = ParsedModule::parse("import os\nx = 1\n").unwrap();
        assert!(!module.has_errors());
        assert_eq!(module.root().kind(), "module");
        assert!(module.check_valid().is_ok());
    }

    #[test]
    fn parse_detects_syntax_errors() {
        let module = ParsedModule::parse("def broken(:\n    pass\n").unwrap();
        assert!(module.has_errors());
        assert!(matches!(
            module.check_valid(),
            Err(SyntaxError::Invalid { .. })
        ));
    }

    #[test]
    fn node_text_matches_source() {
        let module = ParsedModule::parse("value = 42\n").unwrap();
        let root = module.root();
        let stmt = root.named_child(0).unwrap();
        assert_eq!(module.text(stmt), "value = 42");
        assert_eq!(module.start_line(stmt), 1);
    }

    #[test]
    fn expand_to_lines_takes_indent_and_newline() {
        let source = "def f():\n    return 1\n";
        let module = ParsedModule::parse(source).unwrap();
        let mut found = None;
        super::walk_tree(module.root(), &mut |n| {
            if n.kind() == "return_statement" {
                found = Some(n.byte_range());
            }
        });
        let widened = module.expand_to_lines(found.unwrap());
        assert_eq!(&source[widened], "    return 1\n");
    }

    #[test]
    fn expand_to_lines_plain_statement() {
        let module = ParsedModule::parse("a = 1\nb = 2\n").unwrap();
        let stmt = module.root().named_child(0).unwrap();
        let range = module.expand_to_lines(stmt.byte_range());
        assert_eq!(&module.source()[range], "a = 1\n");
    }

    #[test]
    fn line_span_counts_inclusive() {
        let module = ParsedModule::parse("def f():\n    a = 1\n    return a\n").unwrap();
        let def = module.root().named_child(0).unwrap();
        assert_eq!(module.line_span(def), 3);
    }
}
