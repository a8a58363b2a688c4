//! Python syntax trees parsed with tree-sitter.
//!
//! Line endings follow universal-newline rules: `\n`, `\r\n` and a lone `\r` each end a line,
//! both in the tree's row numbers and in [`split_lines`].

use tree_sitter::{Node, Parser, Tree};

use crate::domain::errors::ParseError;

/// Longest source excerpt quoted in a syntax error message.
const MAX_EXCERPT: usize = 40;

/// A compilation unit that parsed without syntax errors.
pub(crate) struct SyntaxTree {
    source: String,
    tree: Tree,
}

impl SyntaxTree {
    /// Parse `source`, failing on the first syntax error anywhere in the unit.
    pub fn parse(source: &str) -> Result<Self, ParseError> {
        let source = normalize_newlines(source);
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_python::language())
            .map_err(|err| ParseError::new(0, 0, format!("failed to load Python grammar: {err}")))?;
        let tree = parser
            .parse(&source, None)
            .ok_or_else(|| ParseError::new(0, 0, "parser produced no syntax tree"))?;

        let root = tree.root_node();
        if root.has_error() {
            return Err(first_error(root, &source));
        }
        Ok(Self { source, tree })
    }

    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }

    pub fn text(&self, node: Node<'_>) -> &str {
        self.source.get(node.byte_range()).unwrap_or_default()
    }
}

/// Split into lines, keeping each line's own terminator.
pub(crate) fn split_lines(source: &str) -> Vec<String> {
    let bytes = source.as_bytes();
    let mut lines = Vec::new();
    let mut start = 0;
    let mut index = 0;
    while index < bytes.len() {
        let end = match bytes[index] {
            b'\n' => Some(index),
            b'\r' if bytes.get(index + 1) == Some(&b'\n') => Some(index + 1),
            b'\r' => Some(index),
            _ => None,
        };
        if let Some(end) = end {
            lines.push(source[start..=end].to_owned());
            start = end + 1;
            index = end;
        }
        index += 1;
    }
    if start < source.len() {
        lines.push(source[start..].to_owned());
    }
    lines
}

/// First and last line (1-based, inclusive) covered by `node`.
pub(crate) fn line_span(node: Node<'_>) -> (usize, usize) {
    let start = node.start_position();
    let end = node.end_position();
    let last = if end.column == 0 && end.row > start.row {
        end.row
    } else {
        end.row + 1
    };
    (start.row + 1, last)
}

/// Syntax error reported at the start of `node`.
pub(crate) fn error_at(node: Node<'_>, message: impl Into<String>) -> ParseError {
    let position = node.start_position();
    ParseError::new(position.row + 1, position.column, message)
}

fn normalize_newlines(source: &str) -> String {
    source.replace("\r\n", "\n").replace('\r', "\n")
}

fn first_error(root: Node<'_>, source: &str) -> ParseError {
    let mut current = root;
    loop {
        if current.is_missing() {
            return error_at(current, format!("expected '{}'", current.kind()));
        }
        if current.is_error() {
            let excerpt: String = source
                .get(current.byte_range())
                .unwrap_or_default()
                .lines()
                .next()
                .unwrap_or_default()
                .trim()
                .chars()
                .take(MAX_EXCERPT)
                .collect();
            if excerpt.is_empty() {
                return error_at(current, "invalid syntax");
            }
            return error_at(current, format!("invalid syntax near '{excerpt}'"));
        }
        let next = (0..current.child_count())
            .filter_map(|index| current.child(index))
            .find(|child| child.is_missing() || child.has_error());
        match next {
            Some(child) => current = child,
            None => return error_at(current, "invalid syntax"),
        }
    }
}
