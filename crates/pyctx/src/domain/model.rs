//! Domain models for import declarations, symbol locations, and project trees.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// A single import binding extracted from a compilation unit.
///
/// Statements that bind several names (`import a, b` or `from x import a, b`) produce one
/// declaration per name, all sharing the position of the statement's first token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImportDeclaration {
    Plain(PlainImport),
    From(FromImport),
}

/// `import module.path [as alias]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlainImport {
    pub module_path: String,
    pub alias: Option<String>,
    pub line: usize,
    pub column: usize,
}

/// `from [.]*module.path import symbol [as alias]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FromImport {
    pub module_path: String,
    pub symbol_name: String,
    pub alias: Option<String>,
    pub relative_depth: usize,
    pub line: usize,
    pub column: usize,
}

impl FromImport {
    pub fn is_relative(&self) -> bool {
        self.relative_depth > 0 || self.module_path.is_empty()
    }

    pub fn is_wildcard(&self) -> bool {
        self.symbol_name == "*"
    }

    /// Name the statement binds in the importing namespace.
    pub fn bound_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.symbol_name)
    }
}

impl PlainImport {
    /// Name the statement binds in the importing namespace.
    ///
    /// `import a.b` binds `a`, while `import a.b as c` binds `c`.
    pub fn bound_name(&self) -> &str {
        match &self.alias {
            Some(alias) => alias,
            None => root_segment(&self.module_path),
        }
    }
}

impl ImportDeclaration {
    pub fn line(&self) -> usize {
        match self {
            ImportDeclaration::Plain(plain) => plain.line,
            ImportDeclaration::From(from) => from.line,
        }
    }

    pub fn column(&self) -> usize {
        match self {
            ImportDeclaration::Plain(plain) => plain.column,
            ImportDeclaration::From(from) => from.column,
        }
    }

    pub fn module_path(&self) -> &str {
        match self {
            ImportDeclaration::Plain(plain) => &plain.module_path,
            ImportDeclaration::From(from) => &from.module_path,
        }
    }

    pub fn is_relative(&self) -> bool {
        match self {
            ImportDeclaration::Plain(_) => false,
            ImportDeclaration::From(from) => from.is_relative(),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, ImportDeclaration::From(from) if from.is_wildcard())
    }

    /// First segment of the imported module path (empty for `from . import x`).
    pub fn root_module(&self) -> &str {
        root_segment(self.module_path())
    }

    pub fn bound_name(&self) -> &str {
        match self {
            ImportDeclaration::Plain(plain) => plain.bound_name(),
            ImportDeclaration::From(from) => from.bound_name(),
        }
    }
}

fn root_segment(module_path: &str) -> &str {
    module_path.split('.').next().unwrap_or_default()
}

impl fmt::Display for ImportDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportDeclaration::Plain(plain) => {
                write!(f, "import {}", plain.module_path)?;
                if let Some(alias) = &plain.alias {
                    write!(f, " as {alias}")?;
                }
                Ok(())
            }
            ImportDeclaration::From(from) => {
                let dots = ".".repeat(from.relative_depth);
                write!(f, "from {dots}{} import {}", from.module_path, from.symbol_name)?;
                if let Some(alias) = from.alias.as_ref().filter(|_| !from.is_wildcard()) {
                    write!(f, " as {alias}")?;
                }
                Ok(())
            }
        }
    }
}

/// Dotted module identity such as `pkg.sub.unit`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
#[serde(into = "String")]
pub struct ModuleIdentity {
    segments: Vec<String>,
}

impl ModuleIdentity {
    pub fn new(segments: Vec<String>) -> Self {
        Self { segments }
    }

    /// Parse a dotted path. Empty segments are dropped, so `""` yields an empty identity.
    pub fn parse(dotted: &str) -> Self {
        Self {
            segments: dotted
                .split('.')
                .filter(|segment| !segment.is_empty())
                .map(str::to_owned)
                .collect(),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn first(&self) -> Option<&str> {
        self.segments.first().map(String::as_str)
    }

    pub fn last(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Identity extended by the segments of a dotted path.
    pub fn join(&self, dotted: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(
            dotted
                .split('.')
                .filter(|segment| !segment.is_empty())
                .map(str::to_owned),
        );
        Self { segments }
    }
}

impl fmt::Display for ModuleIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

impl From<ModuleIdentity> for String {
    fn from(value: ModuleIdentity) -> Self {
        value.to_string()
    }
}

/// Where a symbol is defined, as far as the locator could tell.
///
/// Line information and source text are present together or not at all. The defining file can
/// be known on its own, e.g. for wildcard imports or objects without retrievable source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SymbolLocation {
    defining_file: Option<PathBuf>,
    start_line: Option<usize>,
    end_line: Option<usize>,
    source_text: Option<String>,
    representation: Option<String>,
    qualified_name: Option<String>,
}

impl SymbolLocation {
    /// A location with every field absent.
    pub fn absent() -> Self {
        Self::default()
    }

    pub fn file_only(defining_file: impl Into<PathBuf>) -> Self {
        Self {
            defining_file: Some(defining_file.into()),
            ..Self::default()
        }
    }

    /// Build a location from the captured lines starting at `start_line` (1-based).
    pub fn with_source(
        defining_file: impl Into<PathBuf>,
        start_line: usize,
        lines: &[String],
    ) -> Self {
        let start_line = start_line.max(1);
        let end_line = start_line + lines.len().saturating_sub(1);
        Self {
            defining_file: Some(defining_file.into()),
            start_line: Some(start_line),
            end_line: Some(end_line),
            source_text: Some(lines.concat()),
            ..Self::default()
        }
    }

    pub fn with_representation(mut self, representation: impl Into<String>) -> Self {
        self.representation = Some(representation.into());
        self
    }

    pub fn with_qualified_name(mut self, qualified_name: impl Into<String>) -> Self {
        self.qualified_name = Some(qualified_name.into());
        self
    }

    pub fn defining_file(&self) -> Option<&Path> {
        self.defining_file.as_deref()
    }

    pub fn start_line(&self) -> Option<usize> {
        self.start_line
    }

    pub fn end_line(&self) -> Option<usize> {
        self.end_line
    }

    pub fn source_text(&self) -> Option<&str> {
        self.source_text.as_deref()
    }

    /// Plain textual form of the located object, used when no source is available.
    pub fn representation(&self) -> Option<&str> {
        self.representation.as_deref()
    }

    /// Fully qualified dotted name of the located object.
    pub fn qualified_name(&self) -> Option<&str> {
        self.qualified_name.as_deref()
    }

    pub fn has_source(&self) -> bool {
        self.source_text.is_some()
    }

    pub fn is_absent(&self) -> bool {
        self.defining_file.is_none() && self.source_text.is_none()
    }
}

/// One source file under analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationUnit {
    pub absolute_path: PathBuf,
    /// Lines with their terminators preserved, so concatenation reproduces the file.
    pub raw_lines: Vec<String>,
    pub declarations: Vec<ImportDeclaration>,
}

impl CompilationUnit {
    pub fn source_code(&self) -> String {
        self.raw_lines.concat()
    }
}

/// Whether a tree node stands for a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    File,
    Directory,
}

/// Node of a pruned project tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeNode {
    pub name: String,
    pub kind: NodeKind,
    pub children: Vec<TreeNode>,
    pub focus_label: Option<String>,
}

impl TreeNode {
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::File,
            children: Vec::new(),
            focus_label: None,
        }
    }

    pub fn directory(name: impl Into<String>, children: Vec<TreeNode>) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Directory,
            children,
            focus_label: None,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    /// Find a direct child by name.
    pub fn child(&self, name: &str) -> Option<&TreeNode> {
        self.children.iter().find(|child| child.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_declarations_like_source() {
        let plain = ImportDeclaration::Plain(PlainImport {
            module_path: "os.path".into(),
            alias: Some("osp".into()),
            line: 1,
            column: 0,
        });
        assert_eq!(plain.to_string(), "import os.path as osp");

        let from = ImportDeclaration::From(FromImport {
            module_path: "other".into(),
            symbol_name: "thing".into(),
            alias: None,
            relative_depth: 2,
            line: 3,
            column: 4,
        });
        assert_eq!(from.to_string(), "from ..other import thing");
        assert!(from.is_relative());

        let package = ImportDeclaration::From(FromImport {
            module_path: String::new(),
            symbol_name: "*".into(),
            alias: Some("ignored".into()),
            relative_depth: 1,
            line: 1,
            column: 0,
        });
        assert_eq!(package.to_string(), "from . import *");
        assert!(package.is_wildcard());
    }

    #[test]
    fn bound_names_follow_binding_rules() {
        let plain = PlainImport {
            module_path: "a.b".into(),
            alias: None,
            line: 1,
            column: 0,
        };
        assert_eq!(plain.bound_name(), "a");

        let from = FromImport {
            module_path: "x".into(),
            symbol_name: "y".into(),
            alias: Some("z".into()),
            relative_depth: 0,
            line: 1,
            column: 0,
        };
        assert_eq!(from.bound_name(), "z");
    }

    #[test]
    fn symbol_location_end_line_counts_captured_lines() {
        let lines = vec!["def f():\n".to_string(), "    return 1\n".to_string()];
        let location = SymbolLocation::with_source("/tmp/m.py", 10, &lines);
        assert_eq!(location.start_line(), Some(10));
        assert_eq!(location.end_line(), Some(11));
        assert_eq!(location.source_text(), Some("def f():\n    return 1\n"));
        assert!(SymbolLocation::absent().is_absent());
    }

    #[test]
    fn module_identity_parses_and_joins() {
        let identity = ModuleIdentity::parse("pkg.sub");
        assert_eq!(identity.len(), 2);
        assert_eq!(identity.join("other.thing").to_string(), "pkg.sub.other.thing");
        assert!(ModuleIdentity::parse("").is_empty());
    }
}
