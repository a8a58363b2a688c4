//! Import declaration extraction.

use tree_sitter::Node;

use crate::app::syntax::{self, SyntaxTree};
use crate::domain::errors::ParseError;
use crate::domain::model::{FromImport, ImportDeclaration, PlainImport};

/// Keywords that may not be used as module or symbol names.
const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if",
    "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try",
    "while", "with", "yield",
];

/// Extract every import declaration in source-appearance order.
///
/// Imports nested in functions, classes, or conditional blocks are included. Any syntax error
/// in the unit, inside an import statement or elsewhere, fails the whole extraction.
pub fn extract_imports(source: &str) -> Result<Vec<ImportDeclaration>, ParseError> {
    let tree = SyntaxTree::parse(source)?;
    let mut declarations = Vec::new();
    collect(&tree, tree.root(), Scope::Everywhere, &mut declarations)?;
    Ok(declarations)
}

/// Imports that run when the module itself is imported, i.e. outside function and class bodies.
pub(crate) fn module_level_imports(tree: &SyntaxTree) -> Result<Vec<ImportDeclaration>, ParseError> {
    let mut declarations = Vec::new();
    collect(tree, tree.root(), Scope::ModuleLevel, &mut declarations)?;
    Ok(declarations)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Everywhere,
    ModuleLevel,
}

fn collect(
    tree: &SyntaxTree,
    node: Node<'_>,
    scope: Scope,
    out: &mut Vec<ImportDeclaration>,
) -> Result<(), ParseError> {
    match node.kind() {
        "import_statement" => return plain_import(tree, node, out),
        "import_from_statement" | "future_import_statement" => return from_import(tree, node, out),
        "function_definition" | "class_definition" if scope == Scope::ModuleLevel => return Ok(()),
        "string" | "comment" => return Ok(()),
        _ => {}
    }
    for index in 0..node.named_child_count() {
        if let Some(child) = node.named_child(index) {
            collect(tree, child, scope, out)?;
        }
    }
    Ok(())
}

fn plain_import(
    tree: &SyntaxTree,
    node: Node<'_>,
    out: &mut Vec<ImportDeclaration>,
) -> Result<(), ParseError> {
    reject_bare_trailing_comma(node)?;
    let (line, column) = position(node);
    let mut cursor = node.walk();
    for name in node.children_by_field_name("name", &mut cursor) {
        let (module, alias) = aliased(tree, name)?;
        out.push(ImportDeclaration::Plain(PlainImport {
            module_path: checked(module, dotted_name(tree, module))?,
            alias,
            line,
            column,
        }));
    }
    Ok(())
}

fn from_import(
    tree: &SyntaxTree,
    node: Node<'_>,
    out: &mut Vec<ImportDeclaration>,
) -> Result<(), ParseError> {
    reject_bare_trailing_comma(node)?;
    let (line, column) = position(node);
    let (module_path, relative_depth) = match node.kind() {
        "future_import_statement" => ("__future__".to_owned(), 0),
        _ => {
            let module = node
                .child_by_field_name("module_name")
                .ok_or_else(|| syntax::error_at(node, "expected module name after 'from'"))?;
            let (path, depth) = source_module(tree, module);
            (checked(module, path)?, depth)
        }
    };
    let declaration = |symbol_name: String, alias: Option<String>| {
        ImportDeclaration::From(FromImport {
            module_path: module_path.clone(),
            symbol_name,
            alias,
            relative_depth,
            line,
            column,
        })
    };

    let is_wildcard = (0..node.named_child_count())
        .filter_map(|index| node.named_child(index))
        .any(|child| child.kind() == "wildcard_import");
    if is_wildcard {
        out.push(declaration("*".to_owned(), None));
        return Ok(());
    }

    let mut cursor = node.walk();
    for name in node.children_by_field_name("name", &mut cursor) {
        let (symbol, alias) = aliased(tree, name)?;
        let symbol_name = checked(symbol, dotted_name(tree, symbol))?;
        if symbol_name.contains('.') {
            return Err(syntax::error_at(symbol, "expected a name, found a dotted path"));
        }
        out.push(declaration(symbol_name, alias));
    }
    Ok(())
}

/// Module path and relative depth of a `from` clause.
fn source_module(tree: &SyntaxTree, module: Node<'_>) -> (String, usize) {
    if module.kind() != "relative_import" {
        return (dotted_name(tree, module), 0);
    }
    let mut path = String::new();
    let mut depth = 0;
    for index in 0..module.named_child_count() {
        let Some(child) = module.named_child(index) else {
            continue;
        };
        match child.kind() {
            "import_prefix" => depth = tree.text(child).matches('.').count(),
            "dotted_name" => path = dotted_name(tree, child),
            _ => {}
        }
    }
    (path, depth)
}

/// Split an `x as y` item into the imported node and its alias.
fn aliased<'t>(
    tree: &SyntaxTree,
    name: Node<'t>,
) -> Result<(Node<'t>, Option<String>), ParseError> {
    if name.kind() != "aliased_import" {
        return Ok((name, None));
    }
    let target = name
        .child_by_field_name("name")
        .ok_or_else(|| syntax::error_at(name, "expected a name before 'as'"))?;
    let alias = name
        .child_by_field_name("alias")
        .ok_or_else(|| syntax::error_at(name, "expected a name after 'as'"))?;
    let alias_name = checked(alias, tree.text(alias).to_owned())?;
    Ok((target, Some(alias_name)))
}

/// Dotted path of a name node, without any whitespace or comments between its parts.
fn dotted_name(tree: &SyntaxTree, node: Node<'_>) -> String {
    if node.kind() != "dotted_name" {
        return tree.text(node).to_owned();
    }
    (0..node.named_child_count())
        .filter_map(|index| node.named_child(index))
        .filter(|part| part.kind() == "identifier")
        .map(|part| tree.text(part))
        .collect::<Vec<_>>()
        .join(".")
}

/// Keywords are only recognised where the grammar expects one, so `import class` parses.
fn checked(node: Node<'_>, dotted: String) -> Result<String, ParseError> {
    let keyword = dotted
        .split('.')
        .find(|part| KEYWORDS.contains(part))
        .map(str::to_owned);
    match keyword {
        Some(keyword) => Err(syntax::error_at(
            node,
            format!("expected a name, found keyword '{keyword}'"),
        )),
        None => Ok(dotted),
    }
}

/// The grammar tolerates `import a,` but the language only allows it inside parentheses.
fn reject_bare_trailing_comma(node: Node<'_>) -> Result<(), ParseError> {
    let last = (0..node.child_count())
        .rev()
        .filter_map(|index| node.child(index))
        .find(|child| !child.is_extra());
    match last {
        Some(comma) if comma.kind() == "," => Err(syntax::error_at(
            comma,
            "trailing comma not allowed without surrounding parentheses",
        )),
        _ => Ok(()),
    }
}

fn position(node: Node<'_>) -> (usize, usize) {
    let start = node.start_position();
    (start.row + 1, start.column)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from(decl: &ImportDeclaration) -> &FromImport {
        match decl {
            ImportDeclaration::From(from) => from,
            other => panic!("expected from-import, got {other:?}"),
        }
    }

    #[test]
    fn extracts_simple_import() {
        let decls = extract_imports("import os\n").unwrap();
        assert_eq!(
            decls,
            vec![ImportDeclaration::Plain(PlainImport {
                module_path: "os".into(),
                alias: None,
                line: 1,
                column: 0,
            })]
        );
    }

    #[test]
    fn extracts_multiple_aliased_imports() {
        let decls = extract_imports("import os.path as osp, sys, json as j\n").unwrap();
        let rendered: Vec<String> = decls.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec!["import os.path as osp", "import sys", "import json as j"]
        );
    }

    #[test]
    fn extracts_from_imports_with_aliases() {
        let decls = extract_imports("from typing import List, Dict as D\n").unwrap();
        assert_eq!(decls.len(), 2);
        assert_eq!(from(&decls[0]).symbol_name, "List");
        assert_eq!(from(&decls[1]).alias.as_deref(), Some("D"));
        assert_eq!(from(&decls[1]).relative_depth, 0);
    }

    #[test]
    fn extracts_relative_imports() {
        let source = "from . import sibling\nfrom ..other import thing\nfrom ...a.b import c\n";
        let decls = extract_imports(source).unwrap();
        let depths: Vec<usize> = decls.iter().map(|d| from(d).relative_depth).collect();
        assert_eq!(depths, vec![1, 2, 3]);
        assert_eq!(from(&decls[0]).module_path, "");
        assert_eq!(from(&decls[2]).module_path, "a.b");
        assert!(decls.iter().all(ImportDeclaration::is_relative));
    }

    #[test]
    fn extracts_wildcards() {
        let decls = extract_imports("from collections import *\nfrom .. import *\n").unwrap();
        assert!(decls[0].is_wildcard());
        assert!(!decls[0].is_relative());
        assert!(decls[1].is_wildcard());
        assert!(decls[1].is_relative());
    }

    #[test]
    fn extracts_parenthesized_multiline_imports() {
        let source = "from pkg.mod import (\n    alpha,\n    beta as b,\n)\n";
        let decls = extract_imports(source).unwrap();
        assert_eq!(decls.len(), 2);
        assert!(decls.iter().all(|d| d.line() == 1));
    }

    #[test]
    fn keeps_source_order_and_positions() {
        let source = "\"\"\"doc\nimport fake\n\"\"\"\nimport b\n\ndef f():\n    from c import d\nif x: import e\nx = 1; import g\n";
        let decls = extract_imports(source).unwrap();
        let summary: Vec<(String, usize, usize)> = decls
            .iter()
            .map(|d| (d.to_string(), d.line(), d.column()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("import b".to_string(), 4, 0),
                ("from c import d".to_string(), 7, 4),
                ("import e".to_string(), 8, 6),
                ("import g".to_string(), 9, 7),
            ]
        );
    }

    #[test]
    fn ignores_from_in_other_positions() {
        let decls = extract_imports("def g():\n    yield from items\nraise E from err\n").unwrap();
        assert!(decls.is_empty());
    }

    #[test]
    fn rejects_malformed_import_statements() {
        for source in [
            "import\n",
            "import os as\n",
            "import .os\n",
            "import os,\n",
            "import (os)\n",
            "from import x\n",
            "from os import\n",
            "from os import a,\n",
            "from os import ()\n",
            "from os import *, a\n",
            "from os import a as b as c\n",
            "from os import (a, b\n",
            "import class\n",
            "from os import path.sep\n",
            "from os import path as class\n",
            "from pkg.if import x\n",
        ] {
            assert!(extract_imports(source).is_err(), "accepted {source:?}");
        }
    }

    #[test]
    fn malformed_code_elsewhere_fails_extraction() {
        let err = extract_imports("import os\nx = (1,\n").unwrap_err();
        assert!(err.line >= 2, "{err}");

        for source in [
            "import os\nx = = 1\n",
            "import os\nif x\n    y = 1\n",
            "import os\nclass\n",
            "import os\ndef f(:\n    pass\n",
        ] {
            let err = extract_imports(source)
                .err()
                .unwrap_or_else(|| panic!("accepted {source:?}"));
            assert!(err.line >= 2, "{source:?}: {err}");
        }
    }

    #[test]
    fn extracts_imports_in_match_arms() {
        let source = "match x:\n    case 1: import json\n    case _:\n        import csv\n";
        let rendered: Vec<String> = extract_imports(source)
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(rendered, vec!["import json", "import csv"]);
    }

    #[test]
    fn extracts_future_imports() {
        let decls = extract_imports("from __future__ import annotations\n").unwrap();
        assert_eq!(decls.len(), 1);
        assert_eq!(from(&decls[0]).module_path, "__future__");
        assert_eq!(from(&decls[0]).symbol_name, "annotations");
    }

    #[test]
    fn line_numbers_follow_universal_newlines() {
        let decls = extract_imports("import a\rimport b\r\nimport c\n").unwrap();
        let lines: Vec<usize> = decls.iter().map(ImportDeclaration::line).collect();
        assert_eq!(lines, vec![1, 2, 3]);
    }

    #[test]
    fn module_level_imports_skip_function_and_class_bodies() {
        let source = "import a\ntry:\n    from b import c\nexcept ImportError:\n    c = None\n\ndef f():\n    import d\n\nclass K:\n    import e\n";
        let tree = SyntaxTree::parse(source).unwrap();
        let rendered: Vec<String> = module_level_imports(&tree)
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(rendered, vec!["import a", "from b import c"]);
    }

    #[test]
    fn parenthesized_trailing_comma_is_allowed() {
        let decls = extract_imports("from os import (path,)\n").unwrap();
        assert_eq!(decls.len(), 1);
    }
}
