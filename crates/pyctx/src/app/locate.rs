//! Symbol location strategies.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use tree_sitter::Node;

use crate::app::imports;
use crate::app::syntax::{self, SyntaxTree};
use crate::app::modules::{ModuleFile, ModuleLocation, PackageLayout, ResolvedImport};
use crate::domain::errors::LocateError;
use crate::domain::model::{ImportDeclaration, ModuleIdentity, SymbolLocation};
use crate::infra::interpreter::{DynamicLocator, InterpreterSettings};

/// Re-export chains longer than this are treated as unresolvable.
const MAX_REEXPORT_DEPTH: usize = 16;

/// Module search state for one lookup, passed explicitly instead of mutating process globals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionContext {
    search_path: Vec<PathBuf>,
}

impl ExecutionContext {
    pub fn new(search_path: Vec<PathBuf>) -> Self {
        let mut unique = Vec::with_capacity(search_path.len());
        for path in search_path {
            if !unique.contains(&path) {
                unique.push(path);
            }
        }
        Self {
            search_path: unique,
        }
    }

    /// Context for code in `location`: its resolution root first, then `extra` roots.
    pub fn for_module(location: &ModuleLocation, extra: &[PathBuf]) -> Self {
        let mut search_path = vec![location.root.clone()];
        search_path.extend(extra.iter().cloned());
        Self::new(search_path)
    }

    pub fn search_path(&self) -> &[PathBuf] {
        &self.search_path
    }
}

/// Available lookup strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
#[value(rename_all = "kebab-case")]
pub enum LocatorKind {
    /// Read module sources without executing them.
    #[default]
    Static,
    /// Import modules in a child interpreter and ask the runtime.
    Dynamic,
}

impl LocatorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocatorKind::Static => "static",
            LocatorKind::Dynamic => "dynamic",
        }
    }
}

impl fmt::Display for LocatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LocatorKind {
    type Err = LocatorKindParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "static" => Ok(LocatorKind::Static),
            "dynamic" | "runtime" => Ok(LocatorKind::Dynamic),
            other => Err(LocatorKindParseError::UnknownLocator(other.to_string())),
        }
    }
}

/// Error returned when parsing a [`LocatorKind`] fails.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum LocatorKindParseError {
    #[error("unknown locator '{0}' (expected 'static' or 'dynamic')")]
    UnknownLocator(String),
}

/// Finds where an imported object is defined.
///
/// A target that cannot be found at all yields [`SymbolLocation::absent`]; errors are reserved for
/// targets that exist but fail to load.
pub trait SymbolLocator: Send + Sync {
    fn kind(&self) -> LocatorKind;

    fn locate(
        &self,
        target: &ResolvedImport,
        context: &ExecutionContext,
    ) -> Result<SymbolLocation, LocateError>;
}

/// Build the locator selected by `kind`.
pub fn build_locator(
    kind: LocatorKind,
    layout: PackageLayout,
    interpreter: &InterpreterSettings,
) -> Box<dyn SymbolLocator> {
    match kind {
        LocatorKind::Static => Box::new(StaticLocator::new(layout)),
        LocatorKind::Dynamic => Box::new(DynamicLocator::new(interpreter.clone())),
    }
}

/// Heuristic locator working purely on module source text.
#[derive(Debug, Clone, Default)]
pub struct StaticLocator {
    layout: PackageLayout,
}

impl StaticLocator {
    pub fn new(layout: PackageLayout) -> Self {
        Self { layout }
    }

    fn locate_member(
        &self,
        module: &ModuleIdentity,
        name: &str,
        context: &ExecutionContext,
        visited: &mut HashSet<(ModuleIdentity, String)>,
    ) -> Result<SymbolLocation, LocateError> {
        if visited.len() >= MAX_REEXPORT_DEPTH || !visited.insert((module.clone(), name.to_owned())) {
            return Ok(SymbolLocation::absent());
        }

        let Some(found) = self.layout.find_module(context.search_path(), module) else {
            return Ok(SymbolLocation::absent());
        };

        let parsed = match found.source() {
            Some(path) => Some(ParsedModule::load(module, path)?),
            None => None,
        };

        if let Some(parsed) = &parsed
            && let Some((start, end, kind)) = parsed.definition_span(name)
            && let Some(lines) = parsed.lines.get(start - 1..end)
        {
            let qualified = module.join(name).to_string();
            let representation = match kind {
                DefinitionKind::Function => format!("<function {qualified}>"),
                DefinitionKind::Class => format!("<class '{qualified}'>"),
                DefinitionKind::Assignment => lines[0].trim().to_owned(),
            };
            return Ok(SymbolLocation::with_source(&parsed.path, start, lines)
                .with_representation(representation)
                .with_qualified_name(qualified));
        }

        let submodule = module.join(name);
        if let Some(sub) = self.layout.find_module(context.search_path(), &submodule) {
            return self.module_location(&submodule, &sub);
        }

        let Some(parsed) = parsed else {
            return Ok(SymbolLocation::file_only(found.path())
                .with_qualified_name(submodule.to_string()));
        };

        let current = ModuleLocation {
            source_file: parsed.path.clone(),
            root: PathBuf::new(),
            identity: module.clone(),
            is_package: matches!(found, ModuleFile::Package(_)),
        };
        for declaration in parsed.top_level_imports()? {
            let Ok(resolved) = self.layout.resolve(&current, &declaration) else {
                continue;
            };
            let location = match &declaration {
                ImportDeclaration::Plain(plain) if plain.bound_name() == name => {
                    let bound = match &plain.alias {
                        Some(_) => resolved.module.clone(),
                        None => ModuleIdentity::parse(name),
                    };
                    self.locate(
                        &ResolvedImport {
                            module: bound,
                            symbol: None,
                        },
                        context,
                    )?
                }
                ImportDeclaration::From(from) if from.is_wildcard() => {
                    self.locate_member(&resolved.module, name, context, visited)?
                }
                ImportDeclaration::From(from) if from.bound_name() == name => {
                    self.locate_member(&resolved.module, &from.symbol_name, context, visited)?
                }
                _ => continue,
            };
            if !location.is_absent() {
                return Ok(location);
            }
        }

        Ok(SymbolLocation::file_only(&parsed.path).with_qualified_name(submodule.to_string()))
    }

    fn module_location(
        &self,
        module: &ModuleIdentity,
        found: &ModuleFile,
    ) -> Result<SymbolLocation, LocateError> {
        match found.source() {
            Some(path) => {
                let parsed = ParsedModule::load(module, path)?;
                let representation = format!("<module '{module}' from '{}'>", path.display());
                let location = if parsed.lines.is_empty() {
                    SymbolLocation::file_only(path)
                } else {
                    SymbolLocation::with_source(path, 1, &parsed.lines)
                };
                Ok(location
                    .with_representation(representation)
                    .with_qualified_name(module.to_string()))
            }
            None => Ok(SymbolLocation::file_only(found.path())
                .with_representation(format!("<module '{module}' (namespace)>"))
                .with_qualified_name(module.to_string())),
        }
    }
}

impl SymbolLocator for StaticLocator {
    fn kind(&self) -> LocatorKind {
        LocatorKind::Static
    }

    fn locate(
        &self,
        target: &ResolvedImport,
        context: &ExecutionContext,
    ) -> Result<SymbolLocation, LocateError> {
        match target.symbol.as_deref() {
            None => match self.layout.find_module(context.search_path(), &target.module) {
                Some(found) => self.module_location(&target.module, &found),
                None => Ok(SymbolLocation::absent()),
            },
            Some("*") => Ok(self
                .layout
                .find_module(context.search_path(), &target.module)
                .map(|found| {
                    SymbolLocation::file_only(found.path())
                        .with_qualified_name(target.module.to_string())
                })
                .unwrap_or_default()),
            Some(name) => {
                let mut visited = HashSet::new();
                self.locate_member(&target.module, name, context, &mut visited)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DefinitionKind {
    Function,
    Class,
    Assignment,
}

/// A module file with its raw lines and syntax tree.
struct ParsedModule {
    path: PathBuf,
    lines: Vec<String>,
    tree: SyntaxTree,
}

impl ParsedModule {
    fn load(module: &ModuleIdentity, path: &Path) -> Result<Self, LocateError> {
        let source = fs::read_to_string(path).map_err(|source| LocateError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let tree = SyntaxTree::parse(&source).map_err(|source| LocateError::Parse {
            module: module.to_string(),
            source,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            lines: syntax::split_lines(&source),
            tree,
        })
    }

    /// Line span of the last module-level definition binding `name`, decorators included.
    fn definition_span(&self, name: &str) -> Option<(usize, usize, DefinitionKind)> {
        let root = self.tree.root();
        let (node, kind) = (0..root.named_child_count())
            .filter_map(|index| root.named_child(index))
            .filter_map(|statement| self.binding(statement, name).map(|kind| (statement, kind)))
            .last()?;
        let (start, end) = syntax::line_span(node);
        Some((start, end.min(self.lines.len()).max(start), kind))
    }

    fn binding(&self, statement: Node<'_>, name: &str) -> Option<DefinitionKind> {
        let declared = |node: Node<'_>| {
            node.child_by_field_name("name")
                .is_some_and(|ident| self.tree.text(ident) == name)
        };
        match statement.kind() {
            "decorated_definition" => statement
                .child_by_field_name("definition")
                .and_then(|definition| self.binding(definition, name)),
            "function_definition" if declared(statement) => Some(DefinitionKind::Function),
            "class_definition" if declared(statement) => Some(DefinitionKind::Class),
            "expression_statement" => {
                // `a = b = value` nests one assignment per target.
                let mut current = statement.named_child(0);
                while let Some(assignment) = current.filter(|node| node.kind() == "assignment") {
                    let target = assignment.child_by_field_name("left");
                    if target.is_some_and(|left| {
                        left.kind() == "identifier" && self.tree.text(left) == name
                    }) {
                        return Some(DefinitionKind::Assignment);
                    }
                    current = assignment.child_by_field_name("right");
                }
                None
            }
            _ => None,
        }
    }

    fn top_level_imports(&self) -> Result<Vec<ImportDeclaration>, LocateError> {
        imports::module_level_imports(&self.tree).map_err(|source| LocateError::Parse {
            module: self.path.display().to_string(),
            source,
        })
    }
}
