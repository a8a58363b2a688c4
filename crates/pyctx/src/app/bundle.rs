//! Context bundles: one primary file together with the source of what it imports.

use std::error::Error;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::ValueEnum;
use minijinja::Environment;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::app::imports::extract_imports;
use crate::app::locate::{ExecutionContext, LocatorKind, SymbolLocator, build_locator};
use crate::app::modules::{ModuleLocation, PackageLayout, normalize_path};
use crate::app::syntax;
use crate::app::tokens::{TokenEstimator, TokenModel};
use crate::app::tree::{FocusItems, build_tree_to_depth, render_tree};
use crate::domain::errors::{BundleError, ResolutionError};
use crate::domain::model::{CompilationUnit, ImportDeclaration, ModuleIdentity, SymbolLocation};
use crate::infra::classify::{DependencyFilter, DownloadTable, PopularityOracle, StaticClassifier};
use crate::infra::config::Config;
use crate::infra::ignore::IgnoreRuleSet;
use crate::infra::interpreter::InterpreterSettings;

/// Focus label of the primary file in a bundle's project tree.
pub const LOCATION_LABEL: &str = "My Location";

/// Supported bundle formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
#[value(rename_all = "kebab-case")]
pub enum BundleFormat {
    /// Markdown document with fenced code blocks.
    #[default]
    Markdown,
    /// Plain text report.
    Plain,
}

impl BundleFormat {
    /// Stable identifier, also the name of the built-in template.
    pub fn as_str(&self) -> &'static str {
        match self {
            BundleFormat::Markdown => "markdown",
            BundleFormat::Plain => "plain",
        }
    }

    /// Recommended file extension for the format.
    pub fn extension(&self) -> &'static str {
        match self {
            BundleFormat::Markdown => "md",
            BundleFormat::Plain => "txt",
        }
    }
}

impl fmt::Display for BundleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BundleFormat {
    type Err = BundleFormatParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "markdown" | "md" | "commonmark" => Ok(BundleFormat::Markdown),
            "plain" | "text" | "txt" => Ok(BundleFormat::Plain),
            other => Err(BundleFormatParseError::UnknownFormat(other.to_string())),
        }
    }
}

/// Error returned when parsing a [`BundleFormat`] fails.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum BundleFormatParseError {
    #[error("unknown bundle format '{0}'")]
    UnknownFormat(String),
}

/// Runtime options controlling what goes into a bundle and how it is rendered.
#[derive(Debug, Clone)]
pub struct BundleOptions {
    pub format: BundleFormat,
    /// Template name or file path; `None` uses the format's built-in template.
    pub template: Option<String>,
    pub heading_level: usize,
    pub code_name: Option<String>,
    pub description: Option<String>,
    pub show_project_tree: bool,
    /// Record failed declarations as diagnostics instead of aborting.
    pub skip_when_error: bool,
    pub ignore_patterns: Vec<String>,
    pub focus: FocusItems,
    pub token_model: TokenModel,
}

impl Default for BundleOptions {
    fn default() -> Self {
        Self {
            format: BundleFormat::default(),
            template: None,
            heading_level: 2,
            code_name: None,
            description: None,
            show_project_tree: false,
            skip_when_error: true,
            ignore_patterns: Vec::new(),
            focus: FocusItems::new(),
            token_model: TokenModel::default(),
        }
    }
}

impl BundleOptions {
    /// Build options from configuration defaults.
    pub fn from_config(config: &Config) -> Result<Self> {
        let defaults = &config.defaults;
        let format = defaults.format().parse::<BundleFormat>()
            .with_context(|| "invalid [defaults] format".to_string())?;
        let token_model = defaults.token_model().parse::<TokenModel>()
            .with_context(|| "invalid [defaults] token_model".to_string())?;
        Ok(Self {
            format,
            template: defaults.template().map(str::to_owned),
            heading_level: defaults.heading_level(),
            code_name: Some(defaults.code_name().trim().to_owned()).filter(|name| !name.is_empty()),
            description: defaults.description().map(str::to_owned),
            show_project_tree: defaults.show_project_tree(),
            skip_when_error: defaults.skip_when_error(),
            ignore_patterns: config.ignore.patterns.clone(),
            focus: config.focus.clone(),
            token_model,
        })
    }
}

/// A declaration that failed and was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub statement: String,
    pub line: usize,
    pub message: String,
}

impl Diagnostic {
    fn new(declaration: &ImportDeclaration, err: &BundleError) -> Self {
        Self {
            statement: declaration.to_string(),
            line: declaration.line(),
            message: error_chain(err),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

/// One surviving import and what was found for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportSection {
    pub declaration: ImportDeclaration,
    /// Absolute identity of the imported object, `None` when resolution failed.
    pub target: Option<ModuleIdentity>,
    pub location: SymbolLocation,
    pub diagnostic: Option<String>,
}

impl ImportSection {
    fn failed(declaration: &ImportDeclaration, diagnostic: &Diagnostic) -> Self {
        Self {
            declaration: declaration.clone(),
            target: None,
            location: SymbolLocation::absent(),
            diagnostic: Some(diagnostic.message.clone()),
        }
    }
}

/// A rendered bundle and the data it was rendered from.
#[derive(Debug, Clone, Serialize)]
pub struct Bundle {
    pub source_file: PathBuf,
    pub identity: ModuleIdentity,
    pub text: String,
    pub sections: Vec<ImportSection>,
    pub diagnostics: Vec<Diagnostic>,
    /// Token estimate of `text`.
    pub tokens: usize,
}

/// Drives extraction, resolution, filtering, lookup, and rendering for primary files.
pub struct ContextBundler {
    layout: PackageLayout,
    locator: Box<dyn SymbolLocator>,
    filter: DependencyFilter,
    search_paths: Vec<PathBuf>,
    options: BundleOptions,
    estimator: TokenEstimator,
    env: Environment<'static>,
}

impl ContextBundler {
    /// Create a bundler with built-in templates loaded and dependency filtering disabled.
    pub fn new(locator: Box<dyn SymbolLocator>, options: BundleOptions) -> Result<Self, BundleError> {
        Ok(Self {
            layout: PackageLayout::default(),
            locator,
            filter: DependencyFilter::disabled(),
            search_paths: Vec::new(),
            estimator: TokenEstimator::new(options.token_model),
            options,
            env: default_environment()?,
        })
    }

    /// Wire the locator, dependency filter, and search roots described by `config`.
    pub fn from_config(config: &Config, options: BundleOptions) -> Result<Self> {
        let layout = PackageLayout::default();
        let kind = config.defaults.locator().parse::<LocatorKind>()
            .with_context(|| "invalid [defaults] locator".to_string())?;
        let interpreter = InterpreterSettings {
            program: config.interpreter.program().to_owned(),
        };
        let locator = build_locator(kind, layout.clone(), &interpreter);
        let filter = dependency_filter(config, &layout)?;
        Ok(Self::new(locator, options)?
            .with_layout(layout)
            .with_filter(filter)
            .with_search_paths(config.interpreter.search_paths.clone()))
    }

    pub fn with_layout(mut self, layout: PackageLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_filter(mut self, filter: DependencyFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Roots searched after each primary file's own resolution root.
    pub fn with_search_paths(mut self, search_paths: Vec<PathBuf>) -> Self {
        self.search_paths = search_paths;
        self
    }

    pub fn options(&self) -> &BundleOptions {
        &self.options
    }

    pub fn locator_kind(&self) -> LocatorKind {
        self.locator.kind()
    }

    /// Read and parse a primary file.
    pub fn load_unit(&self, path: &Path) -> Result<CompilationUnit, BundleError> {
        let absolute_path = absolute(path).map_err(|source| BundleError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let source = fs::read_to_string(&absolute_path).map_err(|source| BundleError::Io {
            path: absolute_path.clone(),
            source,
        })?;
        let declarations = extract_imports(&source).map_err(|source| BundleError::Parse {
            path: absolute_path.clone(),
            source,
        })?;
        Ok(CompilationUnit {
            absolute_path,
            raw_lines: syntax::split_lines(&source),
            declarations,
        })
    }

    /// Build the bundle for one primary file.
    ///
    /// Either the whole bundle is produced or the first unrecovered error is returned.
    pub fn bundle(&self, path: &Path) -> Result<Bundle, BundleError> {
        let unit = self.load_unit(path)?;
        let location = self
            .layout
            .locate(&unit.absolute_path)
            .map_err(|source| BundleError::Resolution {
                statement: unit.absolute_path.display().to_string(),
                source,
            })?;
        let context = ExecutionContext::for_module(&location, &self.search_paths);
        debug!(
            file = %location.source_file.display(),
            module = %location.identity,
            declarations = unit.declarations.len(),
            "bundling"
        );

        let mut sections = Vec::new();
        let mut diagnostics = Vec::new();
        for declaration in &unit.declarations {
            if self.filter.should_elide(declaration, &context) {
                debug!(statement = %declaration, "elided uninteresting import");
                continue;
            }
            match self.section_for(declaration, &location, &context) {
                Ok(section) => sections.push(section),
                Err(err) if self.options.skip_when_error && err.is_recoverable() => {
                    let diagnostic = Diagnostic::new(declaration, &err);
                    warn!(
                        file = %location.source_file.display(),
                        line = diagnostic.line,
                        statement = %diagnostic.statement,
                        error = %diagnostic.message,
                        "skipping import"
                    );
                    sections.push(ImportSection::failed(declaration, &diagnostic));
                    diagnostics.push(diagnostic);
                }
                Err(err) => return Err(err),
            }
        }

        let tree = if self.options.show_project_tree {
            Some(self.project_tree(&location)?)
        } else {
            None
        };
        let text = self.render(&unit, &location, tree.as_deref(), &sections)?;
        let tokens = self.estimator.count(&text);

        Ok(Bundle {
            source_file: location.source_file,
            identity: location.identity,
            text,
            sections,
            diagnostics,
            tokens,
        })
    }

    fn section_for(
        &self,
        declaration: &ImportDeclaration,
        location: &ModuleLocation,
        context: &ExecutionContext,
    ) -> Result<ImportSection, BundleError> {
        let statement = declaration.to_string();
        let resolution_error = |source| BundleError::Resolution {
            statement: statement.clone(),
            source,
        };

        let resolved = self
            .layout
            .resolve(location, declaration)
            .map_err(resolution_error)?;
        if declaration.is_relative()
            && self
                .layout
                .find_module(context.search_path(), &resolved.module)
                .is_none()
        {
            return Err(resolution_error(ResolutionError::UnknownModule {
                module: resolved.module.to_string(),
            }));
        }

        let located = self
            .locator
            .locate(&resolved, context)
            .map_err(|source| BundleError::Locate {
                statement: statement.clone(),
                source,
            })?;
        debug!(
            statement = %statement,
            target = %resolved.target(),
            file = ?located.defining_file(),
            has_source = located.has_source(),
            "located import"
        );

        Ok(ImportSection {
            declaration: declaration.clone(),
            target: Some(resolved.target()),
            location: located,
            diagnostic: None,
        })
    }

    fn project_tree(&self, location: &ModuleLocation) -> Result<String, BundleError> {
        let rules = IgnoreRuleSet::cached(&self.options.ignore_patterns)?;
        let mut focus = self.options.focus.clone();
        focus.insert(LOCATION_LABEL.to_owned(), location.source_file.clone());
        let tree = build_tree_to_depth(
            &location.top_level_dir(),
            &rules,
            &focus,
            location.tree_depth(),
        )?;
        Ok(render_tree(&tree))
    }

    fn render(
        &self,
        unit: &CompilationUnit,
        location: &ModuleLocation,
        tree: Option<&str>,
        sections: &[ImportSection],
    ) -> Result<String, BundleError> {
        let source = unit.source_code();
        let level = self.options.heading_level.clamp(1, 4);
        let title = match &self.options.code_name {
            Some(name) => format!("{name} Source Code Analysis"),
            None => "Source Code Analysis".to_owned(),
        };

        let context = TemplateContext {
            heading: "#".repeat(level),
            subheading: "#".repeat(level + 1),
            item_heading: "#".repeat(level + 2),
            title,
            description: self.options.description.as_deref(),
            source_file: location.source_file.display().to_string(),
            package: location.identity.to_string(),
            relative_file: location.relative_file().display().to_string(),
            tree,
            source: source.trim_end(),
            imports: sections.iter().map(TemplateImport::from_section).collect(),
        };

        let template = self
            .options
            .template
            .as_deref()
            .unwrap_or(self.options.format.as_str());
        render_with_template(&self.env, &context, template)
    }
}

fn dependency_filter(config: &Config, layout: &PackageLayout) -> Result<DependencyFilter> {
    let filter = &config.filter;
    if !filter.enabled() {
        return Ok(DependencyFilter::disabled());
    }

    let mut table = DownloadTable::new(&filter.popular_packages);
    if let Some(path) = &filter.downloads_table {
        table = table.with_csv_file(path)?;
    }
    let oracle: Arc<dyn PopularityOracle> = Arc::new(table);
    let classifier = Arc::new(StaticClassifier::new(
        layout.clone(),
        config.interpreter.search_paths.clone(),
        oracle.clone(),
    ));
    Ok(
        DependencyFilter::new(classifier, oracle, filter.min_last_month_downloads())
            .with_ignore_modules(filter.ignore_modules.iter().cloned())
            .with_no_ignore_modules(filter.no_ignore_modules.iter().cloned()),
    )
}

fn absolute(path: &Path) -> std::io::Result<PathBuf> {
    Ok(normalize_path(&std::path::absolute(path)?))
}

/// Display form of an error followed by its sources, separated by `: `.
pub(crate) fn error_chain(err: &dyn Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn render_with_template(
    env: &Environment<'_>,
    context: &TemplateContext<'_>,
    template_name: &str,
) -> Result<String, BundleError> {
    let render_error =
        |err: minijinja::Error| BundleError::Render(format!("template '{template_name}': {err}"));

    if let Ok(template) = env.get_template(template_name) {
        return template.render(context).map_err(render_error);
    }

    let template_path = Path::new(template_name);
    if template_path.is_file() {
        let source = fs::read_to_string(template_path).map_err(|err| {
            BundleError::Render(format!(
                "failed to load template from {}: {err}",
                template_path.display()
            ))
        })?;
        let mut external = Environment::new();
        configure(&mut external);
        external
            .add_template("external", &source)
            .map_err(render_error)?;
        return external
            .get_template("external")
            .and_then(|template| template.render(context))
            .map_err(render_error);
    }

    Err(BundleError::Render(format!(
        "template '{template_name}' not found (built-in or filesystem)"
    )))
}

fn default_environment() -> Result<Environment<'static>, BundleError> {
    let mut env = Environment::new();
    configure(&mut env);
    for (name, source) in [
        (BundleFormat::Markdown.as_str(), DEFAULT_MARKDOWN_TEMPLATE),
        (BundleFormat::Plain.as_str(), DEFAULT_PLAIN_TEMPLATE),
    ] {
        env.add_template(name, source).map_err(|err| {
            BundleError::Render(format!("failed to register built-in template '{name}': {err}"))
        })?;
    }
    Ok(env)
}

fn configure(env: &mut Environment<'_>) {
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.add_filter("titleize", titleize);
}

/// Capitalize every word; underscores, hyphens, and camel-case humps separate words.
fn titleize(value: String) -> String {
    let mut spaced = String::with_capacity(value.len() + 4);
    let mut previous: Option<char> = None;
    for ch in value.chars() {
        let boundary = ch.is_uppercase()
            && previous.is_some_and(|prev| prev.is_lowercase() || prev.is_ascii_digit());
        if boundary {
            spaced.push(' ');
        }
        spaced.push(if ch == '_' || ch == '-' { ' ' } else { ch });
        previous = Some(ch);
    }
    spaced
        .split_whitespace()
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

#[derive(Serialize)]
struct TemplateContext<'a> {
    heading: String,
    subheading: String,
    item_heading: String,
    title: String,
    description: Option<&'a str>,
    source_file: String,
    package: String,
    relative_file: String,
    tree: Option<&'a str>,
    source: &'a str,
    imports: Vec<TemplateImport<'a>>,
}

#[derive(Serialize)]
struct TemplateImport<'a> {
    statement: String,
    line: usize,
    file: Option<String>,
    full_path: Option<String>,
    source: Option<&'a str>,
    representation: Option<&'a str>,
    diagnostic: Option<&'a str>,
}

impl<'a> TemplateImport<'a> {
    fn from_section(section: &'a ImportSection) -> Self {
        let location = &section.location;
        let full_path = location
            .qualified_name()
            .map(str::to_owned)
            .or_else(|| section.target.as_ref().map(ToString::to_string));
        Self {
            statement: section.declaration.to_string(),
            line: section.declaration.line(),
            file: location.defining_file().map(|path| path.display().to_string()),
            full_path,
            source: location.source_text().map(str::trim_end),
            representation: location.representation(),
            diagnostic: section.diagnostic.as_deref(),
        }
    }
}

const DEFAULT_MARKDOWN_TEMPLATE: &str = r#"{{ heading }} {{ title | titleize }}

{% if description %}
{{ description }}

{% endif %}
**Source File Location:** `{{ source_file }}`

**Package Namespace:** `{{ package }}`

**Relative Source File Location:** `{{ relative_file }}`

{% if tree %}
Module directory tree:

```
{{ tree }}
```

{% endif %}
**Complete Source Code:**

```python
{{ source }}
```
{% if imports %}

{{ subheading }} Dependency Analysis - Import Statements and Their Implementations

The following section contains all imported dependencies for package `{{ package }}` along with their source code implementations. This information can be used as reference context for understanding the main code's functionality and dependencies.
{% for item in imports %}

{{ item_heading }} Import: `{{ item.statement }}`
{% if item.file %}

**Source File:** `{{ item.file }}`

**Full Package Path:** `{{ item.full_path }}`
{% endif %}
{% if item.diagnostic %}

**Error:** {{ item.diagnostic }}
{% elif item.source %}

**Implementation Source Code:**

```python
{{ item.source }}
```
{% elif item.representation %}

**Note:** Source code is not available through static or runtime inspection. Below is the object representation:

```
{{ item.representation }}
```
{% else %}

**Note:** No definition could be located for this import.
{% endif %}
{% endfor %}
{% endif %}
"#;

const DEFAULT_PLAIN_TEMPLATE: &str = r#"{{ title | titleize | upper }}
{% if description %}
{{ description }}
{% endif %}

Source file: {{ source_file }}
Package: {{ package }}
Relative source file: {{ relative_file }}
{% if tree %}

Module directory tree:
{{ tree }}
{% endif %}

-- source --
{{ source }}
{% for item in imports %}

-- import (line {{ item.line }}): {{ item.statement }}
{% if item.file %}
File: {{ item.file }}
Full path: {{ item.full_path }}
{% endif %}
{% if item.diagnostic %}
Error: {{ item.diagnostic }}
{% elif item.source %}
{{ item.source }}
{% elif item.representation %}
Representation: {{ item.representation }}
{% else %}
No definition located.
{% endif %}
{% endfor %}
"#;
