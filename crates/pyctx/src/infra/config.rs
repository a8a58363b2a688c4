//! Configuration management utilities.

use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dirs_next::config_dir;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

static DEFAULT_CONFIG: Lazy<&'static str> =
    Lazy::new(|| include_str!("../../assets/default-config.toml"));
static DEFAULT_WORKSPACE_CONFIG_PATH: &str = ".pyctx/config.toml";

/// Layered configuration loaded from defaults, user, workspace, and env.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub ignore: Ignore,
    #[serde(default)]
    pub filter: Filter,
    #[serde(default)]
    pub interpreter: Interpreter,
    /// Extra focus labels for rendered project trees.
    #[serde(default)]
    pub focus: BTreeMap<String, PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Defaults {
    #[serde(default)]
    pub locator: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub code_name: Option<String>,
    #[serde(default)]
    pub token_model: Option<String>,
    #[serde(default)]
    template: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    heading_level: Option<usize>,
    #[serde(default)]
    skip_when_error: Option<bool>,
    #[serde(default)]
    show_project_tree: Option<bool>,
}

impl Defaults {
    fn default_heading_level() -> usize {
        2
    }

    pub fn locator(&self) -> &str {
        self.locator.as_deref().unwrap_or("static")
    }

    pub fn format(&self) -> &str {
        self.format.as_deref().unwrap_or("markdown")
    }

    pub fn code_name(&self) -> &str {
        self.code_name.as_deref().unwrap_or("primary")
    }

    pub fn token_model(&self) -> &str {
        self.token_model.as_deref().unwrap_or("openai:gpt-4o")
    }

    /// Template name or path overriding the format's built-in template.
    pub fn template(&self) -> Option<&str> {
        self.template.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn heading_level(&self) -> usize {
        self.heading_level
            .unwrap_or_else(Self::default_heading_level)
            .clamp(1, 6)
    }

    pub fn skip_when_error(&self) -> bool {
        self.skip_when_error.unwrap_or(true)
    }

    pub fn show_project_tree(&self) -> bool {
        self.show_project_tree.unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Ignore {
    /// Patterns added to the built-in ignore rules.
    #[serde(default)]
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Filter {
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    min_last_month_downloads: Option<u64>,
    #[serde(default)]
    pub ignore_modules: Vec<String>,
    #[serde(default)]
    pub no_ignore_modules: Vec<String>,
    /// Distributions treated as popular regardless of download counts.
    #[serde(default)]
    pub popular_packages: Vec<String>,
    /// CSV file with `name,last_month` columns.
    #[serde(default)]
    pub downloads_table: Option<PathBuf>,
}

impl Filter {
    fn default_min_last_month_downloads() -> u64 {
        1_000_000
    }

    pub fn enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    pub fn min_last_month_downloads(&self) -> u64 {
        self.min_last_month_downloads
            .unwrap_or_else(Self::default_min_last_month_downloads)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Interpreter {
    #[serde(default)]
    pub program: Option<String>,
    /// Additional module search roots, e.g. a virtualenv's site-packages.
    #[serde(default)]
    pub search_paths: Vec<PathBuf>,
}

impl Interpreter {
    pub fn program(&self) -> &str {
        self.program
            .as_deref()
            .unwrap_or(crate::infra::interpreter::DEFAULT_PROGRAM)
    }
}

/// Environment overrides for critical settings.
#[derive(Debug, Default, Clone)]
pub struct EnvOverrides {
    locator: Option<String>,
    python: Option<String>,
}

impl EnvOverrides {
    fn from_env() -> Self {
        Self {
            locator: env::var("PYCTX_LOCATOR").ok().filter(|value| !value.is_empty()),
            python: env::var("PYCTX_PYTHON").ok().filter(|value| !value.is_empty()),
        }
    }

    #[cfg(test)]
    fn for_tests(locator: &str, python: &str) -> Self {
        Self {
            locator: Some(locator.to_owned()),
            python: Some(python.to_owned()),
        }
    }
}

impl Config {
    /// Load configuration from defaults, user/global config, workspace config, and env overrides.
    pub fn load() -> Result<Self> {
        Self::load_with_extra(None)
    }

    /// Like [`Config::load`], with an explicit file layered over the workspace config.
    pub fn load_with_extra(extra: Option<&Path>) -> Result<Self> {
        if let Some(path) = extra
            && !path.is_file()
        {
            anyhow::bail!("config file not found: {}", path.display());
        }
        let env = EnvOverrides::from_env();
        let global = global_config_path();
        let workspace = workspace_config_path()?;
        Self::load_with_layers(&[global, workspace, extra.map(Path::to_path_buf)], env)
    }

    fn load_with_layers(paths: &[Option<PathBuf>], env_overrides: EnvOverrides) -> Result<Self> {
        let mut layers: Vec<Config> = Vec::new();

        layers.push(Self::from_str(&DEFAULT_CONFIG)?);

        for path in paths.iter().flatten().filter(|path| path.exists()) {
            layers.push(Self::from_file(path)?);
        }

        let merged = layers.into_iter().reduce(Config::merge).unwrap_or_default();
        Ok(apply_env_overrides(merged, env_overrides))
    }

    fn from_file(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let mut config = Self::from_str(&data)
            .with_context(|| format!("invalid config file: {}", path.display()))?;
        if let Some(base) = path.parent() {
            config.anchor_paths(base);
        }
        Ok(config)
    }

    fn from_str(contents: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(contents).with_context(|| "failed to parse TOML config".to_string())?;
        Ok(config)
    }

    /// Resolve relative paths in a config file against the file's directory.
    fn anchor_paths(&mut self, base: &Path) {
        let anchor = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        self.interpreter.search_paths.iter_mut().for_each(anchor);
        if let Some(table) = self.filter.downloads_table.as_mut() {
            anchor(table);
        }
    }

    fn merge(self, other: Self) -> Self {
        let mut focus = self.focus;
        focus.extend(other.focus);
        Self {
            defaults: merge_defaults(self.defaults, other.defaults),
            ignore: Ignore {
                patterns: sorted_union(self.ignore.patterns, other.ignore.patterns),
            },
            filter: merge_filter(self.filter, other.filter),
            interpreter: merge_interpreter(self.interpreter, other.interpreter),
            focus,
        }
    }
}

fn sorted_union<T: Ord>(base: Vec<T>, overlay: Vec<T>) -> Vec<T> {
    let mut merged: BTreeSet<T> = base.into_iter().collect();
    merged.extend(overlay);
    merged.into_iter().collect()
}

fn merge_defaults(base: Defaults, overlay: Defaults) -> Defaults {
    Defaults {
        locator: overlay.locator.or(base.locator),
        format: overlay.format.or(base.format),
        code_name: overlay.code_name.or(base.code_name),
        token_model: overlay.token_model.or(base.token_model),
        template: overlay.template.or(base.template),
        description: overlay.description.or(base.description),
        heading_level: overlay.heading_level.or(base.heading_level),
        skip_when_error: overlay.skip_when_error.or(base.skip_when_error),
        show_project_tree: overlay.show_project_tree.or(base.show_project_tree),
    }
}

fn merge_filter(base: Filter, overlay: Filter) -> Filter {
    Filter {
        enabled: overlay.enabled.or(base.enabled),
        min_last_month_downloads: overlay
            .min_last_month_downloads
            .or(base.min_last_month_downloads),
        ignore_modules: sorted_union(base.ignore_modules, overlay.ignore_modules),
        no_ignore_modules: sorted_union(base.no_ignore_modules, overlay.no_ignore_modules),
        popular_packages: sorted_union(base.popular_packages, overlay.popular_packages),
        downloads_table: overlay.downloads_table.or(base.downloads_table),
    }
}

fn merge_interpreter(base: Interpreter, overlay: Interpreter) -> Interpreter {
    Interpreter {
        program: overlay.program.or(base.program),
        search_paths: sorted_union(base.search_paths, overlay.search_paths),
    }
}

fn global_config_path() -> Option<PathBuf> {
    config_dir().map(|base| base.join("pyctx/config.toml"))
}

fn workspace_config_path() -> Result<Option<PathBuf>> {
    let cwd = env::current_dir()?;
    let root = find_repo_root(&cwd).unwrap_or(cwd);
    Ok(Some(root.join(DEFAULT_WORKSPACE_CONFIG_PATH)))
}

fn find_repo_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(".git").exists())
        .map(Path::to_path_buf)
}

fn apply_env_overrides(mut config: Config, env: EnvOverrides) -> Config {
    if let Some(locator) = env.locator {
        config.defaults.locator = Some(locator);
    }
    if let Some(python) = env.python {
        config.interpreter.program = Some(python);
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_uses_defaults_when_no_files() {
        let config = Config::load_with_layers(&[], EnvOverrides::default())
            .expect("load default config");
        assert_eq!(config.defaults.locator(), "static");
        assert_eq!(config.defaults.heading_level(), 2);
        assert!(config.defaults.skip_when_error());
        assert!(!config.defaults.show_project_tree());
        assert_eq!(config.filter.min_last_month_downloads(), 1_000_000);
        assert!(config.filter.popular_packages.contains(&"numpy".into()));
        assert_eq!(config.interpreter.program(), "python3");
    }

    #[test]
    fn merge_global_and_workspace() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let global = temp.path().join("config.toml");
        fs::write(
            &global,
            r#"
[defaults]
locator = "dynamic"
skip_when_error = false
[ignore]
patterns = ["generated/"]
[filter]
no_ignore_modules = ["requests"]
"#,
        )?;

        let workspace_dir = temp.path().join("repo");
        fs::create_dir_all(workspace_dir.join(".pyctx"))?;
        fs::create_dir_all(workspace_dir.join(".git"))?;
        fs::write(
            workspace_dir.join(".pyctx/config.toml"),
            r#"
[defaults]
format = "plain"
heading_level = 3
[ignore]
patterns = ["*.cache"]
[interpreter]
search_paths = ["venv/lib/site-packages"]
[focus]
Entry = "src/app.py"
"#,
        )?;

        let workspace_path = workspace_dir.join(".pyctx/config.toml");
        let config = Config::load_with_layers(
            &[Some(global), Some(workspace_path)],
            EnvOverrides::default(),
        )?;

        assert_eq!(config.defaults.locator(), "dynamic");
        assert_eq!(config.defaults.format(), "plain");
        assert_eq!(config.defaults.heading_level(), 3);
        assert!(!config.defaults.skip_when_error());
        assert_eq!(config.ignore.patterns, vec!["*.cache", "generated/"]);
        assert_eq!(config.filter.no_ignore_modules, vec!["requests"]);
        assert_eq!(
            config.interpreter.search_paths,
            vec![workspace_dir.join(".pyctx/venv/lib/site-packages")]
        );
        assert_eq!(config.focus.get("Entry"), Some(&PathBuf::from("src/app.py")));

        Ok(())
    }

    #[test]
    fn env_overrides_take_precedence() -> Result<()> {
        let overrides = EnvOverrides::for_tests("dynamic", "/opt/python/bin/python3");
        let config = Config::load_with_layers(&[], overrides)?;
        assert_eq!(config.defaults.locator(), "dynamic");
        assert_eq!(config.interpreter.program(), "/opt/python/bin/python3");
        Ok(())
    }

    #[test]
    fn invalid_config_returns_error() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let file = temp.path().join("broken.toml");
        fs::write(&file, "this is not toml")?;
        let result = Config::from_file(&file);
        assert!(result.is_err());
        Ok(())
    }

    #[test]
    fn later_layer_can_restore_a_built_in_value() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let global = temp.path().join("global.toml");
        fs::write(&global, "[defaults]\nlocator = \"dynamic\"\nformat = \"plain\"\n[interpreter]\nprogram = \"pypy3\"\n")?;
        let workspace = temp.path().join("workspace.toml");
        fs::write(&workspace, "[defaults]\nlocator = \"static\"\n[interpreter]\nprogram = \"python3\"\n")?;

        let config = Config::load_with_layers(&[Some(global), Some(workspace)], EnvOverrides::default())?;
        assert_eq!(config.defaults.locator(), "static");
        assert_eq!(config.defaults.format(), "plain");
        assert_eq!(config.interpreter.program(), "python3");
        Ok(())
    }

    #[test]
    fn heading_level_is_clamped() {
        let config: Config = toml::from_str("[defaults]\nheading_level = 9\n").unwrap();
        assert_eq!(config.defaults.heading_level(), 6);
    }
}
