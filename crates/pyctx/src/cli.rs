//! Command-line surface of the `pyctx` binary.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tracing::info;

use crate::app::batch::{BatchOptions, DEFAULT_INCLUDE, OutcomeStatus, run_batch};
use crate::app::bundle::{BundleFormat, BundleOptions, ContextBundler};
use crate::app::imports::extract_imports;
use crate::app::locate::LocatorKind;
use crate::app::modules::PackageLayout;
use crate::app::tree::{FocusItems, build_tree, render_tree};
use crate::infra::config::Config;
use crate::infra::ignore::IgnoreRuleSet;

#[derive(Debug, Parser)]
#[command(
    name = "pyctx",
    author,
    version,
    about = "Bundle a Python source file with the code it imports",
    long_about = None
)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file layered over the global and workspace configs.
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Bundle one file with the source of its imports
    Bundle(BundleArgs),
    /// List the import declarations of a file
    Imports {
        file: PathBuf,
        /// Print declarations as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the module identity of a file
    Module { file: PathBuf },
    /// Render a pruned project tree
    Tree(TreeArgs),
    /// Bundle every source file under a directory
    Batch(BatchArgs),
    /// Print shell completions
    Completions { shell: Shell },
}

/// Options shared by `bundle` and `batch`.
#[derive(Debug, Args)]
pub struct EngineArgs {
    /// Include the module directory tree
    #[arg(long)]
    pub tree: bool,
    /// Abort on the first failed import instead of recording a diagnostic
    #[arg(long)]
    pub strict: bool,
    #[arg(long, value_enum)]
    pub locator: Option<LocatorKind>,
    #[arg(long, value_enum)]
    pub format: Option<BundleFormat>,
    /// Template name or path
    #[arg(long)]
    pub template: Option<String>,
    /// Annotate a path in the project tree
    #[arg(long = "focus", value_name = "LABEL=PATH", value_parser = parse_focus)]
    pub focus: Vec<(String, PathBuf)>,
    /// Extra ignore pattern
    #[arg(long = "ignore", value_name = "PATTERN")]
    pub ignore: Vec<String>,
    /// Always leave imports of this top-level module out
    #[arg(long = "ignore-module", value_name = "MODULE")]
    pub ignore_modules: Vec<String>,
    /// Always keep imports of this top-level module
    #[arg(long = "no-ignore-module", value_name = "MODULE")]
    pub no_ignore_modules: Vec<String>,
    /// Interpreter used by the dynamic locator
    #[arg(long, value_name = "PROGRAM")]
    pub python: Option<String>,
}

impl EngineArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(locator) = self.locator {
            config.defaults.locator = Some(locator.to_string());
        }
        if let Some(python) = &self.python {
            config.interpreter.program = Some(python.clone());
        }
        config
            .filter
            .ignore_modules
            .extend(self.ignore_modules.iter().cloned());
        config
            .filter
            .no_ignore_modules
            .extend(self.no_ignore_modules.iter().cloned());
    }

    fn options(&self, config: &Config) -> Result<BundleOptions> {
        let mut options = BundleOptions::from_config(config)?;
        options.show_project_tree |= self.tree;
        if self.strict {
            options.skip_when_error = false;
        }
        if let Some(format) = self.format {
            options.format = format;
        }
        if let Some(template) = &self.template {
            options.template = Some(template.clone());
        }
        options.ignore_patterns.extend(self.ignore.iter().cloned());
        options.focus.extend(self.focus.iter().cloned());
        Ok(options)
    }

    fn bundler(&self, mut config: Config) -> Result<ContextBundler> {
        self.apply(&mut config);
        let options = self.options(&config)?;
        ContextBundler::from_config(&config, options)
    }
}

#[derive(Debug, Args)]
pub struct BundleArgs {
    pub file: PathBuf,
    #[command(flatten)]
    pub engine: EngineArgs,
    /// Write the bundle to a file instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
    /// Print the bundle and its sections as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct TreeArgs {
    pub dir: PathBuf,
    #[arg(long = "ignore", value_name = "PATTERN")]
    pub ignore: Vec<String>,
    #[arg(long = "focus", value_name = "LABEL=PATH", value_parser = parse_focus)]
    pub focus: Vec<(String, PathBuf)>,
}

#[derive(Debug, Args)]
pub struct BatchArgs {
    pub dir: PathBuf,
    #[command(flatten)]
    pub engine: EngineArgs,
    /// Worker threads (0 = one per core)
    #[arg(short, long, default_value_t = 0)]
    pub jobs: usize,
    /// Write one bundle per source file under this directory
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,
    /// Glob selecting files to bundle
    #[arg(long = "include", value_name = "GLOB", default_value = DEFAULT_INCLUDE)]
    pub include: Vec<String>,
    /// Print outcomes as JSON
    #[arg(long)]
    pub json: bool,
}

fn parse_focus(value: &str) -> Result<(String, PathBuf), String> {
    match value.split_once('=') {
        Some((label, path)) if !label.trim().is_empty() && !path.is_empty() => {
            Ok((label.trim().to_owned(), PathBuf::from(path)))
        }
        _ => Err(format!("expected LABEL=PATH, got '{value}'")),
    }
}

/// Execute a parsed command line.
pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "pyctx", &mut io::stdout());
            Ok(())
        }
        Command::Imports { file, json } => print_imports(&file, json),
        Command::Module { file } => print_module(&file),
        Command::Tree(args) => {
            let config = Config::load_with_extra(cli.config.as_deref())?;
            print_tree(&args, &config)
        }
        Command::Bundle(args) => {
            let config = Config::load_with_extra(cli.config.as_deref())?;
            bundle(&args, config)
        }
        Command::Batch(args) => {
            let config = Config::load_with_extra(cli.config.as_deref())?;
            batch(&args, config)
        }
    }
}

fn print_imports(file: &Path, json: bool) -> Result<()> {
    let source = fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let declarations = extract_imports(&source)
        .with_context(|| format!("failed to parse {}", file.display()))?;

    let mut stdout = io::stdout().lock();
    if json {
        writeln!(stdout, "{}", serde_json::to_string_pretty(&declarations)?)?;
    } else {
        for declaration in &declarations {
            writeln!(
                stdout,
                "{}:{}\t{declaration}",
                declaration.line(),
                declaration.column()
            )?;
        }
    }
    Ok(())
}

fn print_module(file: &Path) -> Result<()> {
    let absolute = std::path::absolute(file)
        .with_context(|| format!("failed to resolve {}", file.display()))?;
    let location = PackageLayout::default()
        .locate(&absolute)
        .with_context(|| format!("failed to locate module for {}", file.display()))?;

    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{}", location.identity)?;
    writeln!(stdout, "root: {}", location.root.display())?;
    writeln!(stdout, "relative: {}", location.relative_file().display())?;
    writeln!(stdout, "top-level: {}", location.top_level_dir().display())?;
    Ok(())
}

fn print_tree(args: &TreeArgs, config: &Config) -> Result<()> {
    let mut patterns = config.ignore.patterns.clone();
    patterns.extend(args.ignore.iter().cloned());
    let rules = IgnoreRuleSet::new(&patterns)?;
    let mut focus: FocusItems = config.focus.clone();
    focus.extend(args.focus.iter().cloned());

    let tree = build_tree(&args.dir, &rules, &focus)?;
    writeln!(io::stdout().lock(), "{}", render_tree(&tree))?;
    Ok(())
}

fn bundle(args: &BundleArgs, config: Config) -> Result<()> {
    let bundler = args.engine.bundler(config)?;
    let bundle = bundler
        .bundle(&args.file)
        .with_context(|| format!("failed to bundle {}", args.file.display()))?;
    info!(
        file = %bundle.source_file.display(),
        locator = %bundler.locator_kind(),
        sections = bundle.sections.len(),
        diagnostics = bundle.diagnostics.len(),
        tokens = bundle.tokens,
        "bundle ready"
    );

    let rendered = if args.json {
        serde_json::to_string_pretty(&bundle)?
    } else {
        bundle.text
    };
    match &args.output {
        Some(path) => {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create output directory: {}", parent.display())
                })?;
            }
            fs::write(path, &rendered)
                .with_context(|| format!("failed to write bundle to {}", path.display()))?;
        }
        None => writeln!(io::stdout().lock(), "{rendered}")?,
    }
    Ok(())
}

fn batch(args: &BatchArgs, config: Config) -> Result<()> {
    let bundler = args.engine.bundler(config)?;
    let options = BatchOptions {
        include: args.include.clone(),
        jobs: args.jobs,
        output_dir: args.output_dir.clone(),
    };
    let outcomes = run_batch(&bundler, &args.dir, &options)?;

    let mut stdout = io::stdout().lock();
    if args.json {
        writeln!(stdout, "{}", serde_json::to_string_pretty(&outcomes)?)?;
    } else {
        for outcome in &outcomes {
            let path = outcome.path.display();
            match &outcome.status {
                OutcomeStatus::Bundled {
                    diagnostics,
                    tokens,
                    ..
                } => writeln!(
                    stdout,
                    "bundled\t{path}\t{tokens} tokens, {diagnostics} diagnostics"
                )?,
                OutcomeStatus::Skipped { diagnostic } => {
                    writeln!(stdout, "skipped\t{path}\t{diagnostic}")?
                }
                OutcomeStatus::Fatal { error } => writeln!(stdout, "fatal\t{path}\t{error}")?,
            }
        }
    }

    let fatal = outcomes.iter().filter(|outcome| outcome.is_fatal()).count();
    if fatal > 0 {
        bail!("{fatal} file(s) failed fatally");
    }
    Ok(())
}
