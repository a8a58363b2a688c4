//! Directory mode: bundle every matching source file under a root.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::app::bundle::{Bundle, ContextBundler, error_chain};
use crate::domain::errors::BundleError;
use crate::infra::ignore::IgnoreRuleSet;

pub const DEFAULT_INCLUDE: &str = "**/*.py";

/// Configuration inputs for a batch run.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Globs, relative to the root, selecting the files to bundle.
    pub include: Vec<String>,
    /// Worker threads; `0` lets rayon decide.
    pub jobs: usize,
    /// Directory receiving one rendered bundle per source file.
    pub output_dir: Option<PathBuf>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            include: vec![DEFAULT_INCLUDE.to_owned()],
            jobs: 0,
            output_dir: None,
        }
    }
}

/// What happened to one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    Bundled {
        diagnostics: usize,
        tokens: usize,
        output: Option<PathBuf>,
    },
    /// The file could not be parsed or one of its imports failed in strict mode.
    Skipped { diagnostic: String },
    /// I/O, template, or configuration failure.
    Fatal { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileOutcome {
    pub path: PathBuf,
    #[serde(flatten)]
    pub status: OutcomeStatus,
}

impl FileOutcome {
    pub fn is_bundled(&self) -> bool {
        matches!(self.status, OutcomeStatus::Bundled { .. })
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self.status, OutcomeStatus::Fatal { .. })
    }
}

/// Bundle every selected file under `root`. Outcomes come back in path order.
pub fn run_batch(
    bundler: &ContextBundler,
    root: &Path,
    options: &BatchOptions,
) -> Result<Vec<FileOutcome>> {
    if !root.is_dir() {
        bail!("batch root is not a directory: {}", root.display());
    }
    let rules = IgnoreRuleSet::cached(&bundler.options().ignore_patterns)?;
    let include = build_include_set(&options.include)?;
    let files = discover_sources(root, &rules, &include);
    info!(root = %root.display(), files = files.len(), "starting batch");

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.jobs)
        .build()
        .context("failed to start batch worker pool")?;
    let outcomes: Vec<FileOutcome> = pool.install(|| {
        files
            .par_iter()
            .map(|path| process_file(bundler, root, path, options))
            .collect()
    });

    let bundled = outcomes.iter().filter(|outcome| outcome.is_bundled()).count();
    let fatal = outcomes.iter().filter(|outcome| outcome.is_fatal()).count();
    info!(
        bundled,
        skipped = outcomes.len() - bundled - fatal,
        fatal,
        "batch finished"
    );
    Ok(outcomes)
}

/// Sorted list of files under `root` kept by `rules` and matched by `include`.
pub fn discover_sources(root: &Path, rules: &IgnoreRuleSet, include: &GlobSet) -> Vec<PathBuf> {
    let mut builder = WalkBuilder::new(root);
    builder.standard_filters(false).follow_links(false);
    builder.filter_entry({
        let root = root.to_path_buf();
        let rules = rules.clone();
        move |entry| {
            if entry.depth() == 0 {
                return true;
            }
            let rel = entry.path().strip_prefix(&root).unwrap_or(entry.path());
            let is_dir = entry.file_type().is_some_and(|kind| kind.is_dir());
            !rules.matches_entry(rel, is_dir)
        }
    });

    let mut files = Vec::new();
    for result in builder.build() {
        let entry = match result {
            Ok(entry) => entry,
            Err(err) => {
                warn!(error = %err, "batch walk error");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|kind| kind.is_file()) {
            continue;
        }
        let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
        if include.is_match(rel) {
            files.push(entry.into_path());
        }
    }
    files.sort();
    files
}

pub fn build_include_set(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).with_context(|| format!("invalid include glob '{pattern}'"))?;
        builder.add(glob);
    }
    builder.build().context("failed to build include globs")
}

fn process_file(
    bundler: &ContextBundler,
    root: &Path,
    path: &Path,
    options: &BatchOptions,
) -> FileOutcome {
    let rel = path.strip_prefix(root).unwrap_or(path).to_path_buf();
    let status = match bundler.bundle(path) {
        Ok(bundle) => match write_output(bundler, &rel, &bundle, options.output_dir.as_deref()) {
            Ok(output) => {
                info!(file = %rel.display(), tokens = bundle.tokens, "bundled");
                OutcomeStatus::Bundled {
                    diagnostics: bundle.diagnostics.len(),
                    tokens: bundle.tokens,
                    output,
                }
            }
            Err(err) => {
                warn!(file = %rel.display(), error = %format!("{err:#}"), "failed to write bundle");
                OutcomeStatus::Fatal {
                    error: format!("{err:#}"),
                }
            }
        },
        Err(err) => {
            let message = error_chain(&err);
            warn!(file = %rel.display(), error = %message, "bundle failed");
            if is_skippable(&err) {
                OutcomeStatus::Skipped {
                    diagnostic: message,
                }
            } else {
                OutcomeStatus::Fatal { error: message }
            }
        }
    };
    FileOutcome { path: rel, status }
}

fn is_skippable(err: &BundleError) -> bool {
    matches!(err, BundleError::Parse { .. }) || err.is_recoverable()
}

fn write_output(
    bundler: &ContextBundler,
    rel: &Path,
    bundle: &Bundle,
    output_dir: Option<&Path>,
) -> Result<Option<PathBuf>> {
    let Some(output_dir) = output_dir else {
        return Ok(None);
    };
    let destination = output_dir
        .join(rel)
        .with_extension(bundler.options().format.extension());
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory: {}", parent.display()))?;
    }
    fs::write(&destination, &bundle.text)
        .with_context(|| format!("failed to write bundle to {}", destination.display()))?;
    Ok(Some(destination))
}
