//! Ignore rules for project walks.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use once_cell::sync::Lazy;

use crate::domain::errors::IgnoreError;

/// Build output, caches, VCS/IDE metadata, and packaging artifacts ignored in every walk.
pub const BASE_PATTERNS: &[&str] = &[
    // byte-compiled files
    "__pycache__/",
    "*.py[cod]",
    "*$py.class",
    // packaging
    ".Python",
    "build/",
    "develop-eggs/",
    "dist/",
    "downloads/",
    "eggs/",
    ".eggs/",
    "parts/",
    "sdist/",
    "var/",
    "wheels/",
    "pip-wheel-metadata/",
    "share/python-wheels/",
    "*.egg-info/",
    ".installed.cfg",
    "*.egg",
    "MANIFEST",
    "*.manifest",
    "*.spec",
    "pip-log.txt",
    "pip-delete-this-directory.txt",
    "__pypackages__/",
    // test and coverage output
    "htmlcov/",
    ".tox/",
    ".nox/",
    ".coverage",
    ".coverage.*",
    ".cache",
    "nosetests.xml",
    "coverage.xml",
    "*.cover",
    "*.py,cover",
    ".hypothesis/",
    ".pytest_cache/",
    // type checkers
    ".mypy_cache/",
    ".dmypy.json",
    "dmypy.json",
    ".pyre/",
    ".pytype/",
    "cython_debug/",
    // translations
    "*.mo",
    "*.pot",
    // framework leftovers
    "*.log",
    "local_settings.py",
    "db.sqlite3",
    "db.sqlite3-journal",
    "instance/",
    ".webassets-cache",
    ".scrapy",
    "docs/_build/",
    "target/",
    ".ipynb_checkpoints",
    "profile_default/",
    "ipython_config.py",
    "celerybeat-schedule",
    "celerybeat.pid",
    "*.sage.py",
    "/site",
    // environments and tool settings
    ".python-version",
    "Pipfile.lock",
    "poetry.lock",
    ".pypoetry/",
    ".pdm.toml",
    ".env",
    ".venv",
    "env/",
    "venv/",
    "ENV/",
    "env.bak/",
    "venv.bak/",
    ".spyderproject",
    ".spyproject",
    ".ropeproject",
    // version control
    ".git/",
    ".hg/",
    ".svn/",
    // editors and operating systems
    ".vscode/",
    ".idea/",
    "*.swp",
    "*.swo",
    "*~",
    ".DS_Store",
    ".DS_Store?",
    "._*",
    ".Spotlight-V100",
    ".Trashes",
    "ehthumbs.db",
    "[Tt]humbs.db",
    // scratch files
    "*.tmp",
    "*.bak",
    "logs/",
];

static RULE_SET_CACHE: Lazy<DashMap<Vec<String>, Arc<IgnoreRuleSet>>> = Lazy::new(DashMap::new);

/// Compiled union of the base patterns and caller-supplied extras.
///
/// Negated patterns are rejected, so matching is pure set membership and the order in which
/// patterns were supplied is not observable.
#[derive(Debug, Clone)]
pub struct IgnoreRuleSet {
    extra: Vec<String>,
    matcher: Gitignore,
}

impl IgnoreRuleSet {
    /// Compile the base patterns plus `extra` into a fresh matcher.
    pub fn new<S: AsRef<str>>(extra: &[S]) -> Result<Self, IgnoreError> {
        let mut extra: Vec<String> = extra
            .iter()
            .map(|pattern| pattern.as_ref().trim_end().to_owned())
            .filter(|pattern| !pattern.is_empty())
            .collect();
        extra.sort();

        let mut builder = GitignoreBuilder::new("");
        for pattern in BASE_PATTERNS.iter().copied().chain(extra.iter().map(String::as_str)) {
            if pattern.starts_with('!') {
                return Err(IgnoreError::NegationUnsupported(pattern.to_owned()));
            }
            builder
                .add_line(None, pattern)
                .map_err(|err| IgnoreError::InvalidPattern {
                    pattern: pattern.to_owned(),
                    message: err.to_string(),
                })?;
        }

        let matcher = builder.build().map_err(|err| IgnoreError::InvalidPattern {
            pattern: extra.join(", "),
            message: err.to_string(),
        })?;

        Ok(Self { extra, matcher })
    }

    /// Shared matcher for a pattern multiset, compiled at most once per process.
    pub fn cached<S: AsRef<str>>(extra: &[S]) -> Result<Arc<Self>, IgnoreError> {
        let compiled = Self::new(extra)?;
        if let Some(existing) = RULE_SET_CACHE.get(&compiled.extra) {
            return Ok(existing.clone());
        }
        let shared = Arc::new(compiled);
        let entry = RULE_SET_CACHE
            .entry(shared.extra.clone())
            .or_insert_with(|| shared.clone());
        Ok(entry.clone())
    }

    /// The extra patterns in canonical (sorted) order.
    pub fn extra_patterns(&self) -> &[String] {
        &self.extra
    }

    /// Whether a file at `relative_path` is ignored, directly or through an ignored parent.
    pub fn matches(&self, relative_path: impl AsRef<Path>) -> bool {
        self.matches_entry(relative_path, false)
    }

    /// Like [`IgnoreRuleSet::matches`], for an entry known to be a directory or not.
    pub fn matches_entry(&self, relative_path: impl AsRef<Path>, is_dir: bool) -> bool {
        let path = relative_components(relative_path.as_ref());
        if path.as_os_str().is_empty() {
            return false;
        }
        self.matcher
            .matched_path_or_any_parents(&path, is_dir)
            .is_ignore()
    }
}

fn relative_components(path: &Path) -> PathBuf {
    path.components()
        .filter(|component| matches!(component, Component::Normal(_)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const NO_EXTRA: &[&str] = &[];

    #[test]
    fn base_patterns_cover_caches_but_not_sources() {
        let rules = IgnoreRuleSet::new(NO_EXTRA).unwrap();
        assert!(rules.matches("__pycache__/x.bin"));
        assert!(rules.matches("pkg/__pycache__/mod.cpython-311.pyc"));
        assert!(rules.matches("module.pyc"));
        assert!(rules.matches(".git/config"));
        assert!(rules.matches_entry("build", true));
        assert!(!rules.matches("main.src"));
        assert!(!rules.matches("main.py"));
    }

    #[test]
    fn directory_patterns_only_match_directories() {
        let rules = IgnoreRuleSet::new(&["generated/"]).unwrap();
        assert!(rules.matches_entry("generated", true));
        assert!(rules.matches("generated/output.py"));
        assert!(!rules.matches_entry("generated", false));
    }

    #[test]
    fn extra_patterns_extend_the_base() {
        let rules = IgnoreRuleSet::new(&["*.txt", "temp/", "*.log"]).unwrap();
        assert!(rules.matches("test.txt"));
        assert!(rules.matches("temp/file.py"));
        assert!(rules.matches("error.log"));
        assert!(rules.matches("__pycache__/test.pyc"));
        assert!(!rules.matches("main.py"));
    }

    #[test]
    fn pattern_order_is_not_observable() {
        let patterns = ["*.txt", "data/", "notes*", "*.txt"];
        let reversed: Vec<&str> = patterns.iter().rev().copied().collect();
        let forward = IgnoreRuleSet::new(&patterns).unwrap();
        let backward = IgnoreRuleSet::new(&reversed).unwrap();
        assert_eq!(forward.extra_patterns(), backward.extra_patterns());

        for path in [
            "a.txt",
            "data/x.py",
            "notes.md",
            "src/notes/readme.py",
            "src/main.py",
            "data.py",
        ] {
            assert_eq!(forward.matches(path), backward.matches(path), "{path}");
        }
    }

    #[test]
    fn cached_rule_sets_are_shared_per_multiset() {
        let first = IgnoreRuleSet::cached(&["b/", "a/"]).unwrap();
        let second = IgnoreRuleSet::cached(&["a/", "b/"]).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn rejects_negated_patterns() {
        let err = IgnoreRuleSet::new(&["!keep.py"]).unwrap_err();
        assert_eq!(err, IgnoreError::NegationUnsupported("!keep.py".into()));
    }

    #[test]
    fn leading_separators_are_ignored() {
        let rules = IgnoreRuleSet::new(NO_EXTRA).unwrap();
        assert!(rules.matches("/__pycache__/x.bin"));
        assert!(!rules.matches(""));
    }
}
