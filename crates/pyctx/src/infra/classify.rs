//! Module classification and dependency popularity.
//!
//! Decides which import declarations are uninteresting enough to leave out of a bundle:
//! builtins, the standard library, and widely used third-party distributions.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::app::locate::ExecutionContext;
use crate::app::modules::PackageLayout;
use crate::domain::model::{ImportDeclaration, ModuleIdentity};

/// Modules compiled into the interpreter.
const BUILTIN_MODULES: &[&str] = &[
    "_abc", "_ast", "_codecs", "_collections", "_functools", "_imp", "_io", "_locale",
    "_operator", "_signal", "_sre", "_stat", "_string", "_symtable", "_thread", "_tokenize",
    "_tracemalloc", "_typing", "_warnings", "_weakref", "atexit", "builtins", "errno",
    "faulthandler", "gc", "itertools", "marshal", "posix", "pwd", "sys", "time", "xxsubtype",
];

/// Top-level names shipped with the standard library.
const STANDARD_MODULES: &[&str] = &[
    "__future__", "_thread", "abc", "aifc", "argparse", "array", "ast", "asynchat", "asyncio",
    "asyncore", "base64", "bdb", "binascii", "bisect", "bz2", "cProfile", "calendar", "cgi",
    "cgitb", "chunk", "cmath", "cmd", "code", "codecs", "codeop", "collections", "colorsys",
    "compileall", "concurrent", "configparser", "contextlib", "contextvars", "copy", "copyreg",
    "crypt", "csv", "ctypes", "curses", "dataclasses", "datetime", "dbm", "decimal", "difflib",
    "dis", "distutils", "doctest", "email", "encodings", "ensurepip", "enum", "fcntl",
    "filecmp", "fileinput", "fnmatch", "fractions", "ftplib", "functools", "genericpath",
    "getopt", "getpass", "gettext", "glob", "graphlib", "grp", "gzip", "hashlib", "heapq",
    "hmac", "html", "http", "idlelib", "imaplib", "imghdr", "imp", "importlib", "inspect",
    "io", "ipaddress", "json", "keyword", "lib2to3", "linecache", "locale", "logging", "lzma",
    "mailbox", "mailcap", "math", "mimetypes", "mmap", "modulefinder", "msilib", "msvcrt",
    "multiprocessing", "netrc", "nis", "nntplib", "nt", "ntpath", "numbers", "opcode",
    "operator", "optparse", "os", "ossaudiodev", "pathlib", "pdb", "pickle", "pickletools",
    "pipes", "pkgutil", "platform", "plistlib", "poplib", "posixpath", "pprint", "profile",
    "pstats", "pty", "py_compile", "pyclbr", "pydoc", "pydoc_data", "pyexpat", "queue",
    "quopri", "random", "re", "readline", "reprlib", "resource", "rlcompleter", "runpy",
    "sched", "secrets", "select", "selectors", "shelve", "shlex", "shutil", "signal", "site",
    "smtpd", "smtplib", "sndhdr", "socket", "socketserver", "spwd", "sqlite3", "sre_compile",
    "sre_constants", "sre_parse", "ssl", "stat", "statistics", "string", "stringprep",
    "struct", "subprocess", "sunau", "symtable", "sysconfig", "syslog", "tabnanny", "tarfile",
    "telnetlib", "tempfile", "termios", "textwrap", "this", "threading", "timeit", "tkinter",
    "token", "tokenize", "tomllib", "trace", "traceback", "tracemalloc", "tty", "turtle",
    "turtledemo", "types", "typing", "unicodedata", "unittest", "urllib", "uu", "uuid", "venv",
    "warnings", "wave", "weakref", "webbrowser", "winreg", "winsound", "wsgiref", "xdrlib",
    "xml", "xmlrpc", "zipapp", "zipfile", "zipimport", "zlib", "zoneinfo",
];

/// Import names whose distribution is published under a different name.
const DISTRIBUTION_ALIASES: &[(&str, &str)] = &[
    ("Crypto", "pycryptodome"),
    ("OpenSSL", "pyOpenSSL"),
    ("PIL", "Pillow"),
    ("attr", "attrs"),
    ("bs4", "beautifulsoup4"),
    ("cv2", "opencv-python"),
    ("dateutil", "python-dateutil"),
    ("docx", "python-docx"),
    ("dotenv", "python-dotenv"),
    ("fitz", "PyMuPDF"),
    ("git", "GitPython"),
    ("jose", "python-jose"),
    ("jwt", "PyJWT"),
    ("magic", "python-magic"),
    ("multipart", "python-multipart"),
    ("pkg_resources", "setuptools"),
    ("serial", "pyserial"),
    ("skimage", "scikit-image"),
    ("sklearn", "scikit-learn"),
    ("usb", "pyusb"),
    ("win32api", "pywin32"),
    ("yaml", "PyYAML"),
    ("zmq", "pyzmq"),
];

static NAME_SEPARATORS: Lazy<Regex> = Lazy::new(|| compile_regex(r"[-_.]+"));

fn compile_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|err| panic!("invalid regex literal {pattern}: {err}"))
}

/// Canonical distribution name: lowercase with separator runs collapsed to `-`.
pub fn normalize_distribution(name: &str) -> String {
    NAME_SEPARATORS
        .replace_all(name.trim(), "-")
        .to_ascii_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    Builtin,
    Standard,
    ThirdParty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleInfo {
    pub kind: ModuleKind,
    /// Published distribution providing the module, when known.
    pub distribution: Option<String>,
}

impl ModuleInfo {
    pub fn is_third_party(&self) -> bool {
        self.kind == ModuleKind::ThirdParty
    }
}

/// Classifies top-level module names as seen from one execution context. `None` means the
/// module is unknown.
pub trait ModuleClassifier: Send + Sync {
    fn classify(&self, root_module: &str, context: &ExecutionContext) -> Option<ModuleInfo>;
}

/// Answers whether a distribution is popular enough to be assumed known.
pub trait PopularityOracle: Send + Sync {
    fn is_popular(&self, distribution: &str, min_last_month_downloads: u64) -> bool;

    /// Whether the oracle has any record of the distribution.
    fn knows(&self, distribution: &str) -> bool;
}

/// Classifier backed by embedded name tables and a filesystem lookup.
///
/// Search roots of the context that are not site roots hold first-party code (third-party
/// without a distribution); site roots hold installed packages. Names found nowhere are still
/// classified when the oracle knows them.
pub struct StaticClassifier {
    layout: PackageLayout,
    site_roots: Vec<PathBuf>,
    oracle: Arc<dyn PopularityOracle>,
}

impl StaticClassifier {
    pub fn new(
        layout: PackageLayout,
        site_roots: Vec<PathBuf>,
        oracle: Arc<dyn PopularityOracle>,
    ) -> Self {
        Self {
            layout,
            site_roots,
            oracle,
        }
    }

    fn distribution_for(root_module: &str) -> String {
        DISTRIBUTION_ALIASES
            .iter()
            .find(|(import, _)| *import == root_module)
            .map(|(_, distribution)| (*distribution).to_owned())
            .unwrap_or_else(|| root_module.to_owned())
    }
}

impl ModuleClassifier for StaticClassifier {
    fn classify(&self, root_module: &str, context: &ExecutionContext) -> Option<ModuleInfo> {
        if BUILTIN_MODULES.contains(&root_module) {
            return Some(ModuleInfo {
                kind: ModuleKind::Builtin,
                distribution: None,
            });
        }
        if STANDARD_MODULES.contains(&root_module) {
            return Some(ModuleInfo {
                kind: ModuleKind::Standard,
                distribution: None,
            });
        }

        let identity = ModuleIdentity::parse(root_module);
        let project_roots: Vec<PathBuf> = context
            .search_path()
            .iter()
            .filter(|root| !self.site_roots.contains(root))
            .cloned()
            .collect();
        if self.layout.find_module(&project_roots, &identity).is_some() {
            return Some(ModuleInfo {
                kind: ModuleKind::ThirdParty,
                distribution: None,
            });
        }

        let distribution = Self::distribution_for(root_module);
        let installed = self.layout.find_module(&self.site_roots, &identity).is_some();
        (installed || self.oracle.knows(&distribution)).then_some(ModuleInfo {
            kind: ModuleKind::ThirdParty,
            distribution: Some(distribution),
        })
    }
}

/// Monthly download counts per distribution plus names treated as popular regardless.
#[derive(Debug, Clone, Default)]
pub struct DownloadTable {
    last_month: HashMap<String, u64>,
    always_popular: HashSet<String>,
}

impl DownloadTable {
    pub fn new<S: AsRef<str>>(always_popular: &[S]) -> Self {
        Self {
            last_month: HashMap::new(),
            always_popular: always_popular
                .iter()
                .map(|name| normalize_distribution(name.as_ref()))
                .collect(),
        }
    }

    /// Load `name,last_month` rows from a CSV file with a header line.
    pub fn with_csv_file(self, path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read downloads table {}", path.display()))?;
        self.with_csv(&contents)
            .with_context(|| format!("invalid downloads table {}", path.display()))
    }

    pub fn with_csv(mut self, contents: &str) -> Result<Self> {
        let mut rows = contents.lines().enumerate().filter(|(_, line)| !line.trim().is_empty());
        let Some((_, header)) = rows.next() else {
            return Ok(self);
        };
        let columns: Vec<&str> = header.split(',').map(str::trim).collect();
        let position = |wanted: &str| {
            columns
                .iter()
                .position(|column| *column == wanted)
                .ok_or_else(|| anyhow!("missing '{wanted}' column"))
        };
        let name_column = position("name")?;
        let count_column = position("last_month")?;

        for (index, line) in rows {
            let fields: Vec<&str> = line.split(',').map(|field| field.trim().trim_matches('"')).collect();
            let (Some(name), Some(count)) = (fields.get(name_column), fields.get(count_column)) else {
                return Err(anyhow!("line {}: expected {} columns", index + 1, columns.len()));
            };
            let count: u64 = count
                .parse()
                .with_context(|| format!("line {}: invalid download count '{count}'", index + 1))?;
            self.last_month.insert(normalize_distribution(name), count);
        }
        Ok(self)
    }
}

impl PopularityOracle for DownloadTable {
    fn is_popular(&self, distribution: &str, min_last_month_downloads: u64) -> bool {
        let name = normalize_distribution(distribution);
        self.always_popular.contains(&name)
            || self
                .last_month
                .get(&name)
                .is_some_and(|count| *count >= min_last_month_downloads)
    }

    fn knows(&self, distribution: &str) -> bool {
        let name = normalize_distribution(distribution);
        self.always_popular.contains(&name) || self.last_month.contains_key(&name)
    }
}

/// Filtering policy applied to a primary file's declarations.
pub struct DependencyFilter {
    enabled: bool,
    min_last_month_downloads: u64,
    ignore_modules: BTreeSet<String>,
    no_ignore_modules: BTreeSet<String>,
    classifier: Arc<dyn ModuleClassifier>,
    oracle: Arc<dyn PopularityOracle>,
}

impl DependencyFilter {
    pub fn new(
        classifier: Arc<dyn ModuleClassifier>,
        oracle: Arc<dyn PopularityOracle>,
        min_last_month_downloads: u64,
    ) -> Self {
        Self {
            enabled: true,
            min_last_month_downloads,
            ignore_modules: BTreeSet::new(),
            no_ignore_modules: BTreeSet::new(),
            classifier,
            oracle,
        }
    }

    /// A filter that keeps every declaration.
    pub fn disabled() -> Self {
        let oracle = Arc::new(DownloadTable::default());
        let classifier = Arc::new(StaticClassifier::new(
            PackageLayout::default(),
            Vec::new(),
            oracle.clone(),
        ));
        let mut filter = Self::new(classifier, oracle, 0);
        filter.enabled = false;
        filter
    }

    pub fn with_ignore_modules<I, S>(mut self, modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore_modules.extend(modules.into_iter().map(Into::into));
        self
    }

    pub fn with_no_ignore_modules<I, S>(mut self, modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.no_ignore_modules
            .extend(modules.into_iter().map(Into::into));
        self
    }

    /// Whether the declaration should be left out of a bundle built in `context`.
    pub fn should_elide(&self, declaration: &ImportDeclaration, context: &ExecutionContext) -> bool {
        if !self.enabled || declaration.is_relative() {
            return false;
        }

        let root = declaration.root_module();
        if self.ignore_modules.contains(root) {
            return true;
        }
        if self.no_ignore_modules.contains(root) {
            return false;
        }

        let Some(info) = self.classifier.classify(root, context) else {
            return true;
        };
        if !info.is_third_party() {
            return true;
        }
        info.distribution
            .as_deref()
            .is_some_and(|name| self.oracle.is_popular(name, self.min_last_month_downloads))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::app::imports::extract_imports;

    fn declaration(source: &str) -> ImportDeclaration {
        extract_imports(source).unwrap().remove(0)
    }

    fn filter_with(table: DownloadTable) -> DependencyFilter {
        let oracle: Arc<dyn PopularityOracle> = Arc::new(table);
        let classifier = Arc::new(StaticClassifier::new(
            PackageLayout::default(),
            Vec::new(),
            oracle.clone(),
        ));
        DependencyFilter::new(classifier, oracle, 1_000_000)
    }

    fn context(project: &Path) -> ExecutionContext {
        ExecutionContext::new(vec![project.to_path_buf()])
    }

    #[test]
    fn normalizes_distribution_names() {
        assert_eq!(normalize_distribution("Python_Dateutil"), "python-dateutil");
        assert_eq!(normalize_distribution("ruamel.yaml"), "ruamel-yaml");
        assert_eq!(normalize_distribution("a--b__c"), "a-b-c");
    }

    #[test]
    fn classifies_builtin_standard_and_local_modules() -> Result<()> {
        let temp = tempfile::tempdir()?;
        fs::create_dir_all(temp.path().join("mylib"))?;
        fs::write(temp.path().join("mylib/__init__.py"), "")?;

        let oracle = Arc::new(DownloadTable::new(&["requests"]));
        let classifier = StaticClassifier::new(PackageLayout::default(), Vec::new(), oracle);
        let context = context(temp.path());
        let kind = |name: &str| classifier.classify(name, &context).map(|info| info.kind);
        assert_eq!(kind("sys"), Some(ModuleKind::Builtin));
        assert_eq!(kind("os"), Some(ModuleKind::Standard));
        let local = classifier.classify("mylib", &context).unwrap();
        assert!(local.is_third_party());
        assert_eq!(local.distribution, None);
        let known = classifier.classify("requests", &context).unwrap();
        assert_eq!(known.distribution.as_deref(), Some("requests"));
        assert!(kind("no_such_module_anywhere").is_none());
        Ok(())
    }

    #[test]
    fn elision_follows_policy_order() -> Result<()> {
        let temp = tempfile::tempdir()?;
        fs::create_dir_all(temp.path().join("mylib"))?;
        fs::write(temp.path().join("mylib/__init__.py"), "")?;

        let table = DownloadTable::new(&["numpy"]).with_csv("name,last_month\nPyYAML,5000000\nniche,10\n")?;
        let filter = filter_with(table)
            .with_ignore_modules(["mylib"])
            .with_no_ignore_modules(["os"]);
        let context = context(temp.path());
        let elided = |source: &str| filter.should_elide(&declaration(source), &context);

        assert!(!elided("from . import x\n"));
        assert!(elided("import mylib\n"));
        assert!(!elided("import os.path\n"));
        assert!(elided("import unknown_thing\n"));
        assert!(elided("import json\n"));
        assert!(elided("import numpy as np\n"));
        assert!(elided("from yaml import safe_load\n"));
        assert!(!elided("import niche\n"));
        Ok(())
    }

    #[test]
    fn local_packages_are_kept() -> Result<()> {
        let temp = tempfile::tempdir()?;
        fs::write(temp.path().join("helpers.py"), "")?;
        let filter = filter_with(DownloadTable::default());
        let context = context(temp.path());
        assert!(!filter.should_elide(&declaration("from helpers import thing\n"), &context));
        Ok(())
    }

    #[test]
    fn disabled_filter_keeps_everything() {
        let filter = DependencyFilter::disabled();
        let context = ExecutionContext::default();
        assert!(!filter.should_elide(&declaration("import os\n"), &context));
    }

    #[test]
    fn rejects_tables_without_required_columns() {
        assert!(DownloadTable::default().with_csv("package,count\nx,1\n").is_err());
        assert!(DownloadTable::default().with_csv("name,last_month\nx,many\n").is_err());
    }
}
