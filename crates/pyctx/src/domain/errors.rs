//! Domain-specific errors.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Malformed compilation unit. Always aborts the bundle.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid syntax at line {line}, column {column}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            column,
            message: message.into(),
        }
    }
}

/// Failure to turn a declaration into an absolute module identity.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("relative import of depth {depth} from '{module}' reaches beyond the top-level package")]
    BeyondTopLevel { module: String, depth: usize },
    #[error("relative import in '{module}' which is not inside a package")]
    NoParentPackage { module: String },
    #[error("no module named '{module}'")]
    UnknownModule { module: String },
    #[error("cannot derive a module identity for {path}")]
    EmptyIdentity { path: PathBuf },
}

/// Failure while locating one symbol. Recoverable per declaration.
#[derive(Debug, Error)]
pub enum LocateError {
    #[error("failed to load '{module}': {message}")]
    Load { module: String, message: String },
    #[error("failed to parse module '{module}'")]
    Parse {
        module: String,
        #[source]
        source: ParseError,
    },
    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("interpreter '{program}' failed: {message}")]
    Interpreter { program: String, message: String },
}

/// Invalid ignore pattern.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IgnoreError {
    #[error("negated ignore patterns are not supported: '{0}'")]
    NegationUnsupported(String),
    #[error("invalid ignore pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

/// Failure while building a project tree.
#[derive(Debug, Error)]
pub enum TreeError {
    #[error("focus item '{label}' ({path}) is not within {root}")]
    FocusItemOutOfTree {
        label: String,
        path: PathBuf,
        root: PathBuf,
    },
    #[error("failed to walk {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Aggregate error of a bundling call.
#[derive(Debug, Error)]
pub enum BundleError {
    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: ParseError,
    },
    #[error("failed to resolve `{statement}`")]
    Resolution {
        statement: String,
        #[source]
        source: ResolutionError,
    },
    #[error("failed to locate `{statement}`")]
    Locate {
        statement: String,
        #[source]
        source: LocateError,
    },
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error(transparent)]
    Ignore(#[from] IgnoreError),
    #[error("failed to render bundle: {0}")]
    Render(String),
}

impl BundleError {
    /// Whether the failure concerns a single declaration and may be recorded as a diagnostic.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            BundleError::Resolution { .. } | BundleError::Locate { .. }
        )
    }
}
