//! Module identity resolution from the on-disk package layout.

use std::path::{Component, Path, PathBuf};

use serde::Serialize;

use crate::domain::errors::ResolutionError;
use crate::domain::model::{ImportDeclaration, ModuleIdentity};

pub const DEFAULT_MARKER: &str = "__init__.py";
pub const DEFAULT_EXTENSION: &str = "py";

/// Package conventions: the boundary marker file and the source extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageLayout {
    marker: String,
    extension: String,
}

impl Default for PackageLayout {
    fn default() -> Self {
        Self::new(DEFAULT_MARKER, DEFAULT_EXTENSION)
    }
}

/// A source file's own module identity and the root it was resolved against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleLocation {
    pub source_file: PathBuf,
    pub root: PathBuf,
    pub identity: ModuleIdentity,
    /// The source file is a package marker, so it stands for its directory.
    pub is_package: bool,
}

impl ModuleLocation {
    /// Source file path relative to the resolution root.
    pub fn relative_file(&self) -> &Path {
        self.source_file
            .strip_prefix(&self.root)
            .unwrap_or(&self.source_file)
    }

    /// Segments of the package that relative imports in this module are anchored at.
    pub fn package_segments(&self) -> &[String] {
        let segments = self.identity.segments();
        if self.is_package {
            segments
        } else {
            &segments[..segments.len().saturating_sub(1)]
        }
    }

    /// Directory of the top-level package containing this module, or the resolution root for
    /// modules outside any package.
    pub fn top_level_dir(&self) -> PathBuf {
        match self.identity.first() {
            Some(first) if self.identity.len() > 1 || self.is_package => self.root.join(first),
            _ => self.root.clone(),
        }
    }

    /// How deep a project tree under [`Self::top_level_dir`] may go. A module outside any
    /// package only lists its own directory.
    pub fn tree_depth(&self) -> Option<usize> {
        let standalone = self.identity.len() <= 1 && !self.is_package;
        standalone.then_some(1)
    }
}

/// Absolute target of a declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedImport {
    pub module: ModuleIdentity,
    /// Imported member, `None` for plain imports and `Some("*")` for wildcards.
    pub symbol: Option<String>,
}

impl ResolvedImport {
    /// Dotted identity of the imported object itself.
    pub fn target(&self) -> ModuleIdentity {
        match self.symbol.as_deref() {
            Some(symbol) if symbol != "*" => self.module.join(symbol),
            _ => self.module.clone(),
        }
    }
}

/// A module found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleFile {
    /// A plain module file such as `a/b.py`.
    Source(PathBuf),
    /// A package, pointing at its marker file.
    Package(PathBuf),
    /// A directory without a marker.
    Namespace(PathBuf),
}

impl ModuleFile {
    pub fn path(&self) -> &Path {
        match self {
            ModuleFile::Source(path) | ModuleFile::Package(path) | ModuleFile::Namespace(path) => {
                path
            }
        }
    }

    /// File holding the module's code, if there is one.
    pub fn source(&self) -> Option<&Path> {
        match self {
            ModuleFile::Source(path) | ModuleFile::Package(path) => Some(path),
            ModuleFile::Namespace(_) => None,
        }
    }
}

impl PackageLayout {
    pub fn new(marker: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
            extension: extension.into().trim_start_matches('.').to_owned(),
        }
    }

    /// Compute the module identity of a source file.
    ///
    /// The walk climbs from the file's directory while the marker is present; the first ancestor
    /// without it is the resolution root. A gap in the marker chain therefore truncates the
    /// identity at the gap.
    pub fn locate(&self, source_file: &Path) -> Result<ModuleLocation, ResolutionError> {
        let source_file = normalize_path(source_file);
        let empty = || ResolutionError::EmptyIdentity {
            path: source_file.clone(),
        };

        let mut root = source_file.parent().ok_or_else(empty)?.to_path_buf();
        while root.join(&self.marker).is_file() {
            match root.parent() {
                Some(parent) => root = parent.to_path_buf(),
                None => break,
            }
        }

        let relative = source_file.strip_prefix(&root).map_err(|_| empty())?;
        let mut segments: Vec<String> = relative
            .components()
            .filter_map(|component| match component {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();

        let is_package = source_file
            .file_name()
            .is_some_and(|name| name == self.marker.as_str());
        if is_package {
            segments.pop();
        } else if let Some(last) = segments.last_mut() {
            let suffix = format!(".{}", self.extension);
            if let Some(stem) = last.strip_suffix(&suffix) {
                *last = stem.to_owned();
            } else if let Some(stem) = Path::new(last.as_str()).file_stem() {
                *last = stem.to_string_lossy().into_owned();
            }
        }

        if segments.is_empty() {
            return Err(empty());
        }

        Ok(ModuleLocation {
            identity: ModuleIdentity::new(segments),
            root,
            source_file,
            is_package,
        })
    }

    /// Turn a relative `from` declaration into an absolute module identity.
    ///
    /// Depth 1 names the package containing the current module; each further level climbs one
    /// package up. `module_path` may be empty, in which case the package itself is the target.
    pub fn resolve_relative(
        &self,
        current: &ModuleLocation,
        depth: usize,
        module_path: &str,
    ) -> Result<ModuleIdentity, ResolutionError> {
        if depth == 0 {
            return Ok(ModuleIdentity::parse(module_path));
        }

        let package = current.package_segments();
        if package.is_empty() {
            return Err(ResolutionError::NoParentPackage {
                module: current.identity.to_string(),
            });
        }

        let climb = depth - 1;
        if climb >= package.len() {
            return Err(ResolutionError::BeyondTopLevel {
                module: current.identity.to_string(),
                depth,
            });
        }

        let base = package[..package.len() - climb].to_vec();
        Ok(ModuleIdentity::new(base).join(module_path))
    }

    /// Resolve any declaration to its absolute module and member.
    pub fn resolve(
        &self,
        current: &ModuleLocation,
        declaration: &ImportDeclaration,
    ) -> Result<ResolvedImport, ResolutionError> {
        match declaration {
            ImportDeclaration::Plain(plain) => Ok(ResolvedImport {
                module: ModuleIdentity::parse(&plain.module_path),
                symbol: None,
            }),
            ImportDeclaration::From(from) => {
                let module = if from.is_relative() {
                    self.resolve_relative(current, from.relative_depth, &from.module_path)?
                } else {
                    ModuleIdentity::parse(&from.module_path)
                };
                Ok(ResolvedImport {
                    module,
                    symbol: Some(from.symbol_name.clone()),
                })
            }
        }
    }

    /// Find a module under the given search roots.
    ///
    /// Regular packages and module files win over namespace directories, in root order.
    pub fn find_module(&self, roots: &[PathBuf], identity: &ModuleIdentity) -> Option<ModuleFile> {
        let (last, parents) = identity.segments().split_last()?;

        let candidates: Vec<PathBuf> = roots
            .iter()
            .map(|root| parents.iter().fold(root.clone(), |dir, segment| dir.join(segment)))
            .collect();

        for dir in &candidates {
            let package = dir.join(last);
            let marker = package.join(&self.marker);
            if marker.is_file() {
                return Some(ModuleFile::Package(marker));
            }
            let file = dir.join(format!("{last}.{}", self.extension));
            if file.is_file() {
                return Some(ModuleFile::Source(file));
            }
        }

        candidates
            .iter()
            .map(|dir| dir.join(last))
            .find(|package| package.is_dir())
            .map(ModuleFile::Namespace)
    }
}

/// Make a path absolute and remove `.` and `..` components lexically.
pub fn normalize_path(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;

    use anyhow::Result;

    fn touch(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, "")?;
        Ok(())
    }

    fn location(identity: &str, is_package: bool) -> ModuleLocation {
        ModuleLocation {
            source_file: PathBuf::from("/src/x.py"),
            root: PathBuf::from("/src"),
            identity: ModuleIdentity::parse(identity),
            is_package,
        }
    }

    #[test]
    fn locates_file_inside_packages() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let root = temp.path();
        touch(&root.join("pkg/__init__.py"))?;
        touch(&root.join("pkg/sub/__init__.py"))?;
        touch(&root.join("pkg/sub/unit.py"))?;

        let layout = PackageLayout::default();
        let location = layout.locate(&root.join("pkg/sub/unit.py"))?;
        assert_eq!(location.identity.to_string(), "pkg.sub.unit");
        assert_eq!(location.root, normalize_path(root));
        assert_eq!(location.relative_file(), Path::new("pkg/sub/unit.py"));
        assert!(!location.is_package);
        assert_eq!(location.top_level_dir(), normalize_path(&root.join("pkg")));
        assert_eq!(location.tree_depth(), None);
        Ok(())
    }

    #[test]
    fn marker_resolves_to_its_directory() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let root = temp.path();
        touch(&root.join("pkg/__init__.py"))?;
        touch(&root.join("pkg/sub/__init__.py"))?;

        let location = PackageLayout::default().locate(&root.join("pkg/sub/__init__.py"))?;
        assert_eq!(location.identity.to_string(), "pkg.sub");
        assert!(location.is_package);
        Ok(())
    }

    #[test]
    fn missing_marker_truncates_identity() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let root = temp.path();
        touch(&root.join("a/__init__.py"))?;
        touch(&root.join("a/b/c/__init__.py"))?;
        touch(&root.join("a/b/c/x.py"))?;

        let location = PackageLayout::default().locate(&root.join("a/b/c/x.py"))?;
        assert_eq!(location.identity.to_string(), "c.x");
        assert_eq!(location.root, normalize_path(&root.join("a/b")));
        Ok(())
    }

    #[test]
    fn top_level_module_has_no_package() -> Result<()> {
        let temp = tempfile::tempdir()?;
        touch(&temp.path().join("script.py"))?;
        let layout = PackageLayout::default();
        let location = layout.locate(&temp.path().join("script.py"))?;
        assert_eq!(location.identity.to_string(), "script");
        assert_eq!(location.top_level_dir(), normalize_path(temp.path()));
        assert_eq!(location.tree_depth(), Some(1));

        let err = layout.resolve_relative(&location, 1, "x").unwrap_err();
        assert!(matches!(err, ResolutionError::NoParentPackage { .. }));
        Ok(())
    }

    #[test]
    fn relative_resolution_climbs_packages() {
        let layout = PackageLayout::default();
        let current = location("a.b.c", false);
        assert_eq!(layout.resolve_relative(&current, 1, "d").unwrap().to_string(), "a.b.d");
        assert_eq!(layout.resolve_relative(&current, 2, "d").unwrap().to_string(), "a.d");
        assert_eq!(layout.resolve_relative(&current, 2, "").unwrap().to_string(), "a");
        let err = layout.resolve_relative(&current, 3, "d").unwrap_err();
        assert!(matches!(err, ResolutionError::BeyondTopLevel { depth: 3, .. }));
    }

    #[test]
    fn relative_resolution_from_package_marker_starts_at_package() {
        let layout = PackageLayout::default();
        let current = location("pkg.sub", true);
        assert_eq!(layout.resolve_relative(&current, 1, "x").unwrap().to_string(), "pkg.sub.x");
        assert_eq!(layout.resolve_relative(&current, 2, "x").unwrap().to_string(), "pkg.x");
    }

    #[test]
    fn resolves_declarations_to_targets() {
        let layout = PackageLayout::default();
        let current = location("pkg.sub.unit", false);
        let declarations = crate::app::imports::extract_imports(
            "from ..other import thing\nimport os.path\nfrom . import *\n",
        )
        .unwrap();

        let targets: Vec<String> = declarations
            .iter()
            .map(|decl| layout.resolve(&current, decl).unwrap().target().to_string())
            .collect();
        assert_eq!(targets, vec!["pkg.other.thing", "os.path", "pkg.sub"]);
    }

    #[test]
    fn finds_modules_packages_and_namespaces() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let root = temp.path().to_path_buf();
        touch(&root.join("pkg/__init__.py"))?;
        touch(&root.join("pkg/mod.py"))?;
        fs::create_dir_all(root.join("pkg/ns"))?;

        let layout = PackageLayout::default();
        let roots = vec![root.clone()];
        assert_eq!(
            layout.find_module(&roots, &ModuleIdentity::parse("pkg")),
            Some(ModuleFile::Package(root.join("pkg/__init__.py")))
        );
        assert_eq!(
            layout.find_module(&roots, &ModuleIdentity::parse("pkg.mod")),
            Some(ModuleFile::Source(root.join("pkg/mod.py")))
        );
        assert_eq!(
            layout.find_module(&roots, &ModuleIdentity::parse("pkg.ns")),
            Some(ModuleFile::Namespace(root.join("pkg/ns")))
        );
        assert_eq!(layout.find_module(&roots, &ModuleIdentity::parse("pkg.missing")), None);
        Ok(())
    }

    #[test]
    fn normalizes_parent_components() {
        let normalized = normalize_path(Path::new("/a/b/../c/./d.py"));
        assert_eq!(normalized, PathBuf::from("/a/c/d.py"));
    }
}
