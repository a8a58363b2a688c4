use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use pyctx::app::bundle::{BundleOptions, ContextBundler};
use pyctx::app::imports::extract_imports;
use pyctx::app::locate::StaticLocator;
use pyctx::app::modules::PackageLayout;
use pyctx::domain::errors::{BundleError, ResolutionError};
use pyctx::domain::model::ImportDeclaration;
use pyctx::infra::ignore::IgnoreRuleSet;

fn write(root: &Path, relative: &str, contents: &str) -> Result<PathBuf> {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, contents)?;
    Ok(path)
}

fn bundler(options: BundleOptions) -> Result<ContextBundler> {
    Ok(ContextBundler::new(Box::new(StaticLocator::default()), options)?)
}

#[test]
fn plain_import_is_extracted() -> Result<()> {
    let declarations = extract_imports("import os\n")?;
    assert_eq!(declarations.len(), 1);
    let ImportDeclaration::Plain(plain) = &declarations[0] else {
        panic!("expected a plain import, got {:?}", declarations[0]);
    };
    assert_eq!(plain.module_path, "os");
    assert_eq!(plain.alias, None);
    assert_eq!(plain.line, 1);
    Ok(())
}

#[test]
fn relative_import_resolves_to_sibling_package() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let root = temp.path();
    write(root, "pkg/__init__.py", "")?;
    write(root, "pkg/sub/__init__.py", "")?;
    let unit = write(root, "pkg/sub/unit.py", "from ..other import thing\n")?;

    let layout = PackageLayout::default();
    let location = layout.locate(&unit)?;
    assert_eq!(location.identity.to_string(), "pkg.sub.unit");

    let declarations = extract_imports(&fs::read_to_string(&unit)?)?;
    let resolved = layout.resolve(&location, &declarations[0])?;
    assert_eq!(resolved.target().to_string(), "pkg.other.thing");
    Ok(())
}

#[test]
fn relative_depth_climbs_packages() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let root = temp.path();
    write(root, "a/__init__.py", "")?;
    write(root, "a/b/__init__.py", "")?;
    let unit = write(
        root,
        "a/b/c.py",
        "from .d import x\nfrom ..d import x\nfrom ...d import x\n",
    )?;

    let layout = PackageLayout::default();
    let location = layout.locate(&unit)?;
    let declarations = extract_imports(&fs::read_to_string(&unit)?)?;

    assert_eq!(layout.resolve(&location, &declarations[0])?.module.to_string(), "a.b.d");
    assert_eq!(layout.resolve(&location, &declarations[1])?.module.to_string(), "a.d");
    assert!(matches!(
        layout.resolve(&location, &declarations[2]),
        Err(ResolutionError::BeyondTopLevel { depth: 3, .. })
    ));
    Ok(())
}

#[test]
fn builtin_ignore_patterns() -> Result<()> {
    let rules = IgnoreRuleSet::new(&[] as &[&str])?;
    assert!(rules.matches("__pycache__/x.bin"));
    assert!(!rules.matches("main.src"));
    Ok(())
}

#[test]
fn failed_module_load_is_recorded_and_bundling_completes() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let root = temp.path();
    write(root, "broken.py", "value = (1,\n")?;
    write(root, "fine.py", "def helper():\n    return 2\n")?;
    let main = write(root, "main.py", "from broken import value\nfrom fine import helper\n")?;

    let bundle = bundler(BundleOptions::default())?.bundle(&main)?;
    assert_eq!(bundle.diagnostics.len(), 1);
    assert_eq!(bundle.diagnostics[0].statement, "from broken import value");
    assert_eq!(bundle.sections.len(), 2);
    assert!(!bundle.sections[0].location.has_source());
    assert!(bundle.sections[1].location.has_source());
    assert!(bundle.text.contains("#### Import: `from broken import value`"));
    assert!(bundle.text.contains("def helper():"));

    let strict = bundler(BundleOptions {
        skip_when_error: false,
        ..BundleOptions::default()
    })?;
    assert!(matches!(
        strict.bundle(&main),
        Err(BundleError::Locate { .. })
    ));
    Ok(())
}

#[test]
fn bundles_are_byte_identical_across_runs() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let root = temp.path();
    write(root, "app/__init__.py", "from .core import run\n")?;
    write(root, "app/core.py", "import json\n\ndef run():\n    return json.dumps({})\n")?;
    write(root, "app/util/__init__.py", "")?;
    let entry = write(
        root,
        "app/util/entry.py",
        "from .. import run\nfrom ..core import *\nimport app.core\n",
    )?;

    let options = BundleOptions {
        show_project_tree: true,
        code_name: Some("entry".into()),
        ..BundleOptions::default()
    };
    let first = bundler(options.clone())?.bundle(&entry)?;
    let second = bundler(options)?.bundle(&entry)?;
    assert_eq!(first.text, second.text);
    assert!(first.diagnostics.is_empty());
    assert!(first.text.starts_with("## Entry Source Code Analysis"));
    assert!(first.text.contains("entry.py <-- (My Location)"));
    Ok(())
}
