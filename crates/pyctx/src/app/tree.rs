//! Pruned project trees and their text rendering.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use tracing::warn;

use crate::app::modules::normalize_path;
use crate::domain::errors::TreeError;
use crate::domain::model::TreeNode;
use crate::infra::ignore::IgnoreRuleSet;

/// Label → path map of nodes to annotate. Relative paths are taken relative to the tree root.
pub type FocusItems = BTreeMap<String, PathBuf>;

/// Walk `root` and build a tree of the entries the rules keep.
///
/// Directories left without children are dropped. Entries are ordered by name, files and
/// directories interleaved. Every focus item must lie inside `root`.
pub fn build_tree(
    root: &Path,
    rules: &IgnoreRuleSet,
    focus: &FocusItems,
) -> Result<TreeNode, TreeError> {
    build_tree_to_depth(root, rules, focus, None)
}

/// Like [`build_tree`], descending at most `max_depth` levels below `root`.
pub fn build_tree_to_depth(
    root: &Path,
    rules: &IgnoreRuleSet,
    focus: &FocusItems,
    max_depth: Option<usize>,
) -> Result<TreeNode, TreeError> {
    let root = normalize_path(root);
    let metadata = fs::metadata(&root).map_err(|source| TreeError::Io {
        path: root.clone(),
        source,
    })?;
    let labels = focus_labels(&root, focus)?;
    let root_name = display_name(&root);

    if !metadata.is_dir() {
        let mut node = TreeNode::file(root_name);
        node.focus_label = labels.get(&root).map(join_labels);
        return Ok(node);
    }

    let mut builder = WalkBuilder::new(&root);
    builder
        .standard_filters(false)
        .follow_links(false)
        .max_depth(max_depth)
        .sort_by_file_name(|a, b| a.cmp(b));
    builder.filter_entry({
        let root = root.clone();
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

    let mut top = DirBuilder::default();
    for result in builder.build() {
        let entry = match result {
            Ok(entry) => entry,
            Err(err) => {
                warn!(error = %err, root = %root.display(), "tree walk error");
                continue;
            }
        };
        if entry.depth() == 0 {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(&root) else {
            continue;
        };
        let is_dir = entry.file_type().is_some_and(|kind| kind.is_dir());
        top.insert(rel, is_dir);
    }

    let mut node = TreeNode::directory(root_name, top.finish(&root, &labels));
    node.focus_label = labels.get(&root).map(join_labels);
    Ok(node)
}

/// Render a tree as indented text with box-drawing connectors. The result has no trailing
/// newline.
pub fn render_tree(node: &TreeNode) -> String {
    let mut lines = vec![node_label(node)];
    render_children(&node.children, "", &mut lines);
    lines.join("\n")
}

fn render_children(children: &[TreeNode], prefix: &str, lines: &mut Vec<String>) {
    for (index, child) in children.iter().enumerate() {
        let last = index + 1 == children.len();
        let (branch, indent) = if last {
            ("└── ", "    ")
        } else {
            ("├── ", "│   ")
        };
        lines.push(format!("{prefix}{branch}{}", node_label(child)));
        render_children(&child.children, &format!("{prefix}{indent}"), lines);
    }
}

fn node_label(node: &TreeNode) -> String {
    match &node.focus_label {
        Some(label) => format!("{} <-- ({label})", node.name),
        None => node.name.clone(),
    }
}

fn focus_labels(
    root: &Path,
    focus: &FocusItems,
) -> Result<BTreeMap<PathBuf, BTreeSet<String>>, TreeError> {
    let mut labels: BTreeMap<PathBuf, BTreeSet<String>> = BTreeMap::new();
    for (label, path) in focus {
        let absolute = if path.is_absolute() {
            normalize_path(path)
        } else {
            normalize_path(&root.join(path))
        };
        if !absolute.starts_with(root) {
            return Err(TreeError::FocusItemOutOfTree {
                label: label.clone(),
                path: path.clone(),
                root: root.to_path_buf(),
            });
        }
        labels.entry(absolute).or_default().insert(label.clone());
    }
    Ok(labels)
}

fn join_labels(labels: &BTreeSet<String>) -> String {
    labels.iter().cloned().collect::<Vec<_>>().join(", ")
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[derive(Debug, Default)]
struct DirBuilder {
    entries: BTreeMap<String, Option<DirBuilder>>,
}

impl DirBuilder {
    fn insert(&mut self, rel: &Path, is_dir: bool) {
        let mut components = rel.components().peekable();
        let mut current = self;
        while let Some(component) = components.next() {
            let name = component.as_os_str().to_string_lossy().into_owned();
            let is_last = components.peek().is_none();
            let slot = current
                .entries
                .entry(name)
                .or_insert_with(|| (!is_last || is_dir).then(DirBuilder::default));
            match slot {
                Some(dir) => current = dir,
                None => return,
            }
        }
    }

    fn finish(
        self,
        path: &Path,
        labels: &BTreeMap<PathBuf, BTreeSet<String>>,
    ) -> Vec<TreeNode> {
        let mut children = Vec::with_capacity(self.entries.len());
        for (name, entry) in self.entries {
            let child_path = path.join(&name);
            let mut node = match entry {
                None => TreeNode::file(name),
                Some(dir) => {
                    let grandchildren = dir.finish(&child_path, labels);
                    if grandchildren.is_empty() {
                        continue;
                    }
                    TreeNode::directory(name, grandchildren)
                }
            };
            node.focus_label = labels.get(&child_path).map(join_labels);
            children.push(node);
        }
        children
    }
}
