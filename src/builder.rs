//! Tree construction for a single commit
//!
//! [`TreeBuilder`] materializes the [`Node`]/[`Item`] tree of one commit by
//! reading tree objects from a [`HistorySource`]. When it is handed the
//! matching node of an earlier snapshot it reuses everything whose content
//! hash did not change:
//!
//! - a subtree with an unchanged hash is returned as-is, without reading it
//! - an unchanged file keeps its earlier [`Item`] allocation
//! - subdirectories are matched to their predecessor by name and the same
//!   rules apply recursively
//!
//! ## Examples
//!
//! ```rust
//! use weaver::builder::{SubtreeFilter, TreeBuilder};
//! use weaver::source::{HistorySource, MemoryHistoryBuilder};
//! use weaver::Owner;
//! use std::sync::Arc;
//!
//! # fn main() -> weaver::Result<()> {
//! let history = MemoryHistoryBuilder::new()
//!     .commit(Owner::new("a@example.com", "A"), 0, &[("lib/a.rs", "h1"), ("b.rs", "h2")])
//!     .commit(Owner::new("a@example.com", "A"), 5, &[("lib/a.rs", "h1"), ("b.rs", "h3")])
//!     .build();
//! let commits = history.commits()?;
//! let filter = SubtreeFilter::default();
//! let builder = TreeBuilder::new(&history, &filter);
//!
//! let first = builder.build_root(&commits[0], None)?;
//! let second = builder.build_root(&commits[1], Some(&first))?;
//!
//! // `lib` did not change and is shared outright
//! assert!(Arc::ptr_eq(first.find_child("lib").unwrap(), second.find_child("lib").unwrap()));
//! # Ok(())
//! # }
//! ```

use crate::collections::HashMap;
use crate::error::{Result, WeaverError};
use crate::source::{CommitInfo, EntryKind, HistorySource, TreeHandle};
use crate::types::{Item, Node, Owner};
use crate::utils::short_hash;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::sync::Arc;
use tracing::trace;

/// Compiled set of subtree paths that are never traversed
///
/// Patterns are globs over repository-relative directory paths (`*` does not
/// cross `/`). A plain path such as `target` excludes that directory and,
/// because it is never entered, everything below it.
#[derive(Debug, Clone)]
pub struct SubtreeFilter {
    patterns: Vec<String>,
    set: GlobSet,
}

impl Default for SubtreeFilter {
    fn default() -> Self {
        Self {
            patterns: Vec::new(),
            set: GlobSet::empty(),
        }
    }
}

impl SubtreeFilter {
    /// Compile a filter from glob patterns
    pub fn new(patterns: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = GlobBuilder::new(pattern.trim_end_matches('/'))
                .literal_separator(true)
                .build()
                .map_err(|e| WeaverError::InvalidPattern(format!("{}: {}", pattern, e)))?;
            builder.add(glob);
        }
        let set = builder
            .build()
            .map_err(|e| WeaverError::InvalidPattern(e.to_string()))?;

        Ok(Self {
            patterns: patterns.to_vec(),
            set,
        })
    }

    /// Patterns this filter was compiled from
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Whether the subtree at `path` is excluded
    pub fn is_excluded(&self, path: &str) -> bool {
        !self.patterns.is_empty() && self.set.is_match(path)
    }
}

/// Builds node trees from history tree objects
///
/// A builder is cheap and holds only borrows; each invocation runs on the
/// calling thread.
pub struct TreeBuilder<'a> {
    source: &'a dyn HistorySource,
    filter: &'a SubtreeFilter,
}

impl<'a> TreeBuilder<'a> {
    /// Create a builder reading from `source`
    pub fn new(source: &'a dyn HistorySource, filter: &'a SubtreeFilter) -> Self {
        Self { source, filter }
    }

    /// Build the root node of a commit
    pub fn build_root(&self, commit: &CommitInfo, previous: Option<&Arc<Node>>) -> Result<Arc<Node>> {
        let owner = Arc::new(commit.author.clone());
        self.build(&commit.tree, "", &owner, 0, previous)
    }

    /// Build the node for `tree`
    ///
    /// If `previous` has the same content hash it is returned unchanged.
    /// Otherwise files are reused from `previous` when both their content hash
    /// and name match, and subdirectories recurse against the same-named child
    /// of `previous`.
    pub fn build(
        &self,
        tree: &TreeHandle,
        name: &str,
        owner: &Arc<Owner>,
        generation: u32,
        previous: Option<&Arc<Node>>,
    ) -> Result<Arc<Node>> {
        if let Some(previous) = previous {
            if previous.content_hash == tree.hash {
                trace!("Reusing unchanged node '{}' ({})", name, short_hash(&tree.hash));
                return Ok(Arc::clone(previous));
            }
        }

        let entries = self.source.read_tree(tree)?;

        let reusable_items: HashMap<(&str, &str), &Arc<Item>> = previous
            .map(|node| {
                node.items
                    .iter()
                    .map(|item| ((item.content_hash.as_str(), item.name.as_str()), item))
                    .collect()
            })
            .unwrap_or_default();
        let previous_children: HashMap<&str, &Arc<Node>> = previous
            .map(|node| node.children.iter().map(|child| (child.name.as_str(), child)).collect())
            .unwrap_or_default();

        let mut items = Vec::new();
        let mut children = Vec::new();

        for entry in &entries {
            match entry.kind {
                EntryKind::Blob => {
                    let item = match reusable_items.get(&(entry.hash.as_str(), entry.path.as_str())) {
                        Some(existing) => Arc::clone(existing),
                        None => Arc::new(Item::new(entry.hash.clone(), entry.path.clone())),
                    };
                    items.push(item);
                }
                EntryKind::Tree => {
                    if self.filter.is_excluded(&entry.path) {
                        trace!("Skipping excluded subtree '{}'", entry.path);
                        continue;
                    }
                    let previous_child = previous_children.get(entry.path.as_str()).copied();
                    let child = self.build(&entry.handle(), &entry.path, owner, generation + 1, previous_child)?;
                    children.push(child);
                }
            }
        }

        Ok(Node::new(
            name,
            tree.hash.clone(),
            Arc::clone(owner),
            items,
            children,
            generation,
        ))
    }
}
