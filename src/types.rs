//! Core data types used throughout the Weaver library
//!
//! This module contains the entity model that every other component shares.
//!
//! ## Overview
//!
//! - **Owners**: [`Owner`] - the author responsible for a commit
//! - **Items**: [`Item`] - a single file at one point in history
//! - **Nodes**: [`Node`] - a directory with its items and child nodes
//! - **Snapshots**: [`Snapshot`] - the root node of one commit, tagged with a
//!   normalized time in `[0, 1]`
//! - **Progress**: [`ProgressInfo`], [`ProgressCallback`] - assembly progress reporting
//!
//! All entities are immutable once built and handed out as `Arc`s, so two
//! snapshots that did not change a subtree point at the very same allocation.
//! The only late writes are the one-time parent back-reference of a node and
//! the one-time materialization of a deferred snapshot root.
//!
//! ## Examples
//!
//! ```rust
//! use weaver::types::{Item, Node, Owner};
//! use std::sync::Arc;
//!
//! let owner = Arc::new(Owner::new("ada@example.com", "Ada"));
//! let readme = Arc::new(Item::new("e69de29", "README.md"));
//! let root = Node::new("", "4b825dc", owner, vec![readme], vec![], 0);
//!
//! assert!(root.is_root());
//! assert_eq!(root.find_item("README.md").map(|i| i.content_hash.as_str()), Some("e69de29"));
//! ```

use crate::error::Result;
use parking_lot::Mutex;
use std::sync::{Arc, OnceLock, Weak};

/// The author responsible for a commit
///
/// Identity is `id` (usually the author email). Owners are created once per
/// commit and are not deduplicated, so two commits by the same person carry
/// equal but distinct owners.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Owner {
    /// Stable identifier, e.g. the author email
    pub id: String,
    /// Human readable name
    pub display_name: String,
}

impl Owner {
    /// Create a new owner
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

/// A single file at one point in history
///
/// Diffing keys items by `name`; an item with the same name but a different
/// `content_hash` is reported as changed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Item {
    /// Content hash of the blob
    pub content_hash: String,
    /// Repository-relative path of the file
    pub name: String,
}

impl Item {
    /// Create a new item
    pub fn new(content_hash: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            content_hash: content_hash.into(),
            name: name.into(),
        }
    }
}

/// A directory in one snapshot
///
/// Children own nothing upward: the parent relation is a non-owning `Weak`
/// that is assigned once, right after the parent is constructed. A node that is
/// structurally shared between snapshots keeps the parent of the build that
/// first created it; that parent has the same name in every snapshot sharing it.
#[derive(Debug)]
pub struct Node {
    /// Repository-relative path of the directory, empty at the root
    pub name: String,
    /// Content hash of the corresponding tree object
    pub content_hash: String,
    /// Author of the commit that produced this node
    pub owner: Arc<Owner>,
    /// Files directly inside this directory
    pub items: Vec<Arc<Item>>,
    /// Subdirectories, unique by name
    pub children: Vec<Arc<Node>>,
    /// Depth from the root (root is 0)
    pub generation: u32,
    parent: OnceLock<Weak<Node>>,
}

impl Node {
    /// Construct a node and point each child's parent reference at it
    ///
    /// Children that already have a parent (because they are shared with an
    /// earlier snapshot) keep it.
    pub fn new(
        name: impl Into<String>,
        content_hash: impl Into<String>,
        owner: Arc<Owner>,
        items: Vec<Arc<Item>>,
        children: Vec<Arc<Node>>,
        generation: u32,
    ) -> Arc<Self> {
        let node = Arc::new(Self {
            name: name.into(),
            content_hash: content_hash.into(),
            owner,
            items,
            children,
            generation,
            parent: OnceLock::new(),
        });

        for child in &node.children {
            // Set fails for shared children; their first parent stays.
            let _ = child.parent.set(Arc::downgrade(&node));
        }

        node
    }

    /// Parent node, if this node has one that is still alive
    pub fn parent(&self) -> Option<Arc<Node>> {
        self.parent.get().and_then(Weak::upgrade)
    }

    /// Whether this is a snapshot root
    pub fn is_root(&self) -> bool {
        self.generation == 0 && self.name.is_empty()
    }

    /// Find a direct child by name
    pub fn find_child(&self, name: &str) -> Option<&Arc<Node>> {
        self.children.iter().find(|child| child.name == name)
    }

    /// Find a direct item by name
    pub fn find_item(&self, name: &str) -> Option<&Arc<Item>> {
        self.items.iter().find(|item| item.name == name)
    }

    /// Number of items in this node and all of its descendants
    pub fn item_count(&self) -> usize {
        self.items.len() + self.children.iter().map(|c| c.item_count()).sum::<usize>()
    }

    /// Number of nodes below this one
    pub fn descendant_count(&self) -> usize {
        self.children.iter().map(|c| 1 + c.descendant_count()).sum()
    }

    /// Visit this node and every descendant, parents before children
    pub fn walk<'a>(self: &'a Arc<Self>, visit: &mut impl FnMut(&'a Arc<Node>)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }
}

/// Deferred construction of a snapshot root
pub(crate) trait Materialize: Send + Sync {
    fn materialize(&self) -> Result<Arc<Node>>;
}

enum AncestorState {
    Pending(Box<dyn Materialize>),
    Built(Arc<Node>),
}

/// The directory tree of one commit, tagged with its normalized time
///
/// The root may be built eagerly or deferred until the first call to
/// [`Snapshot::ancestor`]. Deferred roots are built under a lock, so the
/// build runs at most once even when several threads force it together.
pub struct Snapshot {
    time: f64,
    commit_id: String,
    ancestor: Mutex<AncestorState>,
}

impl Snapshot {
    /// Create a snapshot with an already built root
    pub fn new(time: f64, commit_id: impl Into<String>, ancestor: Arc<Node>) -> Self {
        Self {
            time,
            commit_id: commit_id.into(),
            ancestor: Mutex::new(AncestorState::Built(ancestor)),
        }
    }

    pub(crate) fn deferred(time: f64, commit_id: impl Into<String>, pending: Box<dyn Materialize>) -> Self {
        Self {
            time,
            commit_id: commit_id.into(),
            ancestor: Mutex::new(AncestorState::Pending(pending)),
        }
    }

    /// Normalized time in `[0, 1]`
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Id of the commit this snapshot was built from
    pub fn commit_id(&self) -> &str {
        &self.commit_id
    }

    /// Root node, building it first if it was deferred
    ///
    /// A failed build leaves the snapshot pending so a later call can retry.
    pub fn ancestor(&self) -> Result<Arc<Node>> {
        let mut state = self.ancestor.lock();
        match &*state {
            AncestorState::Built(node) => Ok(Arc::clone(node)),
            AncestorState::Pending(pending) => {
                let node = pending.materialize()?;
                *state = AncestorState::Built(Arc::clone(&node));
                Ok(node)
            }
        }
    }

    /// Root node if it has already been built
    pub fn built_ancestor(&self) -> Option<Arc<Node>> {
        match &*self.ancestor.lock() {
            AncestorState::Built(node) => Some(Arc::clone(node)),
            AncestorState::Pending(_) => None,
        }
    }

    /// Whether the root has been built
    pub fn is_materialized(&self) -> bool {
        matches!(&*self.ancestor.lock(), AncestorState::Built(_))
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("time", &self.time)
            .field("commit_id", &self.commit_id)
            .field("materialized", &self.is_materialized())
            .finish()
    }
}

/// Progress callback for assembly
pub type ProgressCallback = Arc<dyn Fn(ProgressInfo) + Send + Sync>;

/// Information passed to progress callbacks
///
/// Under parallel strategies callbacks may arrive out of order, but every
/// commit contributes exactly one increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressInfo {
    /// Snapshots written so far
    pub processed: usize,
    /// Total snapshots to write
    pub total: usize,
}

impl ProgressInfo {
    /// Progress as a fraction in `[0, 1]`
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.processed as f64 / self.total as f64
        }
    }
}
