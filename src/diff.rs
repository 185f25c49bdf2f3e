//! Structural diff between two snapshot trees
//!
//! [`diff_trees`] compares two roots and yields the ordered lifecycle events
//! that turn a mirror of the old tree into a mirror of the new one. Nodes and
//! items are matched by name; an item whose content hash differs is changed,
//! never destroyed and recreated. There is no rename event: a moved directory
//! is destroyed under its old name and created under the new one.
//!
//! ## Ordering
//!
//! For each matched pair of nodes the events are emitted as:
//!
//! 1. subtrees that disappeared, deepest nodes first, each node's items
//!    before the node itself
//! 2. items that disappeared
//! 3. items whose content changed
//! 4. items that appeared
//! 5. the recursive diff of every child present on both sides
//! 6. subtrees that appeared, each node before its items and children
//!
//! A consumer that mirrors the hierarchy therefore never sees an event for a
//! node whose parent has not been created yet, or has already been destroyed.
//!
//! Subtrees that are the same allocation or have equal content hashes are
//! skipped without descending into them, which makes diffs between
//! structurally shared snapshots proportional to what actually changed.
//!
//! ## Examples
//!
//! ```rust
//! use weaver::diff::{diff_trees, WeaverEvent};
//! use weaver::{Item, Node, Owner};
//! use std::sync::Arc;
//!
//! let owner = Arc::new(Owner::new("a@example.com", "A"));
//! let old = Node::new("", "t1", owner.clone(), vec![], vec![], 0);
//! let new = Node::new("", "t2", owner, vec![Arc::new(Item::new("h1", "a.txt"))], vec![], 0);
//!
//! let events = diff_trees(&old, &new);
//! assert!(matches!(&events[..], [WeaverEvent::ItemCreated { .. }]));
//! ```

use crate::collections::HashMap;
use crate::types::{Item, Node};
use serde::Serialize;
use std::sync::Arc;
use tracing::trace;

/// Key published with [`WeaverEvent::NodeCreated`]
pub const NODE_CREATED: &str = "weaver.node.created";
/// Key published with [`WeaverEvent::NodeDestroyed`]
pub const NODE_DESTROYED: &str = "weaver.node.destroyed";
/// Key published with [`WeaverEvent::ItemCreated`]
pub const ITEM_CREATED: &str = "weaver.item.created";
/// Key published with [`WeaverEvent::ItemChanged`]
pub const ITEM_CHANGED: &str = "weaver.item.changed";
/// Key published with [`WeaverEvent::ItemDestroyed`]
pub const ITEM_DESTROYED: &str = "weaver.item.destroyed";

/// A node or item lifecycle event
#[derive(Debug, Clone)]
pub enum WeaverEvent {
    /// A directory appeared
    NodeCreated(Arc<Node>),
    /// A directory disappeared
    NodeDestroyed(Arc<Node>),
    /// A file appeared in `node`
    ItemCreated {
        /// Node that owns the item in the new tree
        node: Arc<Node>,
        /// The new item
        item: Arc<Item>,
    },
    /// A file's content changed
    ItemChanged {
        /// Node that owns the item in the new tree
        node: Arc<Node>,
        /// The item with its new content hash
        item: Arc<Item>,
    },
    /// A file disappeared from `node`
    ItemDestroyed {
        /// Node that owned the item in the old tree
        node: Arc<Node>,
        /// The removed item
        item: Arc<Item>,
    },
}

impl WeaverEvent {
    /// Stable key identifying the event kind
    pub fn key(&self) -> &'static str {
        match self {
            WeaverEvent::NodeCreated(_) => NODE_CREATED,
            WeaverEvent::NodeDestroyed(_) => NODE_DESTROYED,
            WeaverEvent::ItemCreated { .. } => ITEM_CREATED,
            WeaverEvent::ItemChanged { .. } => ITEM_CHANGED,
            WeaverEvent::ItemDestroyed { .. } => ITEM_DESTROYED,
        }
    }

    /// The node the event concerns
    pub fn node(&self) -> &Arc<Node> {
        match self {
            WeaverEvent::NodeCreated(node) | WeaverEvent::NodeDestroyed(node) => node,
            WeaverEvent::ItemCreated { node, .. }
            | WeaverEvent::ItemChanged { node, .. }
            | WeaverEvent::ItemDestroyed { node, .. } => node,
        }
    }

    /// The item, for item events
    pub fn item(&self) -> Option<&Arc<Item>> {
        match self {
            WeaverEvent::NodeCreated(_) | WeaverEvent::NodeDestroyed(_) => None,
            WeaverEvent::ItemCreated { item, .. }
            | WeaverEvent::ItemChanged { item, .. }
            | WeaverEvent::ItemDestroyed { item, .. } => Some(item),
        }
    }
}

/// Event counts by kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiffStats {
    /// Directories created
    pub nodes_created: usize,
    /// Directories destroyed
    pub nodes_destroyed: usize,
    /// Files created
    pub items_created: usize,
    /// Files changed
    pub items_changed: usize,
    /// Files destroyed
    pub items_destroyed: usize,
}

impl DiffStats {
    /// Count the events in `events`
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a WeaverEvent>) -> Self {
        let mut stats = Self::default();
        for event in events {
            stats.record(event);
        }
        stats
    }

    /// Count one event
    pub fn record(&mut self, event: &WeaverEvent) {
        match event {
            WeaverEvent::NodeCreated(_) => self.nodes_created += 1,
            WeaverEvent::NodeDestroyed(_) => self.nodes_destroyed += 1,
            WeaverEvent::ItemCreated { .. } => self.items_created += 1,
            WeaverEvent::ItemChanged { .. } => self.items_changed += 1,
            WeaverEvent::ItemDestroyed { .. } => self.items_destroyed += 1,
        }
    }

    /// Total number of events
    pub fn total(&self) -> usize {
        self.nodes_created + self.nodes_destroyed + self.items_created + self.items_changed + self.items_destroyed
    }
}

/// Diff two trees into an ordered event list
pub fn diff_trees(old: &Arc<Node>, new: &Arc<Node>) -> Vec<WeaverEvent> {
    let mut events = Vec::new();
    diff_nodes(old, new, &mut |event| events.push(event));
    events
}

/// Diff two matched nodes, handing each event to `emit` in order
pub fn diff_nodes(old: &Arc<Node>, new: &Arc<Node>, emit: &mut impl FnMut(WeaverEvent)) {
    if Arc::ptr_eq(old, new) || old.content_hash == new.content_hash {
        return;
    }
    trace!("Diffing node '{}'", new.name);

    let new_children: HashMap<&str, &Arc<Node>> =
        new.children.iter().map(|child| (child.name.as_str(), child)).collect();
    let old_children: HashMap<&str, &Arc<Node>> =
        old.children.iter().map(|child| (child.name.as_str(), child)).collect();
    let new_items: HashMap<&str, &Arc<Item>> = new.items.iter().map(|item| (item.name.as_str(), item)).collect();
    let old_items: HashMap<&str, &Arc<Item>> = old.items.iter().map(|item| (item.name.as_str(), item)).collect();

    let mut matched = Vec::new();
    for child in &old.children {
        match new_children.get(child.name.as_str()) {
            Some(counterpart) => matched.push((child, *counterpart)),
            None => publish_deletion(child, emit),
        }
    }

    for item in &old.items {
        if !new_items.contains_key(item.name.as_str()) {
            emit(WeaverEvent::ItemDestroyed {
                node: Arc::clone(old),
                item: Arc::clone(item),
            });
        }
    }

    for item in &old.items {
        if let Some(updated) = new_items.get(item.name.as_str()) {
            if updated.content_hash != item.content_hash {
                emit(WeaverEvent::ItemChanged {
                    node: Arc::clone(new),
                    item: Arc::clone(updated),
                });
            }
        }
    }

    for item in &new.items {
        if !old_items.contains_key(item.name.as_str()) {
            emit(WeaverEvent::ItemCreated {
                node: Arc::clone(new),
                item: Arc::clone(item),
            });
        }
    }

    for (old_child, new_child) in matched {
        diff_nodes(old_child, new_child, emit);
    }

    for child in &new.children {
        if !old_children.contains_key(child.name.as_str()) {
            publish_creation(child, emit);
        }
    }
}

/// Emit creation of `node` and everything below it, parents first
pub fn publish_creation(node: &Arc<Node>, emit: &mut impl FnMut(WeaverEvent)) {
    emit(WeaverEvent::NodeCreated(Arc::clone(node)));
    for item in &node.items {
        emit(WeaverEvent::ItemCreated {
            node: Arc::clone(node),
            item: Arc::clone(item),
        });
    }
    for child in &node.children {
        publish_creation(child, emit);
    }
}

/// Emit destruction of `node` and everything below it, children first
pub fn publish_deletion(node: &Arc<Node>, emit: &mut impl FnMut(WeaverEvent)) {
    for child in &node.children {
        publish_deletion(child, emit);
    }
    for item in &node.items {
        emit(WeaverEvent::ItemDestroyed {
            node: Arc::clone(node),
            item: Arc::clone(item),
        });
    }
    emit(WeaverEvent::NodeDestroyed(Arc::clone(node)));
}
