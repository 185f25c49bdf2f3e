//! History backends feeding the assembler
//!
//! The assembler never talks to a version-control system directly. It asks a
//! [`HistorySource`] for the ordered commit list and, per commit, reads tree
//! objects one level at a time through [`HistorySource::read_tree`].
//!
//! Two backends ship with the crate:
//!
//! - [`GitHistory`](crate::git::GitHistory) reads a real repository through libgit2
//! - [`MemoryHistory`] holds synthesized trees, built with [`MemoryHistoryBuilder`]
//!
//! ## Examples
//!
//! ```rust
//! use weaver::source::{HistorySource, MemoryHistoryBuilder};
//! use weaver::Owner;
//!
//! # fn main() -> weaver::Result<()> {
//! let history = MemoryHistoryBuilder::new()
//!     .commit(Owner::new("ada@example.com", "Ada"), 0, &[])
//!     .commit(Owner::new("ada@example.com", "Ada"), 10, &[("src/lib.rs", "h1")])
//!     .build();
//!
//! let commits = history.commits()?;
//! let root = history.read_tree(&commits[1].tree)?;
//! assert_eq!(root[0].path, "src");
//! # Ok(())
//! # }
//! ```

use crate::collections::HashMap;
use crate::error::{Result, WeaverError};
use crate::types::Owner;
use crate::utils::{hash_data, join_path};
use std::collections::BTreeMap;

/// Kind of a tree entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// A file
    Blob,
    /// A directory
    Tree,
}

/// A tree object located at a repository path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TreeHandle {
    /// Content hash (object id) of the tree
    pub hash: String,
    /// Repository-relative path, empty for the root
    pub path: String,
}

impl TreeHandle {
    /// Create a handle
    pub fn new(hash: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            path: path.into(),
        }
    }

    /// Handle for a commit's root tree
    pub fn root(hash: impl Into<String>) -> Self {
        Self::new(hash, String::new())
    }
}

/// A direct entry of a tree object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// Blob or subtree
    pub kind: EntryKind,
    /// Repository-relative path of the entry
    pub path: String,
    /// Content hash of the blob or subtree
    pub hash: String,
}

impl TreeEntry {
    /// Handle to descend into this entry
    pub fn handle(&self) -> TreeHandle {
        TreeHandle::new(self.hash.clone(), self.path.clone())
    }
}

/// A commit as seen by the assembler
#[derive(Debug, Clone)]
pub struct CommitInfo {
    /// Commit id
    pub id: String,
    /// Author identity
    pub author: Owner,
    /// Committer timestamp in Unix seconds
    pub timestamp: i64,
    /// Root tree
    pub tree: TreeHandle,
}

/// Version-control backend the assembler reads from
///
/// Implementations must be shareable across worker threads; parallel
/// strategies call [`read_tree`](HistorySource::read_tree) concurrently.
pub trait HistorySource: Send + Sync {
    /// All commits, ascending by committer timestamp
    fn commits(&self) -> Result<Vec<CommitInfo>>;

    /// Direct entries of a tree
    ///
    /// Fails with [`WeaverError::TreeRead`] when the object cannot be resolved.
    fn read_tree(&self, tree: &TreeHandle) -> Result<Vec<TreeEntry>>;
}

#[derive(Debug, Clone)]
struct StoredEntry {
    kind: EntryKind,
    name: String,
    hash: String,
}

/// An in-memory history of synthesized trees
///
/// Trees are stored once per content hash, so identical directories anywhere
/// in any commit resolve to the same object, as in git.
#[derive(Debug, Clone, Default)]
pub struct MemoryHistory {
    commits: Vec<CommitInfo>,
    trees: HashMap<String, Vec<StoredEntry>>,
}

impl MemoryHistory {
    /// Number of distinct tree objects
    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    /// Remove a tree object, making every read of it fail
    ///
    /// Returns whether the tree existed.
    pub fn remove_tree(&mut self, hash: &str) -> bool {
        self.trees.remove(hash).is_some()
    }
}

impl HistorySource for MemoryHistory {
    fn commits(&self) -> Result<Vec<CommitInfo>> {
        Ok(self.commits.clone())
    }

    fn read_tree(&self, tree: &TreeHandle) -> Result<Vec<TreeEntry>> {
        let stored = self
            .trees
            .get(&tree.hash)
            .ok_or_else(|| WeaverError::tree_read(&tree.hash, &tree.path, "object not found"))?;

        Ok(stored
            .iter()
            .map(|entry| TreeEntry {
                kind: entry.kind,
                path: join_path(&tree.path, &entry.name),
                hash: entry.hash.clone(),
            })
            .collect())
    }
}

#[derive(Default)]
struct DirSpec<'a> {
    files: BTreeMap<&'a str, &'a str>,
    dirs: BTreeMap<&'a str, DirSpec<'a>>,
}

/// Builder for [`MemoryHistory`]
///
/// Each commit is described by its complete file list as `(path, content hash)`
/// pairs; directories are implied by the paths.
#[derive(Debug, Default)]
pub struct MemoryHistoryBuilder {
    history: MemoryHistory,
}

impl MemoryHistoryBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a commit whose tree contains exactly `files`
    ///
    /// Commits are kept in the order they are added; the caller is responsible
    /// for ascending timestamps.
    pub fn commit(mut self, author: Owner, timestamp: i64, files: &[(&str, &str)]) -> Self {
        let mut root = DirSpec::default();
        for &(path, hash) in files {
            let mut components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
            let Some(file_name) = components.pop() else {
                continue;
            };
            let mut dir = &mut root;
            for component in components {
                dir = dir.dirs.entry(component).or_default();
            }
            dir.files.insert(file_name, hash);
        }

        let tree_hash = self.store_dir(&root);
        let index = self.history.commits.len();
        let id = hash_data(format!("commit {} {} {}", index, timestamp, tree_hash).as_bytes());

        self.history.commits.push(CommitInfo {
            id,
            author,
            timestamp,
            tree: TreeHandle::root(tree_hash),
        });
        self
    }

    /// Finish building
    pub fn build(self) -> MemoryHistory {
        self.history
    }

    fn store_dir(&mut self, dir: &DirSpec<'_>) -> String {
        let mut entries: Vec<StoredEntry> = Vec::with_capacity(dir.files.len() + dir.dirs.len());
        for (name, sub) in &dir.dirs {
            entries.push(StoredEntry {
                kind: EntryKind::Tree,
                name: name.to_string(),
                hash: self.store_dir(sub),
            });
        }
        for (name, hash) in &dir.files {
            entries.push(StoredEntry {
                kind: EntryKind::Blob,
                name: name.to_string(),
                hash: hash.to_string(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        let mut canonical = String::from("tree\0");
        for entry in &entries {
            let kind = match entry.kind {
                EntryKind::Blob => "blob",
                EntryKind::Tree => "tree",
            };
            canonical.push_str(&format!("{} {} {}\n", kind, entry.name, entry.hash));
        }
        let hash = hash_data(canonical.as_bytes());

        self.history.trees.entry(hash.clone()).or_insert(entries);
        hash
    }
}
