//! libgit2-backed history source
//!
//! [`GitHistory`] walks the commits reachable from `HEAD` and serves tree
//! objects to the assembler. `git2::Repository` is not `Sync`, so the history
//! keeps a small pool of repository handles and lends one to each concurrent
//! reader; a handle is opened lazily whenever the pool runs dry.
//!
//! ```rust,no_run
//! use weaver::git::GitHistory;
//! use weaver::source::HistorySource;
//!
//! # fn main() -> weaver::Result<()> {
//! let history = GitHistory::open("./my_project")?;
//! for commit in history.commits()? {
//!     println!("{} {}", commit.timestamp, commit.author.display_name);
//! }
//! # Ok(())
//! # }
//! ```

use crate::error::{Result, WeaverError};
use crate::source::{CommitInfo, EntryKind, HistorySource, TreeEntry, TreeHandle};
use crate::types::Owner;
use crate::utils::join_path;
use git2::{ErrorCode, ObjectType, Oid, Repository, Sort};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

/// A git repository read through libgit2
pub struct GitHistory {
    path: PathBuf,
    pool: Mutex<Vec<Repository>>,
}

impl std::fmt::Debug for GitHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHistory")
            .field("path", &self.path)
            .field("pooled_handles", &self.pool.lock().len())
            .finish()
    }
}

impl GitHistory {
    /// Open the repository at `path` (a work tree or a `.git` directory)
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let repo = Repository::open(&path)?;
        debug!("Opened git repository at {:?}", path);

        Ok(Self {
            path,
            pool: Mutex::new(vec![repo]),
        })
    }

    /// Path the repository was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_repo<T>(&self, f: impl FnOnce(&Repository) -> Result<T>) -> Result<T> {
        let pooled = self.pool.lock().pop();
        let repo = match pooled {
            Some(repo) => repo,
            None => {
                trace!("Opening additional repository handle for {:?}", self.path);
                Repository::open(&self.path)?
            }
        };

        let result = f(&repo);
        self.pool.lock().push(repo);
        result
    }
}

impl HistorySource for GitHistory {
    fn commits(&self) -> Result<Vec<CommitInfo>> {
        self.with_repo(|repo| {
            match repo.head() {
                Ok(_) => {}
                Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
                    debug!("Repository has no commits yet");
                    return Ok(Vec::new());
                }
                Err(e) => return Err(e.into()),
            }

            let mut revwalk = repo.revwalk()?;
            revwalk.push_head()?;
            revwalk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME | Sort::REVERSE)?;

            let mut commits = Vec::new();
            for oid in revwalk {
                let commit = repo.find_commit(oid?)?;
                let author = commit.author();
                let email = String::from_utf8_lossy(author.email_bytes()).into_owned();
                let name = String::from_utf8_lossy(author.name_bytes()).into_owned();

                commits.push(CommitInfo {
                    id: commit.id().to_string(),
                    author: Owner::new(email, name),
                    timestamp: commit.committer().when().seconds(),
                    tree: TreeHandle::root(commit.tree_id().to_string()),
                });
            }

            // Walk order is parents first; the sort is stable so same-second
            // commits stay in that order and HEAD ends up last.
            commits.sort_by_key(|commit| commit.timestamp);
            debug!("Collected {} commits", commits.len());
            Ok(commits)
        })
    }

    fn read_tree(&self, tree: &TreeHandle) -> Result<Vec<TreeEntry>> {
        let oid = Oid::from_str(&tree.hash)
            .map_err(|e| WeaverError::tree_read(&tree.hash, &tree.path, e.message()))?;

        self.with_repo(|repo| {
            let object = repo
                .find_tree(oid)
                .map_err(|e| WeaverError::tree_read(&tree.hash, &tree.path, e.message()))?;

            let mut entries = Vec::with_capacity(object.len());
            for entry in object.iter() {
                let name = String::from_utf8_lossy(entry.name_bytes());
                let path = join_path(&tree.path, &name);
                let kind = match entry.kind() {
                    Some(ObjectType::Blob) => EntryKind::Blob,
                    Some(ObjectType::Tree) => EntryKind::Tree,
                    Some(ObjectType::Commit) => {
                        debug!("Skipping submodule {}", path);
                        continue;
                    }
                    other => {
                        warn!("Skipping {:?} entry {}", other, path);
                        continue;
                    }
                };
                entries.push(TreeEntry {
                    kind,
                    path,
                    hash: entry.id().to_string(),
                });
            }
            Ok(entries)
        })
    }
}
