//! Error types for the Weaver library
//!
//! Every fallible operation in the crate returns [`Result<T>`]. Errors are local
//! to a single `assemble` call or a single daemon tick; there is no process-wide
//! error state.

use thiserror::Error;

/// Type alias for Results in the Weaver library
pub type Result<T> = std::result::Result<T, WeaverError>;

/// Main error type for all Weaver operations
#[derive(Debug, Error)]
pub enum WeaverError {
    /// The history backend could not resolve a tree or blob object
    #[error("Failed to read tree {hash} at '{path}': {reason}")]
    TreeRead {
        /// Object id of the tree that failed to resolve
        hash: String,
        /// Repository-relative path of the tree (empty for the root)
        path: String,
        /// Backend-provided reason
        reason: String,
    },

    /// Commits were not supplied in ascending timestamp order
    #[error("Commit {index} has timestamp {current}, earlier than its predecessor ({previous})")]
    InvalidCommitOrdering {
        /// Index of the offending commit
        index: usize,
        /// Timestamp of the preceding commit
        previous: i64,
        /// Timestamp of the offending commit
        current: i64,
    },

    /// An operation was attempted on an assembler after it was disposed
    #[error("Assembler has been disposed")]
    DisposedAssemblerAccess,

    /// The history contains no commits
    #[error("History contains no commits")]
    EmptyHistory,

    /// Assembly was cancelled before every snapshot was built
    #[error("Assembly cancelled after {completed} of {total} snapshots")]
    Cancelled {
        /// Snapshots that were built before cancellation took effect
        completed: usize,
        /// Total number of commits
        total: usize,
    },

    /// Errors reported by libgit2
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Excluded-subtree pattern could not be compiled
    #[error("Invalid exclusion pattern: {0}")]
    InvalidPattern(String),

    /// Worker pool could not be created
    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl WeaverError {
    /// Create a tree read error
    pub fn tree_read(hash: impl Into<String>, path: impl Into<String>, reason: impl Into<String>) -> Self {
        WeaverError::TreeRead {
            hash: hash.into(),
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        WeaverError::Internal(msg.into())
    }

    /// Check if retrying the same operation could succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(self, WeaverError::Cancelled { .. } | WeaverError::ThreadPool(_))
    }

    /// Check if this error indicates a damaged repository
    pub fn is_corruption(&self) -> bool {
        matches!(self, WeaverError::TreeRead { .. })
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            WeaverError::TreeRead { hash, path, .. } => {
                let location = if path.is_empty() { "<root>" } else { path.as_str() };
                format!(
                    "Could not read tree {} ({}). The repository may be shallow or corrupt; try 'git fsck'.",
                    hash, location
                )
            }
            WeaverError::InvalidCommitOrdering { index, .. } => {
                format!("Commit #{} is out of order. Commits must be sorted by committer time.", index)
            }
            WeaverError::DisposedAssemblerAccess => {
                "The assembler was disposed. Build a new one from the repository.".to_string()
            }
            WeaverError::EmptyHistory => {
                "The repository has no commits to visualize.".to_string()
            }
            _ => self.to_string(),
        }
    }
}
