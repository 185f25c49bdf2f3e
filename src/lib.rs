//! # Weaver - Scrubbable timelines of repository history
//!
//! Weaver turns the commit history of a repository into an array of immutable
//! directory-tree snapshots, then follows a time value across that array and
//! reports exactly what appeared, changed and disappeared between the
//! snapshot that was showing and the one that is showing now.
//!
//! ## Overview
//!
//! Weaver is built from two subsystems:
//! - The **snapshot assembler** reads every commit through a [`HistorySource`]
//!   and builds one [`Snapshot`] per commit, each tagged with a time normalized
//!   to `[0, 1]`. Unchanged subtrees and files can be shared between snapshots
//!   instead of being rebuilt.
//! - The **timeline daemon** tracks the active snapshot for a [`Clock`],
//!   scrubbing forward or backward, and publishes ordered
//!   [`WeaverEvent`]s to an [`EventSink`].
//!
//! ## Architecture
//!
//! - **Entity model**: [`Owner`], [`Item`] (a file), [`Node`] (a directory)
//!   and [`Snapshot`] are immutable and handed out as `Arc`s
//! - **Tree builder**: materializes one commit's tree, reusing a predecessor's
//!   nodes wholesale when their content hashes match
//! - **Strategies**: six ways to assemble (see [`Strategy`]) trading CPU,
//!   memory and latency; all of them produce the same tree content
//! - **Structural diff**: name-matched recursive diff whose deletions run
//!   bottom-up and creations top-down, so a mirrored hierarchy is never asked
//!   to touch a missing parent
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use weaver::{AssemblerBuilder, GitHistory, ManualClock, Strategy, TimelineDaemon, WeaverEvent};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let history = Arc::new(GitHistory::open("./my_project")?);
//! let assembler = AssemblerBuilder::new()
//!     .strategy(Strategy::SequentialLookBehind)
//!     .exclude_subtrees(vec!["target".to_string(), "node_modules".to_string()])
//!     .build(history)?;
//! println!("Assembled {} snapshots", assembler.snapshot_count());
//!
//! let clock = ManualClock::new(0.0);
//! let mut daemon = TimelineDaemon::new(clock.clone(), Vec::<WeaverEvent>::new());
//! daemon.set_assembler(Some(Arc::new(assembler)));
//!
//! clock.set(0.5);
//! daemon.tick()?;
//! for event in daemon.sink() {
//!     println!("{} {}", event.key(), event.node().name);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Choosing a Strategy
//!
//! | Strategy | Order | Sharing | Roots |
//! |---|---|---|---|
//! | `Sequential` | commit order | none | eager |
//! | `Parallel` | concurrent | none | eager |
//! | `Lazy` | commit order | none | on first access |
//! | `ParallelLazy` | concurrent | none | on first access |
//! | `SequentialLookBehind` | commit order | previous snapshot | eager |
//! | `ChunkedParallelLookBehind` | chunks concurrently | within a chunk | eager |
//!
//! Look-behind strategies keep memory proportional to what changed. The
//! chunked variant gives up sharing across chunk boundaries in exchange for
//! parallelism. Lazy strategies keep the history backend open until the
//! assembler is disposed so deferred roots can still be read.
//!
//! ## Cancellation and Progress
//!
//! [`AssemblerBuilder::progress`] receives one increment per finished snapshot,
//! possibly out of order under parallel strategies. A [`CancellationToken`]
//! stops new work from starting; [`AssemblerBuilder::assemble`] returns the
//! partial [`Assembly`] with every finished slot intact.
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T>`] with a [`WeaverError`]. Tree
//! read failures abort the snapshot under construction and surface as
//! [`WeaverError::TreeRead`]; the daemon treats a missing assembler or an
//! unchanged snapshot as a normal no-op.
//!
//! ## Module Organization
//!
//! - [`types`]: entity model and progress types
//! - [`source`]: the history backend seam and an in-memory backend
//! - [`git`]: libgit2-backed history
//! - [`builder`]: the tree builder
//! - [`assembler`]: strategies, the assembler and its builder
//! - [`diff`]: the structural diff and event type
//! - [`daemon`]: the timeline daemon, clocks and sinks
//! - [`error`]: error types
//! - [`utils`]: hashing, path and time helpers

// Public API modules
pub mod assembler;
pub mod builder;
pub mod daemon;
pub mod diff;
pub mod error;
pub mod git;
pub mod source;
pub mod types;
pub mod utils;

// Internal modules (not part of public API)
mod collections;

// Re-export main types for convenience
pub use assembler::{
    Assembler, AssemblerBuilder, AssemblerConfig, Assembly, AssemblyStats, CancellationToken, Strategy,
};
pub use builder::{SubtreeFilter, TreeBuilder};
pub use daemon::{Clock, DaemonState, EventSink, FnSink, ManualClock, TimelineDaemon};
pub use diff::{diff_trees, DiffStats, WeaverEvent};
pub use error::{Result, WeaverError};
pub use git::GitHistory;
pub use source::{CommitInfo, HistorySource, MemoryHistory, MemoryHistoryBuilder};
pub use types::*;
