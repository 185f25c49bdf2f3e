//! Snapshot assembly across a whole commit history
//!
//! The assembler turns an ordered commit list into one [`Snapshot`] per
//! commit. All six construction strategies run through the same pipeline,
//! which only varies along three axes:
//!
//! | Strategy | Workers | Look-behind | Root |
//! |---|---|---|---|
//! | `Sequential` | one, in commit order | no | eager |
//! | `Parallel` | one task per commit | no | eager |
//! | `Lazy` | one, in commit order | no | deferred |
//! | `ParallelLazy` | one task per commit | no | deferred |
//! | `SequentialLookBehind` | one, in commit order | whole history | eager |
//! | `ChunkedParallelLookBehind` | one task per chunk | within the chunk | eager |
//!
//! Every strategy yields the same tree content. Look-behind strategies hand
//! each build the previous snapshot's root so unchanged subtrees are shared
//! by reference. Chunked assembly never shares across chunk boundaries: the
//! first snapshot of each chunk is built from scratch.
//!
//! Workers own disjoint slices of the output array, so the only
//! synchronization is the final join.
//!
//! ## Examples
//!
//! ```rust
//! use weaver::{AssemblerBuilder, Owner, Strategy};
//! use weaver::source::MemoryHistoryBuilder;
//! use std::sync::Arc;
//!
//! # fn main() -> weaver::Result<()> {
//! let history = MemoryHistoryBuilder::new()
//!     .commit(Owner::new("a@example.com", "A"), 0, &[])
//!     .commit(Owner::new("a@example.com", "A"), 10, &[("a.txt", "h1")])
//!     .commit(Owner::new("a@example.com", "A"), 20, &[("a.txt", "h2")])
//!     .build();
//!
//! let assembler = AssemblerBuilder::new()
//!     .strategy(Strategy::SequentialLookBehind)
//!     .build(Arc::new(history))?;
//!
//! let times: Vec<f64> = assembler.snapshots().iter().map(|s| s.time()).collect();
//! assert_eq!(times, vec![0.0, 0.5, 1.0]);
//! # Ok(())
//! # }
//! ```

use crate::builder::{SubtreeFilter, TreeBuilder};
use crate::collections::{HashMap, HashSet};
use crate::error::{Result, WeaverError};
use crate::source::{CommitInfo, HistorySource};
use crate::types::{Materialize, Node, ProgressCallback, ProgressInfo, Snapshot};
use crate::utils::normalize_time;
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// How snapshots are constructed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Build in commit order, no sharing, eager roots
    #[default]
    Sequential,
    /// Build every snapshot concurrently, no sharing, eager roots
    Parallel,
    /// Build in commit order with roots deferred until first access
    Lazy,
    /// Concurrent construction with deferred roots
    ParallelLazy,
    /// Build in commit order, sharing unchanged subtrees with the previous snapshot
    SequentialLookBehind,
    /// Contiguous chunks built concurrently, sharing only within a chunk
    ChunkedParallelLookBehind,
}

impl Strategy {
    /// Every strategy, in declaration order
    pub const ALL: [Strategy; 6] = [
        Strategy::Sequential,
        Strategy::Parallel,
        Strategy::Lazy,
        Strategy::ParallelLazy,
        Strategy::SequentialLookBehind,
        Strategy::ChunkedParallelLookBehind,
    ];

    /// Whether roots are deferred until first access
    pub fn is_lazy(self) -> bool {
        matches!(self, Strategy::Lazy | Strategy::ParallelLazy)
    }

    /// Whether builds reuse the previous snapshot
    pub fn uses_look_behind(self) -> bool {
        matches!(self, Strategy::SequentialLookBehind | Strategy::ChunkedParallelLookBehind)
    }

    fn plan(self, total: usize, chunk_count: usize) -> Plan {
        let (parallel, chunk_len) = match self {
            Strategy::Sequential | Strategy::Lazy | Strategy::SequentialLookBehind => (false, total),
            Strategy::Parallel | Strategy::ParallelLazy => (true, 1),
            Strategy::ChunkedParallelLookBehind => (true, (total / chunk_count.max(1)).max(1)),
        };
        Plan {
            parallel,
            chunk_len: chunk_len.max(1),
            look_behind: self.uses_look_behind(),
            lazy: self.is_lazy(),
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Strategy::Sequential => "sequential",
            Strategy::Parallel => "parallel",
            Strategy::Lazy => "lazy",
            Strategy::ParallelLazy => "parallel-lazy",
            Strategy::SequentialLookBehind => "sequential-look-behind",
            Strategy::ChunkedParallelLookBehind => "chunked-parallel-look-behind",
        };
        f.write_str(name)
    }
}

/// Resolved pipeline shape for one assembly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Plan {
    parallel: bool,
    chunk_len: usize,
    look_behind: bool,
    lazy: bool,
}

/// Serializable assembler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblerConfig {
    /// Construction strategy
    pub strategy: Strategy,
    /// Chunks for chunked assembly (0 = half the available cores)
    pub chunk_count: usize,
    /// Glob patterns of subtrees that are never traversed
    pub excluded_subtrees: Vec<String>,
    /// Worker threads for parallel strategies (0 = all cores)
    pub parallel_workers: usize,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            chunk_count: 0,
            excluded_subtrees: Vec::new(),
            parallel_workers: 0,
        }
    }
}

impl AssemblerConfig {
    /// Load a configuration from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Chunk count with the automatic default applied
    pub fn effective_chunk_count(&self) -> usize {
        if self.chunk_count > 0 {
            self.chunk_count
        } else {
            (num_cpus::get() / 2).max(1)
        }
    }

    /// Worker count with the automatic default applied
    pub fn effective_workers(&self) -> usize {
        if self.parallel_workers > 0 {
            self.parallel_workers
        } else {
            num_cpus::get()
        }
    }
}

/// Cooperative cancellation for an in-progress assembly
///
/// Work that has already started finishes; nothing new is started once the
/// token is cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create an untriggered token
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Owned reference to the history backend, released exactly once
pub(crate) struct RepositoryHandle {
    source: RwLock<Option<Arc<dyn HistorySource>>>,
}

impl RepositoryHandle {
    fn new(source: Arc<dyn HistorySource>) -> Self {
        Self {
            source: RwLock::new(Some(source)),
        }
    }

    fn acquire(&self) -> Result<Arc<dyn HistorySource>> {
        self.source
            .read()
            .as_ref()
            .map(Arc::clone)
            .ok_or(WeaverError::DisposedAssemblerAccess)
    }

    /// Returns whether the handle was still held
    fn release(&self) -> bool {
        self.source.write().take().is_some()
    }

    fn is_released(&self) -> bool {
        self.source.read().is_none()
    }
}

/// Root build deferred until a lazy snapshot is first read
struct PendingTree {
    handle: Arc<RepositoryHandle>,
    commit: CommitInfo,
    filter: Arc<SubtreeFilter>,
}

impl Materialize for PendingTree {
    fn materialize(&self) -> Result<Arc<Node>> {
        let source = self.handle.acquire()?;
        debug!("Materializing deferred snapshot for commit {}", self.commit.id);
        TreeBuilder::new(source.as_ref(), &self.filter).build_root(&self.commit, None)
    }
}

/// State shared by every worker of one assembly
struct Pipeline<'a> {
    plan: Plan,
    commits: &'a [CommitInfo],
    source: &'a dyn HistorySource,
    handle: &'a Arc<RepositoryHandle>,
    filter: &'a Arc<SubtreeFilter>,
    progress: Option<&'a ProgressCallback>,
    cancellation: Option<&'a CancellationToken>,
    completed: AtomicUsize,
    start: i64,
    end: i64,
}

impl Pipeline<'_> {
    fn is_cancelled(&self) -> bool {
        self.cancellation.is_some_and(CancellationToken::is_cancelled)
    }

    /// Fill `slots` with the snapshots for commits `offset..offset + slots.len()`
    ///
    /// With `check_each`, cancellation is checked before every snapshot;
    /// otherwise the caller checks once before the chunk starts.
    fn run_chunk(&self, offset: usize, slots: &mut [Option<Snapshot>], check_each: bool) -> Result<()> {
        let builder = TreeBuilder::new(self.source, self.filter);
        let mut previous: Option<Arc<Node>> = None;

        for (i, slot) in slots.iter_mut().enumerate() {
            if check_each && self.is_cancelled() {
                debug!("Assembly cancelled before commit {}", offset + i);
                return Ok(());
            }

            let commit = &self.commits[offset + i];
            let time = normalize_time(commit.timestamp, self.start, self.end);

            let snapshot = if self.plan.lazy {
                let pending = PendingTree {
                    handle: Arc::clone(self.handle),
                    commit: commit.clone(),
                    filter: Arc::clone(self.filter),
                };
                Snapshot::deferred(time, commit.id.clone(), Box::new(pending))
            } else {
                let root = builder.build_root(commit, previous.as_ref())?;
                if self.plan.look_behind {
                    previous = Some(Arc::clone(&root));
                }
                Snapshot::new(time, commit.id.clone(), root)
            };

            *slot = Some(snapshot);
            let processed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(progress) = self.progress {
                progress(ProgressInfo {
                    processed,
                    total: self.commits.len(),
                });
            }
        }
        Ok(())
    }
}

/// Result of an assembly run, possibly partial after cancellation
pub struct Assembly {
    slots: Vec<Option<Snapshot>>,
    handle: Arc<RepositoryHandle>,
    config: AssemblerConfig,
    first_timestamp: i64,
    last_timestamp: i64,
}

impl std::fmt::Debug for Assembly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assembly")
            .field("total", &self.total())
            .field("completed", &self.completed())
            .field("config", &self.config)
            .finish()
    }
}

impl Assembly {
    /// Number of commits
    pub fn total(&self) -> usize {
        self.slots.len()
    }

    /// Number of snapshots that were built
    pub fn completed(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Whether every commit has its snapshot
    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Snapshot slots in commit order; `None` where cancellation prevented a build
    pub fn slots(&self) -> &[Option<Snapshot>] {
        &self.slots
    }

    /// Turn a complete assembly into an [`Assembler`]
    ///
    /// Fails with [`WeaverError::Cancelled`] if any snapshot is missing.
    pub fn into_assembler(self) -> Result<Assembler> {
        if !self.is_complete() {
            return Err(WeaverError::Cancelled {
                completed: self.completed(),
                total: self.total(),
            });
        }

        let snapshots = self.slots.into_iter().flatten().collect();
        Ok(Assembler {
            snapshots,
            handle: self.handle,
            config: self.config,
            first_timestamp: self.first_timestamp,
            last_timestamp: self.last_timestamp,
        })
    }
}

/// Builder for assemblies
///
/// # Examples
///
/// ```rust
/// use weaver::{AssemblerBuilder, CancellationToken, Strategy};
///
/// let builder = AssemblerBuilder::new()
///     .strategy(Strategy::ChunkedParallelLookBehind)
///     .chunk_count(4)
///     .exclude_subtrees(vec!["target".to_string(), "**/node_modules".to_string()])
///     .cancellation(CancellationToken::new())
///     .progress(|info| println!("{:.0}%", info.fraction() * 100.0));
/// ```
#[derive(Clone, Default)]
pub struct AssemblerBuilder {
    config: AssemblerConfig,
    progress: Option<ProgressCallback>,
    cancellation: Option<CancellationToken>,
}

impl std::fmt::Debug for AssemblerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssemblerBuilder")
            .field("config", &self.config)
            .field("progress", &self.progress.is_some())
            .field("cancellation", &self.cancellation)
            .finish()
    }
}

impl AssemblerBuilder {
    /// Create a builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration
    pub fn from_config(config: AssemblerConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Set the construction strategy
    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.config.strategy = strategy;
        self
    }

    /// Set the chunk count for chunked assembly (0 = automatic)
    pub fn chunk_count(mut self, chunk_count: usize) -> Self {
        self.config.chunk_count = chunk_count;
        self
    }

    /// Set glob patterns of subtrees to skip
    pub fn exclude_subtrees(mut self, patterns: Vec<String>) -> Self {
        self.config.excluded_subtrees = patterns;
        self
    }

    /// Set the worker thread count for parallel strategies (0 = all cores)
    pub fn parallel_workers(mut self, workers: usize) -> Self {
        self.config.parallel_workers = workers;
        self
    }

    /// Report progress after every written snapshot
    pub fn progress(mut self, callback: impl Fn(ProgressInfo) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(callback));
        self
    }

    /// Attach a cancellation token
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Current configuration
    pub fn config(&self) -> &AssemblerConfig {
        &self.config
    }

    /// Assemble every commit of `source` and require a complete result
    pub fn build(&self, source: Arc<dyn HistorySource>) -> Result<Assembler> {
        self.assemble(source)?.into_assembler()
    }

    /// Assemble every commit of `source`
    pub fn assemble(&self, source: Arc<dyn HistorySource>) -> Result<Assembly> {
        let commits = source.commits()?;
        self.assemble_commits(source, commits)
    }

    /// Assemble an explicit, ascending commit list read through `source`
    #[instrument(skip_all, fields(strategy = %self.config.strategy, commits = commits.len()))]
    pub fn assemble_commits(&self, source: Arc<dyn HistorySource>, commits: Vec<CommitInfo>) -> Result<Assembly> {
        let (first, last) = match (commits.first(), commits.last()) {
            (Some(first), Some(last)) => (first.timestamp, last.timestamp),
            _ => return Err(WeaverError::EmptyHistory),
        };
        validate_ordering(&commits)?;

        let filter = Arc::new(SubtreeFilter::new(&self.config.excluded_subtrees)?);
        let plan = self
            .config
            .strategy
            .plan(commits.len(), self.config.effective_chunk_count());
        let handle = Arc::new(RepositoryHandle::new(Arc::clone(&source)));

        info!(
            "Assembling {} snapshots ({}, chunk length {})",
            commits.len(),
            self.config.strategy,
            plan.chunk_len
        );
        let started = Instant::now();

        let pipeline = Pipeline {
            plan,
            commits: &commits,
            source: source.as_ref(),
            handle: &handle,
            filter: &filter,
            progress: self.progress.as_ref(),
            cancellation: self.cancellation.as_ref(),
            completed: AtomicUsize::new(0),
            start: first,
            end: last,
        };
        let mut slots: Vec<Option<Snapshot>> = (0..commits.len()).map(|_| None).collect();

        if plan.parallel {
            run_parallel(&pipeline, &mut slots, self.config.effective_workers())?;
        } else {
            pipeline.run_chunk(0, &mut slots, true)?;
        }

        let assembly = Assembly {
            slots,
            handle,
            config: self.config.clone(),
            first_timestamp: first,
            last_timestamp: last,
        };
        if assembly.is_complete() {
            info!("Assembled {} snapshots in {:?}", assembly.total(), started.elapsed());
        } else {
            warn!(
                "Assembly cancelled: {} of {} snapshots built in {:?}",
                assembly.completed(),
                assembly.total(),
                started.elapsed()
            );
        }
        Ok(assembly)
    }
}

fn validate_ordering(commits: &[CommitInfo]) -> Result<()> {
    for (index, pair) in commits.windows(2).enumerate() {
        if pair[1].timestamp < pair[0].timestamp {
            return Err(WeaverError::InvalidCommitOrdering {
                index: index + 1,
                previous: pair[0].timestamp,
                current: pair[1].timestamp,
            });
        }
    }
    Ok(())
}

/// Run every chunk on a dedicated pool and surface the first error once all settle
fn run_parallel(pipeline: &Pipeline<'_>, slots: &mut [Option<Snapshot>], workers: usize) -> Result<()> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| WeaverError::ThreadPool(e.to_string()))?;

    let chunk_len = pipeline.plan.chunk_len;
    let first_error: Mutex<Option<WeaverError>> = Mutex::new(None);
    let failed = AtomicBool::new(false);

    pool.install(|| {
        slots
            .par_chunks_mut(chunk_len)
            .enumerate()
            .for_each(|(chunk_index, chunk)| {
                if pipeline.is_cancelled() || failed.load(Ordering::SeqCst) {
                    return;
                }
                let offset = chunk_index * chunk_len;
                debug!("Chunk {} starting at commit {} ({} commits)", chunk_index, offset, chunk.len());

                if let Err(e) = pipeline.run_chunk(offset, chunk, false) {
                    warn!("Chunk {} failed: {}", chunk_index, e);
                    failed.store(true, Ordering::SeqCst);
                    first_error.lock().get_or_insert(e);
                }
            });
    });

    match first_error.into_inner() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Allocation counts across the materialized snapshots of an assembler
///
/// References count every node/item as if no sharing happened; unique counts
/// count distinct allocations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AssemblyStats {
    /// Snapshots in the assembler
    pub snapshots: usize,
    /// Snapshots whose roots are built
    pub materialized: usize,
    /// Distinct node allocations
    pub unique_nodes: usize,
    /// Distinct item allocations
    pub unique_items: usize,
    /// Nodes summed over every snapshot
    pub node_references: usize,
    /// Items summed over every snapshot
    pub item_references: usize,
}

impl AssemblyStats {
    /// Fraction of node references served by a shared allocation
    pub fn node_sharing_ratio(&self) -> f64 {
        if self.node_references == 0 {
            0.0
        } else {
            1.0 - self.unique_nodes as f64 / self.node_references as f64
        }
    }
}

/// An assembled, non-empty array of snapshots over one history
///
/// The assembler holds the history backend open for deferred snapshots until
/// [`dispose`](Assembler::dispose) is called or the assembler is dropped.
pub struct Assembler {
    snapshots: Vec<Snapshot>,
    handle: Arc<RepositoryHandle>,
    config: AssemblerConfig,
    first_timestamp: i64,
    last_timestamp: i64,
}

impl std::fmt::Debug for Assembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assembler")
            .field("snapshots", &self.snapshots.len())
            .field("config", &self.config)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl Assembler {
    /// Snapshots ordered by ascending time; never empty
    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    /// Number of snapshots
    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }

    /// Configuration used to assemble
    pub fn config(&self) -> &AssemblerConfig {
        &self.config
    }

    /// Committer timestamps of the first and last commit
    pub fn time_span(&self) -> (i64, i64) {
        (self.first_timestamp, self.last_timestamp)
    }

    /// Root node of snapshot `index`, building it if deferred
    pub fn ancestor(&self, index: usize) -> Result<Arc<Node>> {
        if self.is_disposed() {
            return Err(WeaverError::DisposedAssemblerAccess);
        }
        let snapshot = self.snapshots.get(index).ok_or_else(|| {
            WeaverError::internal(format!("snapshot index {} out of range ({})", index, self.snapshots.len()))
        })?;
        snapshot.ancestor()
    }

    /// Force every deferred snapshot root
    pub fn materialize_all(&self) -> Result<()> {
        for index in 0..self.snapshots.len() {
            self.ancestor(index)?;
        }
        Ok(())
    }

    /// Whether the history backend has been released
    pub fn is_disposed(&self) -> bool {
        self.handle.is_released()
    }

    /// Release the history backend
    ///
    /// Deferred snapshots that were never read can no longer be built, and
    /// [`ancestor`](Self::ancestor), [`materialize_all`](Self::materialize_all)
    /// and [`stats`](Self::stats) fail with
    /// [`WeaverError::DisposedAssemblerAccess`], as does a second call. Roots
    /// already built stay readable through [`Snapshot::ancestor`], and the
    /// snapshot list and configuration remain plain data.
    pub fn dispose(&self) -> Result<()> {
        if self.handle.release() {
            debug!("Assembler disposed");
            Ok(())
        } else {
            Err(WeaverError::DisposedAssemblerAccess)
        }
    }

    /// Count node and item allocations across built snapshots
    ///
    /// Fails with [`WeaverError::DisposedAssemblerAccess`] once disposed.
    pub fn stats(&self) -> Result<AssemblyStats> {
        if self.is_disposed() {
            return Err(WeaverError::DisposedAssemblerAccess);
        }
        let mut stats = AssemblyStats {
            snapshots: self.snapshots.len(),
            ..AssemblyStats::default()
        };
        // pointer -> (nodes, items) in the subtree
        let mut subtree_sizes: HashMap<usize, (usize, usize)> = HashMap::default();
        let mut seen_items: HashSet<usize> = HashSet::default();

        for snapshot in &self.snapshots {
            if let Some(root) = snapshot.built_ancestor() {
                stats.materialized += 1;
                let (nodes, items) = count_subtree(&root, &mut subtree_sizes, &mut seen_items);
                stats.node_references += nodes;
                stats.item_references += items;
            }
        }

        stats.unique_nodes = subtree_sizes.len();
        stats.unique_items = seen_items.len();
        Ok(stats)
    }
}

fn count_subtree(
    node: &Arc<Node>,
    subtree_sizes: &mut HashMap<usize, (usize, usize)>,
    seen_items: &mut HashSet<usize>,
) -> (usize, usize) {
    let key = Arc::as_ptr(node) as usize;
    if let Some(sizes) = subtree_sizes.get(&key) {
        return *sizes;
    }

    let mut nodes = 1;
    let mut items = node.items.len();
    for item in &node.items {
        seen_items.insert(Arc::as_ptr(item) as usize);
    }
    for child in &node.children {
        let (child_nodes, child_items) = count_subtree(child, subtree_sizes, seen_items);
        nodes += child_nodes;
        items += child_items;
    }

    subtree_sizes.insert(key, (nodes, items));
    (nodes, items)
}

impl Drop for Assembler {
    fn drop(&mut self) {
        self.handle.release();
    }
}
