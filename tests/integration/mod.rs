//! Integration tests for Weaver
//!
//! Drives whole assemblies and timelines over synthesized histories:
//! strategy equivalence, structural sharing, cancellation, disposal and
//! long random scrubs checked against a mirrored hierarchy.

use ::weaver::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::info;

/// Generates random but reproducible commit histories
pub struct HistoryGenerator {
    rng: StdRng,
    files: BTreeMap<String, String>,
    next_hash: u64,
    timestamp: i64,
}

/// Shape of a generated history
#[derive(Debug, Clone)]
pub struct HistoryConfig {
    pub commits: usize,
    pub mutations_per_commit: usize,
    pub max_depth: usize,
    pub max_gap: i64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            commits: 30,
            mutations_per_commit: 4,
            max_depth: 3,
            max_gap: 3_600,
        }
    }
}

impl HistoryGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            files: BTreeMap::new(),
            next_hash: 0,
            timestamp: 1_700_000_000,
        }
    }

    /// Generate a history; commits may share timestamps
    pub fn generate(&mut self, config: &HistoryConfig) -> MemoryHistory {
        let mut builder = MemoryHistoryBuilder::new();
        let authors = [
            Owner::new("ada@example.com", "Ada"),
            Owner::new("grace@example.com", "Grace"),
        ];

        for index in 0..config.commits {
            if index > 0 {
                for _ in 0..config.mutations_per_commit {
                    self.mutate(config.max_depth);
                }
                self.timestamp += self.rng.random_range(0..=config.max_gap);
            }
            let files: Vec<(&str, &str)> = self.files.iter().map(|(p, h)| (p.as_str(), h.as_str())).collect();
            let author = authors[index % authors.len()].clone();
            builder = builder.commit(author, self.timestamp, &files);
        }
        builder.build()
    }

    fn fresh_hash(&mut self) -> String {
        self.next_hash += 1;
        format!("{:08x}", self.next_hash)
    }

    fn random_path(&mut self, max_depth: usize) -> String {
        let depth = self.rng.random_range(0..=max_depth);
        let mut parts: Vec<String> = (0..depth).map(|_| format!("d{}", self.rng.random_range(0..3))).collect();
        parts.push(format!("f{}.txt", self.rng.random_range(0..5)));
        parts.join("/")
    }

    fn random_existing(&mut self) -> Option<String> {
        if self.files.is_empty() {
            return None;
        }
        let index = self.rng.random_range(0..self.files.len());
        self.files.keys().nth(index).cloned()
    }

    fn mutate(&mut self, max_depth: usize) {
        match self.rng.random_range(0..5) {
            0 | 1 => {
                let path = self.random_path(max_depth);
                let hash = self.fresh_hash();
                self.files.insert(path, hash);
            }
            2 => {
                if let Some(path) = self.random_existing() {
                    // Occasionally revert to content seen elsewhere
                    let hash = if self.rng.random_bool(0.3) {
                        self.random_existing().and_then(|other| self.files.get(&other).cloned())
                    } else {
                        None
                    };
                    let hash = hash.unwrap_or_else(|| self.fresh_hash());
                    self.files.insert(path, hash);
                }
            }
            3 => {
                if let Some(path) = self.random_existing() {
                    self.files.remove(&path);
                }
            }
            _ => {
                // Drop a whole directory
                if let Some(path) = self.random_existing() {
                    if let Some((dir, _)) = path.rsplit_once('/') {
                        let prefix = format!("{}/", dir);
                        self.files.retain(|p, _| !p.starts_with(&prefix));
                    }
                }
            }
        }
    }
}

/// A hierarchy rebuilt purely from lifecycle events
///
/// `apply` rejects any event that references a missing parent, creates
/// something twice, or destroys a node that still has contents.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Mirror {
    pub nodes: BTreeSet<String>,
    pub items: BTreeMap<(String, String), String>,
}

fn parent_path(name: &str) -> &str {
    name.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
}

impl Mirror {
    /// Mirror of a fully built tree
    pub fn of(root: &Arc<Node>) -> Self {
        let mut mirror = Mirror::default();
        root.walk(&mut |node| {
            if !node.is_root() {
                mirror.nodes.insert(node.name.clone());
            }
            for item in &node.items {
                mirror
                    .items
                    .insert((node.name.clone(), item.name.clone()), item.content_hash.clone());
            }
        });
        mirror
    }

    fn has_node(&self, name: &str) -> bool {
        name.is_empty() || self.nodes.contains(name)
    }

    pub fn apply(&mut self, event: &WeaverEvent) -> std::result::Result<(), String> {
        match event {
            WeaverEvent::NodeCreated(node) => {
                if !self.has_node(parent_path(&node.name)) {
                    return Err(format!("node {} created before its parent", node.name));
                }
                if !self.nodes.insert(node.name.clone()) {
                    return Err(format!("node {} created twice", node.name));
                }
            }
            WeaverEvent::NodeDestroyed(node) => {
                if self.nodes.iter().any(|n| parent_path(n) == node.name && n != &node.name) {
                    return Err(format!("node {} destroyed before its children", node.name));
                }
                if self.items.keys().any(|(owner, _)| owner == &node.name) {
                    return Err(format!("node {} destroyed before its items", node.name));
                }
                if !self.nodes.remove(&node.name) {
                    return Err(format!("node {} destroyed but absent", node.name));
                }
            }
            WeaverEvent::ItemCreated { node, item } => {
                if !self.has_node(&node.name) {
                    return Err(format!("item {} created in missing node {}", item.name, node.name));
                }
                let key = (node.name.clone(), item.name.clone());
                if self.items.insert(key, item.content_hash.clone()).is_some() {
                    return Err(format!("item {} created twice", item.name));
                }
            }
            WeaverEvent::ItemChanged { node, item } => {
                let key = (node.name.clone(), item.name.clone());
                match self.items.get_mut(&key) {
                    Some(hash) if *hash != item.content_hash => *hash = item.content_hash.clone(),
                    Some(_) => return Err(format!("item {} changed to the same content", item.name)),
                    None => return Err(format!("item {} changed but absent", item.name)),
                }
            }
            WeaverEvent::ItemDestroyed { node, item } => {
                let key = (node.name.clone(), item.name.clone());
                if self.items.remove(&key).is_none() {
                    return Err(format!("item {} destroyed but absent", item.name));
                }
            }
        }
        Ok(())
    }
}

/// Scrub `assembler` through `times`, checking the mirror after every tick
pub fn scrub_and_check(assembler: Arc<Assembler>, times: &[f64]) -> Vec<String> {
    let clock = ManualClock::new(times.first().copied().unwrap_or(0.0));
    let mut daemon = TimelineDaemon::new(clock.clone(), Vec::<WeaverEvent>::new());
    daemon.set_assembler(Some(assembler));

    let mut mirror = Mirror::of(&daemon.active_snapshot().unwrap().ancestor().unwrap());
    let mut log = Vec::new();

    for &time in times {
        clock.set(time);
        daemon.tick().unwrap();
        for event in daemon.sink_mut().drain(..) {
            mirror.apply(&event).unwrap_or_else(|e| panic!("at t={}: {}", time, e));
            log.push(format!(
                "{} {} {}",
                event.key(),
                event.node().name,
                event.item().map(|i| i.name.as_str()).unwrap_or("")
            ));
        }
        let expected = Mirror::of(&daemon.active_snapshot().unwrap().ancestor().unwrap());
        assert_eq!(mirror, expected, "mirror diverged at t={}", time);
    }
    log
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tracing_test::traced_test;

    fn dev() -> Owner {
        Owner::new("dev@example.com", "Dev")
    }

    #[test]
    #[traced_test]
    fn test_random_scrub_keeps_mirror_in_sync() {
        let history = Arc::new(HistoryGenerator::new(7).generate(&HistoryConfig::default()));
        let mut rng = StdRng::seed_from_u64(99);
        let times: Vec<f64> = (0..60).map(|_| rng.random_range(0.0..=1.0)).collect();

        let mut logs = Vec::new();
        for strategy in [Strategy::SequentialLookBehind, Strategy::ParallelLazy, Strategy::ChunkedParallelLookBehind] {
            let assembler = AssemblerBuilder::new()
                .strategy(strategy)
                .chunk_count(4)
                .build(history.clone())
                .unwrap();
            info!("Scrubbing {} snapshots with {}", assembler.snapshot_count(), strategy);
            logs.push(scrub_and_check(Arc::new(assembler), &times));
        }

        assert!(!logs[0].is_empty());
        assert!(logs.iter().all(|log| log == &logs[0]));
        assert!(logs_contain("Scrubbing 30 snapshots with sequential-look-behind"));
    }

    #[test]
    fn test_full_sweeps_end_in_matching_state() {
        let history = Arc::new(HistoryGenerator::new(11).generate(&HistoryConfig {
            commits: 40,
            ..HistoryConfig::default()
        }));
        let assembler = Arc::new(AssemblerBuilder::new().build(history).unwrap());

        let forward: Vec<f64> = (0..=100).map(|i| i as f64 / 100.0).collect();
        let backward: Vec<f64> = forward.iter().rev().copied().collect();
        scrub_and_check(Arc::clone(&assembler), &forward);
        scrub_and_check(assembler, &backward);
    }

    #[test]
    fn test_look_behind_shares_unchanged_subtrees() {
        let history = Arc::new(
            MemoryHistoryBuilder::new()
                .commit(dev(), 0, &[("docs/guide.md", "g1"), ("src/main.rs", "m1")])
                .commit(dev(), 1, &[("docs/guide.md", "g1"), ("src/main.rs", "m2")])
                .build(),
        );

        let shared = AssemblerBuilder::new()
            .strategy(Strategy::SequentialLookBehind)
            .build(history.clone())
            .unwrap();
        let (a, b) = (shared.ancestor(0).unwrap(), shared.ancestor(1).unwrap());
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(a.find_child("docs").unwrap(), b.find_child("docs").unwrap()));
        assert!(!Arc::ptr_eq(a.find_child("src").unwrap(), b.find_child("src").unwrap()));

        let unshared = AssemblerBuilder::new().build(history).unwrap();
        let (a, b) = (unshared.ancestor(0).unwrap(), unshared.ancestor(1).unwrap());
        assert!(!Arc::ptr_eq(a.find_child("docs").unwrap(), b.find_child("docs").unwrap()));
    }

    #[test]
    fn test_chunk_boundaries_do_not_share() {
        let mut builder = MemoryHistoryBuilder::new();
        for timestamp in 0..5 {
            builder = builder.commit(dev(), timestamp, &[("same.txt", "h")]);
        }
        let history = Arc::new(builder.build());

        // 5 commits over 2 chunks: [0, 1] [2, 3] [4]
        let chunked = AssemblerBuilder::new()
            .strategy(Strategy::ChunkedParallelLookBehind)
            .chunk_count(2)
            .parallel_workers(2)
            .build(history.clone())
            .unwrap();
        let roots: Vec<Arc<Node>> = (0..5).map(|i| chunked.ancestor(i).unwrap()).collect();
        assert!(Arc::ptr_eq(&roots[0], &roots[1]));
        assert!(!Arc::ptr_eq(&roots[1], &roots[2]));
        assert!(Arc::ptr_eq(&roots[2], &roots[3]));
        assert!(!Arc::ptr_eq(&roots[3], &roots[4]));
        let stats = chunked.stats().unwrap();
        assert_eq!((stats.unique_nodes, stats.node_references), (3, 5));

        let sequential = AssemblerBuilder::new()
            .strategy(Strategy::SequentialLookBehind)
            .build(history)
            .unwrap();
        let stats = sequential.stats().unwrap();
        assert_eq!((stats.unique_nodes, stats.unique_items), (1, 1));
    }

    #[test]
    fn test_progress_reports_each_commit_once() {
        let history = Arc::new(HistoryGenerator::new(3).generate(&HistoryConfig {
            commits: 20,
            ..HistoryConfig::default()
        }));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let assembler = AssemblerBuilder::new()
            .strategy(Strategy::Parallel)
            .parallel_workers(4)
            .progress(move |info| sink.lock().push((info.processed, info.total)))
            .build(history)
            .unwrap();
        assert_eq!(assembler.snapshot_count(), 20);

        let mut seen = seen.lock().clone();
        seen.sort();
        let expected: Vec<(usize, usize)> = (1..=20).map(|n| (n, 20)).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_cancellation_keeps_finished_slots() {
        let history = Arc::new(HistoryGenerator::new(5).generate(&HistoryConfig {
            commits: 10,
            ..HistoryConfig::default()
        }));
        let token = CancellationToken::new();
        let trigger = token.clone();

        let assembly = AssemblerBuilder::new()
            .cancellation(token)
            .progress(move |info| {
                if info.processed == 3 {
                    trigger.cancel();
                }
            })
            .assemble(history)
            .unwrap();

        assert_eq!(assembly.completed(), 3);
        assert!(assembly.slots()[..3].iter().all(Option::is_some));
        assert!(assembly.slots()[3..].iter().all(Option::is_none));
        let finished = assembly.slots()[2].as_ref().unwrap();
        assert!(finished.ancestor().is_ok());

        match assembly.into_assembler() {
            Err(WeaverError::Cancelled { completed, total }) => assert_eq!((completed, total), (3, 10)),
            other => panic!("expected cancellation, got {:?}", other),
        }
    }

    #[test]
    fn test_cancelled_parallel_assembly_starts_no_new_work() {
        let history = Arc::new(HistoryGenerator::new(8).generate(&HistoryConfig {
            commits: 16,
            ..HistoryConfig::default()
        }));
        let token = CancellationToken::new();
        let trigger = token.clone();

        let assembly = AssemblerBuilder::new()
            .strategy(Strategy::Parallel)
            .parallel_workers(1)
            .cancellation(token)
            .progress(move |_| trigger.cancel())
            .assemble(history)
            .unwrap();

        assert!(assembly.completed() >= 1);
        assert!(!assembly.is_complete());
        for snapshot in assembly.slots().iter().flatten() {
            assert!(snapshot.is_materialized());
        }
    }

    #[test]
    fn test_tree_read_errors_abort_or_defer() {
        let mut history = MemoryHistoryBuilder::new()
            .commit(dev(), 0, &[("src/a.rs", "1")])
            .commit(dev(), 1, &[("src/a.rs", "2")])
            .build();
        let commits = history.commits().unwrap();
        let root = history.read_tree(&commits[1].tree).unwrap();
        let src = root.iter().find(|entry| entry.path == "src").unwrap().hash.clone();
        assert!(history.remove_tree(&src));
        let history = Arc::new(history);

        for strategy in [Strategy::Sequential, Strategy::Parallel, Strategy::ChunkedParallelLookBehind] {
            match AssemblerBuilder::new().strategy(strategy).build(history.clone()) {
                Err(WeaverError::TreeRead { path, .. }) => assert_eq!(path, "src", "{}", strategy),
                other => panic!("{}: expected tree read error, got {:?}", strategy, other),
            }
        }

        let lazy = AssemblerBuilder::new()
            .strategy(Strategy::Lazy)
            .build(history)
            .unwrap();
        assert!(lazy.ancestor(0).is_ok());
        let err = lazy.ancestor(1).unwrap_err();
        assert!(err.is_corruption());
        // still pending, so a retry reads again
        assert!(!lazy.snapshots()[1].is_materialized());
    }

    #[test]
    fn test_disposal_contract() {
        let history = Arc::new(HistoryGenerator::new(21).generate(&HistoryConfig {
            commits: 3,
            ..HistoryConfig::default()
        }));
        let assembler = AssemblerBuilder::new()
            .strategy(Strategy::Lazy)
            .build(history)
            .unwrap();
        let forced = assembler.ancestor(0).unwrap();

        assembler.dispose().unwrap();
        assert!(assembler.is_disposed());
        assert!(matches!(assembler.dispose(), Err(WeaverError::DisposedAssemblerAccess)));
        assert!(matches!(assembler.ancestor(0), Err(WeaverError::DisposedAssemblerAccess)));

        // already built roots stay readable through the snapshot
        assert!(Arc::ptr_eq(&assembler.snapshots()[0].ancestor().unwrap(), &forced));
        assert!(matches!(
            assembler.snapshots()[1].ancestor(),
            Err(WeaverError::DisposedAssemblerAccess)
        ));
    }

    #[test]
    fn test_excluded_subtrees_are_never_built() {
        let history = Arc::new(
            MemoryHistoryBuilder::new()
                .commit(
                    dev(),
                    0,
                    &[
                        ("target/debug/app", "bin"),
                        ("web/node_modules/pkg/index.js", "js"),
                        ("web/app.js", "app"),
                        ("Cargo.toml", "toml"),
                    ],
                )
                .build(),
        );

        let assembler = AssemblerBuilder::new()
            .exclude_subtrees(vec!["target/".to_string(), "**/node_modules".to_string()])
            .build(history)
            .unwrap();
        let root = assembler.ancestor(0).unwrap();
        let children: Vec<&str> = root.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(children, vec!["web"]);
        let web = root.find_child("web").unwrap();
        assert!(web.children.is_empty());
        assert_eq!(web.items.len(), 1);
    }

    #[test]
    fn test_config_file_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("weaver.json");
        std::fs::write(
            &path,
            r#"{ "strategy": "chunked-parallel-look-behind", "chunk_count": 2, "excluded_subtrees": ["vendor"] }"#,
        )
        .unwrap();

        let config = AssemblerConfig::from_json_file(&path).unwrap();
        assert_eq!(config.strategy, Strategy::ChunkedParallelLookBehind);
        assert_eq!(config.parallel_workers, 0);

        let history = Arc::new(
            MemoryHistoryBuilder::new()
                .commit(dev(), 0, &[("vendor/x.c", "1"), ("main.c", "2")])
                .commit(dev(), 5, &[("vendor/x.c", "1"), ("main.c", "3")])
                .build(),
        );
        let assembler = AssemblerBuilder::from_config(config).build(history).unwrap();
        assert_eq!(assembler.config().chunk_count, 2);
        assert!(assembler.ancestor(1).unwrap().find_child("vendor").is_none());

        let bad = AssemblerBuilder::new().exclude_subtrees(vec!["[".to_string()]);
        let history = Arc::new(MemoryHistoryBuilder::new().commit(dev(), 0, &[]).build());
        assert!(matches!(bad.build(history), Err(WeaverError::InvalidPattern(_))));
    }
}
