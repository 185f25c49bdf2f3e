//! Main test module for Weaver
//!
//! This module includes all test suites:
//! - Integration tests for whole assemblies and timelines
//! - Property-based tests for diff and strategy invariants
//! - Edge cases around degenerate histories

pub mod integration;

#[cfg(test)]
mod edge_cases {
    use ::weaver::*;
    use std::sync::Arc;

    fn dev() -> Owner {
        Owner::new("dev@example.com", "Dev")
    }

    #[test]
    fn test_empty_history_is_rejected() {
        let history = Arc::new(MemoryHistoryBuilder::new().build());
        for strategy in Strategy::ALL {
            let result = AssemblerBuilder::new().strategy(strategy).build(history.clone());
            assert!(matches!(result, Err(WeaverError::EmptyHistory)), "{}", strategy);
        }
    }

    #[test]
    fn test_unsorted_commits_are_rejected() {
        let history = MemoryHistoryBuilder::new()
            .commit(dev(), 10, &[("a", "1")])
            .commit(dev(), 20, &[("a", "2")])
            .commit(dev(), 30, &[("a", "3")])
            .build();
        let mut commits = history.commits().unwrap();
        commits.swap(1, 2);

        let err = AssemblerBuilder::new()
            .assemble_commits(Arc::new(history), commits)
            .unwrap_err();
        match err {
            WeaverError::InvalidCommitOrdering { index, previous, current } => {
                assert_eq!((index, previous, current), (2, 30, 20));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_single_commit_timeline() {
        let history = MemoryHistoryBuilder::new()
            .commit(dev(), 1_000, &[("only.txt", "x")])
            .build();
        let assembler = Arc::new(AssemblerBuilder::new().build(Arc::new(history)).unwrap());
        assert_eq!(assembler.snapshots()[0].time(), 0.0);

        let clock = ManualClock::new(0.5);
        let mut daemon = TimelineDaemon::new(clock.clone(), Vec::<WeaverEvent>::new());
        daemon.set_assembler(Some(assembler));
        assert_eq!(daemon.active_index(), Some(0));

        for t in [0.0, 1.0, 0.3] {
            clock.set(t);
            assert_eq!(daemon.tick().unwrap(), 0);
        }
    }

    #[test]
    fn test_unicode_names_survive_assembly() {
        let names = ["файл.txt", "文件/データ.md", "🚀/launch.rs"];
        let files: Vec<(&str, &str)> = names.iter().map(|n| (*n, "h")).collect();
        let history = MemoryHistoryBuilder::new()
            .commit(dev(), 0, &[])
            .commit(dev(), 1, &files)
            .build();

        let events = {
            let assembler = AssemblerBuilder::new().build(Arc::new(history)).unwrap();
            diff_trees(&assembler.ancestor(0).unwrap(), &assembler.ancestor(1).unwrap())
        };
        let created: Vec<&str> = events
            .iter()
            .filter_map(|e| e.item().map(|i| i.name.as_str()))
            .collect();
        assert_eq!(created.len(), 3);
        assert!(created.contains(&"文件/データ.md"));
        assert_eq!(DiffStats::from_events(&events).nodes_created, 2);
    }

    #[test]
    fn test_closure_clock_and_sink() {
        let history = MemoryHistoryBuilder::new()
            .commit(dev(), 0, &[])
            .commit(dev(), 1, &[("a/b.txt", "1")])
            .build();
        let assembler = Arc::new(AssemblerBuilder::new().build(Arc::new(history)).unwrap());

        let mut keys = Vec::new();
        {
            let mut daemon = TimelineDaemon::new(|| 1.0, FnSink(|event: WeaverEvent| keys.push(event.key())));
            daemon.set_assembler(Some(assembler));
            // attached at the first snapshot at or after t=1.0
            assert_eq!(daemon.active_index(), Some(1));
            assert_eq!(daemon.tick().unwrap(), 0);
            daemon.set_assembler(None);
            assert_eq!(daemon.tick().unwrap(), 0);
        }
        assert!(keys.is_empty());
    }
}
