mod common;

use common::{committed_tx_ids, Fault, FaultyFileSystem};
use graph_kernel::config::Config;
use graph_kernel::error::Error;
use graph_kernel::kernel::{GraphKernel, KernelParts};
use graph_kernel::storage::command::{Command, NodeRecord, PropertyOwner, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

fn config(dir: &TempDir) -> Config {
    let mut config = Config::with_data_dir(dir.path().to_path_buf());
    config.set_rotation_threshold(2048);
    config
}

fn create_node(id: u64) -> Vec<Command> {
    vec![
        Command::Node {
            id,
            before: None,
            after: Some(NodeRecord::with_labels(vec![1])),
        },
        Command::NodeCounts {
            label: Some(1),
            delta: 1,
        },
    ]
}

fn orphan_property(node: u64) -> Vec<Command> {
    vec![Command::Property {
        owner: PropertyOwner::Node(node),
        key: 1,
        before: None,
        after: Some(Value::Int(1)),
    }]
}

#[test]
fn test_rejected_commit_is_never_logged() {
    let dir = TempDir::new().unwrap();
    {
        let kernel = GraphKernel::open(config(&dir)).unwrap();
        let first = kernel.commit(create_node(0)).unwrap();

        let err = kernel.commit(orphan_property(99)).unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
        assert!(kernel.health().is_healthy());
        assert_eq!(kernel.last_committed(), first);

        let next = kernel.commit(orphan_property(0)).unwrap();
        assert_eq!(next.tx_id, first.tx_id + 1);
    }
    assert_eq!(committed_tx_ids(&config(&dir).log_dir()), vec![2, 3]);

    let kernel = GraphKernel::open(config(&dir)).unwrap();
    assert!(kernel.health().is_healthy());
    assert_eq!(kernel.recovery_outcome().replayed, 2);
    kernel.engine().with_stores(|s| {
        assert_eq!(s.node_count(Some(1)), 1);
        assert_eq!(s.property(PropertyOwner::Node(0), 1), Some(&Value::Int(1)));
    });
}

#[test]
fn test_checkpoints_during_commits_keep_counts_exact() {
    let dir = TempDir::new().unwrap();
    let threads = 4u64;
    let per_thread = 40u64;
    {
        let kernel = Arc::new(GraphKernel::open(config(&dir)).unwrap());
        let committing = Arc::new(AtomicBool::new(true));

        let checkpointer = {
            let kernel = kernel.clone();
            let committing = committing.clone();
            thread::spawn(move || {
                let mut rounds = 0;
                while committing.load(Ordering::SeqCst) {
                    kernel.checkpoint().unwrap();
                    rounds += 1;
                }
                rounds
            })
        };
        let writers: Vec<_> = (0..threads)
            .map(|t| {
                let kernel = kernel.clone();
                thread::spawn(move || {
                    for i in 0..per_thread {
                        kernel.commit(create_node(t * per_thread + i)).unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }
        committing.store(false, Ordering::SeqCst);
        assert!(checkpointer.join().unwrap() > 0);
        kernel.checkpoint().unwrap();
        assert!(kernel.health().is_healthy());
    }

    let kernel = GraphKernel::open(config(&dir)).unwrap();
    let total = (threads * per_thread) as i64;
    kernel.engine().with_stores(|s| {
        assert_eq!(s.node_count(Some(1)), total);
        assert_eq!(s.nodes.len() as i64, total);
        assert_eq!(s.last_applied_tx_id(), 1 + threads * per_thread);
    });
    assert_eq!(kernel.recovery_outcome().replayed, 0);
}

#[test]
fn test_failed_snapshot_write_keeps_the_log() {
    let dir = TempDir::new().unwrap();
    let fs = FaultyFileSystem::new();
    let parts = || KernelParts {
        file_system: Some(fs.clone()),
        ..KernelParts::default()
    };
    {
        let kernel = GraphKernel::open_with(config(&dir), parts()).unwrap();
        kernel.commit(create_node(0)).unwrap();
        kernel.rotate().unwrap();
        kernel.commit(create_node(1)).unwrap();

        fs.fail_next_force(Fault::Io);
        let err = kernel.checkpoint().unwrap_err();
        assert!(matches!(err.root_cause(), Error::Io { .. }));
        assert_eq!(kernel.log().versions(), vec![0, 1]);
        assert!(kernel.health().is_healthy());
    }

    let kernel = GraphKernel::open_with(config(&dir), parts()).unwrap();
    assert_eq!(kernel.recovery_outcome().replayed, 2);
    kernel
        .engine()
        .with_stores(|s| assert_eq!(s.node_count(Some(1)), 2));
}
