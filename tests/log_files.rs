use graph_kernel::config::Config;
use graph_kernel::error::{Error, Result};
use graph_kernel::fs::{DefaultFileSystem, FileSystem};
use graph_kernel::kernel::{GraphKernel, KernelParts};
use graph_kernel::log::{LogFileVersionTracker, LogFilesBuilder, LogPosition};
use graph_kernel::storage::command::{Command, NodeRecord};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

#[derive(Default)]
struct RecordingTracker {
    events: Mutex<Vec<String>>,
}

impl LogFileVersionTracker for RecordingTracker {
    fn log_deleted(&self, version: u64) {
        self.events.lock().push(format!("deleted {}", version));
    }

    fn log_completed(&self, position: LogPosition) {
        self.events.lock().push(format!("completed {}", position));
    }
}

fn create_node(id: u64) -> Vec<Command> {
    vec![Command::Node {
        id,
        before: None,
        after: Some(NodeRecord::with_labels(vec![3])),
    }]
}

fn open(dir: &TempDir, threshold: u64, tracker: Arc<RecordingTracker>) -> GraphKernel {
    let mut config = Config::with_data_dir(dir.path().to_path_buf());
    config.set_rotation_threshold(threshold);
    GraphKernel::open_with(
        config,
        KernelParts {
            version_tracker: Some(tracker),
            ..KernelParts::default()
        },
    )
    .unwrap()
}

#[test]
fn test_rotation_then_deletion_reports_to_tracker() {
    let dir = TempDir::new().unwrap();
    let tracker = Arc::new(RecordingTracker::default());
    let kernel = open(&dir, u64::MAX, tracker.clone());
    kernel.commit(create_node(0)).unwrap();

    let closing = kernel.rotate().unwrap();
    let lowest = kernel.log().lowest_version().unwrap();
    let size = DefaultFileSystem
        .file_size(&kernel.log().segment_path(lowest))
        .unwrap();
    assert_eq!(closing, LogPosition::new(lowest, size));

    kernel.log().delete(lowest).unwrap();
    assert_eq!(
        *tracker.events.lock(),
        vec![
            format!("completed {}", LogPosition::new(lowest, size)),
            format!("deleted {}", lowest),
        ]
    );
}

#[test]
fn test_threshold_rotation_under_concurrent_commits() {
    let dir = TempDir::new().unwrap();
    let tracker = Arc::new(RecordingTracker::default());
    let kernel = Arc::new(open(&dir, 1024, tracker.clone()));

    let handles: Vec<_> = (0..4u64)
        .map(|t| {
            let kernel = kernel.clone();
            thread::spawn(move || {
                for i in 0..30u64 {
                    kernel.commit(create_node(t * 30 + i)).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let log = kernel.log();
    let versions = log.versions();
    assert!(versions.len() > 1);
    let completed = tracker.events.lock().len();
    assert_eq!(completed, versions.len() - 1);

    let mut ids = Vec::new();
    for version in versions {
        for entry in log.open_for_version(version).unwrap().read_all().unwrap() {
            assert_eq!(entry.position.version, version);
            ids.push(entry.tx_id);
        }
    }
    let expected: Vec<u64> = (2..122).collect();
    assert_eq!(ids, expected);
}

#[test]
fn test_files_only_context_refuses_appending() {
    let dir = TempDir::new().unwrap();
    {
        let kernel = open(&dir, u64::MAX, Arc::default());
        kernel.commit(create_node(0)).unwrap();
    }
    let log_dir = Config::with_data_dir(dir.path().to_path_buf()).log_dir();
    let log = LogFilesBuilder::log_files_based_only(log_dir, Arc::new(DefaultFileSystem))
        .build()
        .unwrap();

    assert!(matches!(
        log.context().last_committed_transaction_id(),
        Err(Error::Unsupported(_))
    ));
    assert!(matches!(log.rotate(), Err(Error::Unsupported(_))));
    let entries: Vec<_> = log.entries_from(0).collect::<Result<_>>().unwrap();
    assert_eq!(entries.len(), 1);
}

#[test]
fn test_checkpoint_deletes_before_completing() {
    let dir = TempDir::new().unwrap();
    let tracker = Arc::new(RecordingTracker::default());
    let kernel = open(&dir, u64::MAX, tracker.clone());
    kernel.commit(create_node(0)).unwrap();
    kernel.rotate().unwrap();
    kernel.commit(create_node(1)).unwrap();
    tracker.events.lock().clear();

    let closing = kernel.log().rotate_and_prune(1).unwrap();
    let events = tracker.events.lock().clone();
    assert_eq!(events[0], "deleted 0");
    assert_eq!(events[1], format!("completed {}", closing));
    assert_eq!(kernel.log().versions(), vec![1, 2]);
}
