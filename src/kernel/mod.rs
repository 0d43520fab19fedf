//! The assembled storage core: log, appender, apply pipeline and health, opened with
//! recovery and driven through `commit`.

use crate::appender::TransactionAppender;
use crate::config::Config;
use crate::error::Result;
use crate::fs::{DefaultFileSystem, FileSystem};
use crate::health::HealthRegister;
use crate::log::{
    LogFilesBuilder, LogFileVersionTracker, LogPosition, LogSegmentStore,
    SimpleLogVersionRepository, SimpleTransactionIdStore, StoreId,
};
use crate::recovery::{self, RecoveryOutcome};
use crate::storage::{
    ApplicationMode, Command, CommandBatch, InMemoryIndexes, SnapshotFile, SnapshotStore,
    StorageEngine,
};
use crate::tx::{BincodeCodec, CommandCodec, Committed, TransactionRepresentation};
use log::info;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckpointOutcome {
    pub tx_id: u64,
    pub pruned: Vec<u64>,
}

pub struct GraphKernel {
    config: Config,
    health: Arc<HealthRegister>,
    log: Arc<LogSegmentStore>,
    appender: TransactionAppender,
    engine: StorageEngine,
    indexes: Arc<InMemoryIndexes>,
    snapshots: Mutex<SnapshotFile>,
    codec: Arc<dyn CommandCodec>,
    recovery: RecoveryOutcome,
}

/// Optional collaborators for [`GraphKernel::open_with`].
#[derive(Default)]
pub struct KernelParts {
    pub file_system: Option<Arc<dyn FileSystem>>,
    pub codec: Option<Arc<dyn CommandCodec>>,
    pub version_tracker: Option<Arc<dyn LogFileVersionTracker>>,
}

impl GraphKernel {
    pub fn open(config: Config) -> Result<Self> {
        Self::open_with(config, KernelParts::default())
    }

    /// Loads the last checkpoint, replays the log into it and starts accepting commits.
    pub fn open_with(config: Config, parts: KernelParts) -> Result<Self> {
        let fs = parts
            .file_system
            .unwrap_or_else(|| Arc::new(DefaultFileSystem));
        let codec = parts.codec.unwrap_or_else(|| Arc::new(BincodeCodec));
        let health = HealthRegister::shared();

        let snapshots = SnapshotFile::new(&config, fs.clone());
        let stores = snapshots.load()?.unwrap_or_default();

        let tail = {
            let files = LogFilesBuilder::log_files_based_only(config.log_dir(), fs.clone()).build()?;
            recovery::scan_tail(&files)?
        };
        let mut last_committed = tail.last_committed;
        if stores.applied.highest() > last_committed.tx_id {
            last_committed = Committed {
                tx_id: stores.applied.highest(),
                position: LogPosition::START,
            };
        }
        let store_id = tail.store_id.unwrap_or_else(StoreId::generate);

        let mut builder = LogFilesBuilder::builder(config.log_dir(), fs)
            .with_rotation_threshold(config.rotation_threshold)
            .with_transaction_id_store(Arc::new(SimpleTransactionIdStore::with_last_committed(
                last_committed.tx_id,
                last_committed.position,
            )))
            .with_log_version_repository(Arc::new(SimpleLogVersionRepository::new(
                tail.highest_version.unwrap_or(0),
            )))
            .with_health(health.clone())
            .with_store_id(store_id);
        if let Some(tracker) = parts.version_tracker {
            builder = builder.with_version_tracker(tracker);
        }
        let log = Arc::new(builder.build()?);

        let indexes = Arc::new(InMemoryIndexes::rebuild(&stores));
        let engine = StorageEngine::new(
            stores,
            indexes.clone(),
            health.clone(),
            config.parallel_index_apply,
        );
        let recovery = recovery::recover(&log, codec.as_ref(), &engine)?;
        let appender = TransactionAppender::new(log.clone(), codec.clone())?;

        info!(
            "opened {} at transaction {} (store {})",
            config.data_dir.display(),
            appender.last_committed().tx_id,
            store_id
        );
        Ok(GraphKernel {
            config,
            health,
            log,
            appender,
            engine,
            indexes,
            snapshots: Mutex::new(snapshots),
            codec,
            recovery,
        })
    }

    /// Validates the transaction against the stores, appends it durably, then applies it.
    ///
    /// Validation sees the stores as of the call; transactions touching the same
    /// entities or counts must not be committed concurrently.
    pub fn commit(&self, commands: Vec<Command>) -> Result<Committed> {
        self.engine.validate(&commands)?;
        let transaction = TransactionRepresentation::new(commands);
        let committed = self.appender.append(&transaction)?;
        let batch = CommandBatch::new(committed.tx_id, transaction.commands);
        self.engine.apply(&batch, ApplicationMode::Internal)?;
        Ok(committed)
    }

    /// Persists the stores and deletes every segment holding only checkpointed entries.
    pub fn checkpoint(&self) -> Result<CheckpointOutcome> {
        let tx_id = self.engine.checkpoint(&mut *self.snapshots.lock())?;

        // segment v holds entries with ids above header(v) and up to header(v + 1)
        let mut keep_from = None;
        for version in self.log.versions() {
            if self.log.open_for_version(version)?.header.last_committed_tx_id <= tx_id {
                keep_from = Some(version);
            }
        }
        let pruned = match keep_from {
            Some(version) => self.log.prune_below(version)?,
            None => Vec::new(),
        };
        info!(
            "checkpoint at transaction {} pruned {} segments",
            tx_id,
            pruned.len()
        );
        Ok(CheckpointOutcome { tx_id, pruned })
    }

    pub fn rotate(&self) -> Result<LogPosition> {
        self.log.rotate()
    }

    pub fn health(&self) -> &Arc<HealthRegister> {
        &self.health
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn log(&self) -> &Arc<LogSegmentStore> {
        &self.log
    }

    pub fn engine(&self) -> &StorageEngine {
        &self.engine
    }

    pub fn indexes(&self) -> &Arc<InMemoryIndexes> {
        &self.indexes
    }

    pub fn codec(&self) -> &Arc<dyn CommandCodec> {
        &self.codec
    }

    pub fn last_committed(&self) -> Committed {
        self.appender.last_committed()
    }

    pub fn recovery_outcome(&self) -> RecoveryOutcome {
        self.recovery
    }
}
