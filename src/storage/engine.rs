use crate::error::{Error, Result};
use crate::health::HealthRegister;
use crate::storage::applier::{ApplicationMode, ApplierRegistry};
use crate::storage::command::{Command, CommandBatch};
use crate::storage::index::{IndexUpdateListener, IndexUpdatesWorkSync};
use crate::storage::locks::{EntityLockService, LockGroup, LockService};
use crate::storage::snapshot::SnapshotStore;
use crate::storage::stores::GraphStores;
use crate::tx::validation::validate_commands;
use log::{debug, error, warn};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// The id was applied before; nothing changed.
    AlreadyApplied,
}

/// Applies committed command batches to the stores.
///
/// One `apply` call:
///
/// ```text
/// acquire entity locks (canonical order)
///   -> dispatch commands through the applier chain
///   -> submit derived index updates
///   -> close appliers, wait for the index updates
/// -> release entity locks
/// ```
///
/// Any failure panics health and fails the call with [`Error::Apply`].
///
/// Applies share `apply_gate`; a checkpoint holds it exclusively, so a snapshot never
/// sees a transaction between its first visit and its id being marked applied.
pub struct StorageEngine {
    stores: Mutex<GraphStores>,
    apply_gate: RwLock<()>,
    locks: Arc<dyn LockService>,
    registry: ApplierRegistry,
    indexes: IndexUpdatesWorkSync,
    health: Arc<HealthRegister>,
}

impl StorageEngine {
    pub fn new(
        stores: GraphStores,
        listener: Arc<dyn IndexUpdateListener>,
        health: Arc<HealthRegister>,
        parallel_index_apply: bool,
    ) -> Self {
        StorageEngine {
            stores: Mutex::new(stores),
            apply_gate: RwLock::new(()),
            locks: Arc::new(EntityLockService::new()),
            registry: ApplierRegistry::with_builtins(),
            indexes: IndexUpdatesWorkSync::new(listener, parallel_index_apply),
            health,
        }
    }

    pub fn with_lock_service(mut self, locks: Arc<dyn LockService>) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_registry(mut self, registry: ApplierRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn health(&self) -> &Arc<HealthRegister> {
        &self.health
    }

    pub fn registry(&self) -> &ApplierRegistry {
        &self.registry
    }

    pub fn last_applied_tx_id(&self) -> u64 {
        self.stores.lock().last_applied_tx_id()
    }

    pub fn with_stores<R>(&self, f: impl FnOnce(&GraphStores) -> R) -> R {
        f(&self.stores.lock())
    }

    pub fn allocate_node_id(&self) -> u64 {
        self.stores.lock().allocate_node_id()
    }

    pub fn allocate_relationship_id(&self) -> u64 {
        self.stores.lock().allocate_relationship_id()
    }

    /// Rejects commands the stores would refuse to apply. Health is left untouched.
    pub fn validate(&self, commands: &[Command]) -> Result<()> {
        self.with_stores(|stores| validate_commands(stores, commands))
    }

    pub fn apply(&self, batch: &CommandBatch, mode: ApplicationMode) -> Result<ApplyOutcome> {
        self.health.assert_healthy().map_err(|e| Error::Apply {
            tx_id: batch.tx_id,
            cause: Arc::new(e),
        })?;

        match self.apply_under_locks(batch, mode) {
            Ok(outcome) => Ok(outcome),
            Err(fault) => {
                error!("applying transaction {} failed: {}", batch.tx_id, fault);
                let cause = Arc::new(fault);
                self.health.panic(cause.clone());
                Err(Error::Apply {
                    tx_id: batch.tx_id,
                    cause,
                })
            }
        }
    }

    fn apply_under_locks(&self, batch: &CommandBatch, mode: ApplicationMode) -> Result<ApplyOutcome> {
        let _applying = self.apply_gate.read();
        let locks = LockGroup::acquire(self.locks.as_ref(), batch.lock_keys());

        {
            let stores = self.stores.lock();
            if stores.applied.contains(batch.tx_id) {
                if mode == ApplicationMode::Internal {
                    warn!("transaction {} is already applied", batch.tx_id);
                } else {
                    debug!("skipping already applied transaction {}", batch.tx_id);
                }
                return Ok(ApplyOutcome::AlreadyApplied);
            }
            if mode == ApplicationMode::Recovery && !stores.applied.is_next(batch.tx_id) {
                return Err(Error::Consistency(format!(
                    "recovery reached transaction {} but stores end at {}",
                    batch.tx_id,
                    stores.applied.highest_gapless()
                )));
            }
        }

        let mut chain = self.registry.chain(batch.tx_id, mode)?;
        for command in &batch.commands {
            chain.visit(command, &mut self.stores.lock())?;
        }

        let mut index_batch = self.indexes.new_batch();
        index_batch.extend(chain.take_index_updates());
        let index_applied = index_batch.apply_async()?;

        chain.close(&mut self.stores.lock())?;
        index_applied.await_applied()?;
        self.stores.lock().applied.mark(batch.tx_id);

        locks.release();
        Ok(ApplyOutcome::Applied)
    }

    /// Persists the stores. Returns the id every transaction up to which is included.
    pub fn checkpoint(&self, snapshots: &mut dyn SnapshotStore) -> Result<u64> {
        let stores = {
            let _quiesced = self.apply_gate.write();
            self.stores.lock().clone()
        };
        snapshots.persist(&stores)?;
        Ok(stores.last_applied_tx_id())
    }
}
