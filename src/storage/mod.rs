//! Record stores and the pipeline that applies committed transactions to them.

pub mod applier;
pub mod command;
pub mod engine;
pub mod index;
pub mod locks;
pub mod snapshot;
pub mod stores;

pub use applier::{
    ApplicationMode, ApplierRegistry, BuiltinApplier, ExternalApplierFactory, TransactionApplier,
};
pub use command::{Command, CommandBatch, CommandKind};
pub use engine::{ApplyOutcome, StorageEngine};
pub use index::{IndexUpdate, IndexUpdateListener, IndexUpdatesWorkSync, InMemoryIndexes};
pub use locks::{EntityLockService, LockGroup, LockKey, LockService};
pub use snapshot::{SnapshotFile, SnapshotStore};
pub use stores::{AppliedSequence, GraphStores};
