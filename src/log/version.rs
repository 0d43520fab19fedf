//! Sources of the transaction id sequence and the current log version, and the
//! retention callback notified as segments complete or get deleted.

use crate::log::LogPosition;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Id of the implicit "empty store" transaction. The first real commit gets `BASE_TX_ID + 1`.
pub const BASE_TX_ID: u64 = 1;

pub trait TransactionIdStore: Send + Sync {
    fn last_committed_transaction_id(&self) -> u64;

    fn last_committed_position(&self) -> LogPosition;

    /// Called by the appender once `tx_id` is durable, in id order.
    fn transaction_committed(&self, tx_id: u64, position: LogPosition);
}

#[derive(Debug)]
pub struct SimpleTransactionIdStore {
    committed: Mutex<(u64, LogPosition)>,
}

impl SimpleTransactionIdStore {
    pub fn new() -> Self {
        Self::with_last_committed(BASE_TX_ID, LogPosition::START)
    }

    pub fn with_last_committed(tx_id: u64, position: LogPosition) -> Self {
        SimpleTransactionIdStore {
            committed: Mutex::new((tx_id, position)),
        }
    }
}

impl Default for SimpleTransactionIdStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionIdStore for SimpleTransactionIdStore {
    fn last_committed_transaction_id(&self) -> u64 {
        self.committed.lock().0
    }

    fn last_committed_position(&self) -> LogPosition {
        self.committed.lock().1
    }

    fn transaction_committed(&self, tx_id: u64, position: LogPosition) {
        let mut committed = self.committed.lock();
        if tx_id > committed.0 {
            *committed = (tx_id, position);
        }
    }
}

pub trait LogVersionRepository: Send + Sync {
    fn current_log_version(&self) -> u64;

    fn set_current_log_version(&self, version: u64);
}

#[derive(Debug, Default)]
pub struct SimpleLogVersionRepository {
    version: AtomicU64,
}

impl SimpleLogVersionRepository {
    pub fn new(initial: u64) -> Self {
        SimpleLogVersionRepository {
            version: AtomicU64::new(initial),
        }
    }
}

impl LogVersionRepository for SimpleLogVersionRepository {
    fn current_log_version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    fn set_current_log_version(&self, version: u64) {
        self.version.store(version, Ordering::Release);
    }
}

/// Retention callback, typically backed by checkpoint or backup bookkeeping.
pub trait LogFileVersionTracker: Send + Sync {
    fn log_deleted(&self, version: u64);

    fn log_completed(&self, position: LogPosition);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopVersionTracker;

impl LogFileVersionTracker for NoopVersionTracker {
    fn log_deleted(&self, _version: u64) {}

    fn log_completed(&self, _position: LogPosition) {}
}
