//! Recovery: bring the stores up to the end of the log after a restart.
//!
//! The stores are loaded from their last checkpoint, then every retained log entry is
//! replayed in [`ApplicationMode::Recovery`]. Entries the checkpoint already holds are
//! skipped by the apply pipeline, so replaying the whole retained log is always safe.

use crate::error::Result;
use crate::log::{LogPosition, LogSegmentStore, StoreId, BASE_TX_ID};
use crate::storage::{ApplicationMode, ApplyOutcome, CommandBatch, StorageEngine};
use crate::tx::{CommandCodec, Committed};
use log::info;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RecoveryOutcome {
    pub replayed: u64,
    pub skipped: u64,
    pub last_tx_id: u64,
    pub last_position: LogPosition,
}

/// What the retained log says about the last commit, read without modifying anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogTail {
    pub last_committed: Committed,
    pub store_id: Option<StoreId>,
    pub highest_version: Option<u64>,
}

/// Scans every retained segment for the last committed transaction.
///
/// With no entries, the id recorded in the highest segment's header is used.
pub fn scan_tail(log: &LogSegmentStore) -> Result<LogTail> {
    let highest_version = log.highest_version();
    let mut last_committed = Committed {
        tx_id: BASE_TX_ID,
        position: LogPosition::START,
    };
    let mut store_id = None;

    if let Some(version) = highest_version {
        let header = log.open_for_version(version)?.header;
        store_id = Some(header.store_id);
        last_committed.tx_id = last_committed.tx_id.max(header.last_committed_tx_id);
    }
    if let Some(lowest) = log.lowest_version() {
        for entry in log.entries_from(lowest) {
            let entry = entry?;
            if entry.tx_id >= last_committed.tx_id {
                last_committed = Committed {
                    tx_id: entry.tx_id,
                    position: entry.position,
                };
            }
        }
    }

    Ok(LogTail {
        last_committed,
        store_id,
        highest_version,
    })
}

/// Replays every retained entry into `engine`.
pub fn recover(
    log: &LogSegmentStore,
    codec: &dyn CommandCodec,
    engine: &StorageEngine,
) -> Result<RecoveryOutcome> {
    let mut outcome = RecoveryOutcome {
        replayed: 0,
        skipped: 0,
        last_tx_id: engine.last_applied_tx_id(),
        last_position: LogPosition::START,
    };
    let Some(lowest) = log.lowest_version() else {
        return Ok(outcome);
    };

    info!(
        "recovering from log version {} with stores at transaction {}",
        lowest, outcome.last_tx_id
    );
    for entry in log.entries_from(lowest) {
        let entry = entry?;
        let batch = CommandBatch::new(entry.tx_id, codec.decode(&entry.payload)?);
        match engine.apply(&batch, ApplicationMode::Recovery)? {
            ApplyOutcome::Applied => outcome.replayed += 1,
            ApplyOutcome::AlreadyApplied => outcome.skipped += 1,
        }
        outcome.last_tx_id = outcome.last_tx_id.max(entry.tx_id);
        outcome.last_position = entry.position;
    }

    info!(
        "recovery complete: {} replayed, {} skipped, last transaction {}",
        outcome.replayed, outcome.skipped, outcome.last_tx_id
    );
    Ok(outcome)
}
