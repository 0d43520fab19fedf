//! Segmented, append-only transaction log.

pub mod context;
pub mod entry;
pub mod files;
pub mod header;
pub mod position;
pub mod segment;
pub mod version;

pub use context::{ContextMode, LogFilesBuilder, LogFilesContext};
pub use entry::{LogEntry, LogEntryCursor};
pub use files::{ActiveSegmentGuard, LogEntries, LogSegmentStore};
pub use header::{SegmentHeader, StoreId, HEADER_SIZE};
pub use position::LogPosition;
pub use segment::{SegmentInfo, SegmentReader};
pub use version::{
    LogFileVersionTracker, LogVersionRepository, NoopVersionTracker, SimpleLogVersionRepository,
    SimpleTransactionIdStore, TransactionIdStore, BASE_TX_ID,
};
