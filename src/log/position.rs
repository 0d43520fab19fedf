use serde::{Deserialize, Serialize};
use std::fmt;

/// A durability point in the transaction log: segment version plus byte offset.
///
/// Ordered by version first, then offset, which matches physical write order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct LogPosition {
    pub version: u64,
    pub offset: u64,
}

impl LogPosition {
    pub const START: LogPosition = LogPosition {
        version: 0,
        offset: 0,
    };

    pub fn new(version: u64, offset: u64) -> Self {
        LogPosition { version, offset }
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LogPosition{{version={}, offset={}}}", self.version, self.offset)
    }
}
