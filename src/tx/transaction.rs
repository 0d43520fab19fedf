use crate::log::LogPosition;
use crate::storage::command::Command;
use serde::{Deserialize, Serialize};

/// A transaction as handed to the appender: its commands and commit time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRepresentation {
    pub commands: Vec<Command>,
    #[serde(default)]
    pub timestamp: u64,
}

impl TransactionRepresentation {
    pub fn new(commands: Vec<Command>) -> Self {
        TransactionRepresentation {
            commands,
            timestamp: crate::current_timestamp_millis(),
        }
    }
}

/// Result of a durable append: the assigned id and where the entry starts in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Committed {
    pub tx_id: u64,
    pub position: LogPosition,
}
