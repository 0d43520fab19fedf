pub mod appender;
pub mod config;
pub mod error;
pub mod fs;
pub mod health;
pub mod kernel;
pub mod log;
pub mod logger;
pub mod recovery;
pub mod storage;
pub mod tx;
pub mod work_sync;

use sha2::{Digest, Sha256};

/// Get current Unix timestamp in milliseconds
pub fn current_timestamp_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Calculate SHA256 digest
pub fn sha256_digest(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}
