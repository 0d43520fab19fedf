//! Fixed 64-byte segment header.
//!
//! ```text
//! 0..4    magic "GKLG"
//! 4       format version
//! 5..8    reserved
//! 8..16   log version
//! 16..24  predecessor closing position: version
//! 24..32  predecessor closing position: offset
//! 32..40  last committed transaction id when the segment was created
//! 40..56  store id
//! 56..60  reserved
//! 60..64  crc32 of bytes 0..60
//! ```

use crate::error::{Error, Result};
use crate::log::LogPosition;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const HEADER_SIZE: u64 = 64;
pub const HEADER_MAGIC: [u8; 4] = *b"GKLG";
pub const CURRENT_FORMAT_VERSION: u8 = 1;

/// Identity of the store a log belongs to. Segments from another store are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct StoreId {
    pub creation_time: u64,
    pub random: u64,
}

impl StoreId {
    pub const UNKNOWN: StoreId = StoreId {
        creation_time: 0,
        random: 0,
    };

    pub fn generate() -> Self {
        StoreId {
            creation_time: crate::current_timestamp_millis(),
            random: rand::random(),
        }
    }

    pub fn is_unknown(&self) -> bool {
        *self == StoreId::UNKNOWN
    }

    pub fn to_bytes(&self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&self.creation_time.to_le_bytes());
        bytes[8..].copy_from_slice(&self.random.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8; 16]) -> Self {
        StoreId {
            creation_time: read_u64(&bytes[..8]),
            random: read_u64(&bytes[8..]),
        }
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.to_bytes()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentHeader {
    pub format_version: u8,
    pub log_version: u64,
    pub previous_close: LogPosition,
    pub last_committed_tx_id: u64,
    pub store_id: StoreId,
}

impl SegmentHeader {
    pub fn new(
        log_version: u64,
        previous_close: LogPosition,
        last_committed_tx_id: u64,
        store_id: StoreId,
    ) -> Self {
        SegmentHeader {
            format_version: CURRENT_FORMAT_VERSION,
            log_version,
            previous_close,
            last_committed_tx_id,
            store_id,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE as usize] {
        let mut buf = [0u8; HEADER_SIZE as usize];
        buf[0..4].copy_from_slice(&HEADER_MAGIC);
        buf[4] = self.format_version;
        buf[8..16].copy_from_slice(&self.log_version.to_le_bytes());
        buf[16..24].copy_from_slice(&self.previous_close.version.to_le_bytes());
        buf[24..32].copy_from_slice(&self.previous_close.offset.to_le_bytes());
        buf[32..40].copy_from_slice(&self.last_committed_tx_id.to_le_bytes());
        buf[40..56].copy_from_slice(&self.store_id.to_bytes());
        let crc = crc32fast::hash(&buf[0..60]);
        buf[60..64].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE as usize {
            return Err(Error::Consistency(format!(
                "segment header truncated: {} of {} bytes",
                buf.len(),
                HEADER_SIZE
            )));
        }
        if buf[0..4] != HEADER_MAGIC {
            return Err(Error::Consistency("not a transaction log segment".to_string()));
        }
        let stored_crc = u32::from_le_bytes([buf[60], buf[61], buf[62], buf[63]]);
        if crc32fast::hash(&buf[0..60]) != stored_crc {
            return Err(Error::Consistency("segment header checksum mismatch".to_string()));
        }
        let format_version = buf[4];
        if format_version != CURRENT_FORMAT_VERSION {
            return Err(Error::Consistency(format!(
                "unsupported segment format version {}",
                format_version
            )));
        }
        let mut store_id = [0u8; 16];
        store_id.copy_from_slice(&buf[40..56]);
        Ok(SegmentHeader {
            format_version,
            log_version: read_u64(&buf[8..16]),
            previous_close: LogPosition::new(read_u64(&buf[16..24]), read_u64(&buf[24..32])),
            last_committed_tx_id: read_u64(&buf[32..40]),
            store_id: StoreId::from_bytes(&store_id),
        })
    }
}

pub(crate) fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}
