//! Transaction entry framing inside a segment.
//!
//! ```text
//! [payload len: u32][crc32: u32][kind: u8][tx id: u64][timestamp: u64][payload]
//! ```
//! The checksum covers everything after itself.

use crate::error::{Error, Result};
use crate::log::header::read_u64;
use crate::log::LogPosition;
use log::warn;
use std::io::{self, Read};

pub const ENTRY_KIND_TRANSACTION: u8 = 1;
pub const ENTRY_OVERHEAD: u64 = 4 + 4 + 1 + 8 + 8;

/// One committed transaction as read back from the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub tx_id: u64,
    pub timestamp: u64,
    pub position: LogPosition,
    pub payload: Vec<u8>,
}

impl LogEntry {
    pub fn encoded_len(&self) -> u64 {
        ENTRY_OVERHEAD + self.payload.len() as u64
    }
}

pub fn encoded_len(payload_len: usize) -> u64 {
    ENTRY_OVERHEAD + payload_len as u64
}

/// Appends one framed entry to `buf`.
///
/// Growth of `buf` is fallible: an allocation failure surfaces as `Error::OutOfMemory`
/// instead of aborting the process.
pub fn encode_entry(buf: &mut Vec<u8>, tx_id: u64, timestamp: u64, payload: &[u8]) -> Result<()> {
    let len = u32::try_from(payload.len()).map_err(|_| {
        Error::InvalidOperation(format!("transaction of {} bytes is too large", payload.len()))
    })?;
    buf.try_reserve(encoded_len(payload.len()) as usize)?;

    let start = buf.len();
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(&[0u8; 4]);
    buf.push(ENTRY_KIND_TRANSACTION);
    buf.extend_from_slice(&tx_id.to_le_bytes());
    buf.extend_from_slice(&timestamp.to_le_bytes());
    buf.extend_from_slice(payload);

    let crc = crc32fast::hash(&buf[start + 8..]);
    buf[start + 4..start + 8].copy_from_slice(&crc.to_le_bytes());
    Ok(())
}

/// Iterates the entries of one segment, starting right after its header.
///
/// A frame cut short by end-of-file is a torn tail from an interrupted write and ends
/// iteration; [`LogEntryCursor::torn_tail`] reports whether that happened.
pub struct LogEntryCursor<R: Read> {
    reader: R,
    version: u64,
    offset: u64,
    torn_tail: bool,
    done: bool,
}

impl<R: Read> LogEntryCursor<R> {
    pub fn new(reader: R, version: u64, offset: u64) -> Self {
        LogEntryCursor {
            reader,
            version,
            offset,
            torn_tail: false,
            done: false,
        }
    }

    /// Offset just past the last complete entry read so far.
    pub fn current_position(&self) -> LogPosition {
        LogPosition::new(self.version, self.offset)
    }

    pub fn torn_tail(&self) -> bool {
        self.torn_tail
    }

    fn read_entry(&mut self) -> Result<Option<LogEntry>> {
        let mut prefix = [0u8; 8];
        let read = read_fully(&mut self.reader, &mut prefix)
            .map_err(|e| Error::io("read log entry", e))?;
        if read == 0 {
            return Ok(None);
        }
        if read < prefix.len() {
            return Ok(self.mark_torn());
        }
        let len = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
        let stored_crc = u32::from_le_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]);

        let mut body = Vec::new();
        body.try_reserve(len + 17)?;
        body.resize(len + 17, 0);
        let read = read_fully(&mut self.reader, &mut body)
            .map_err(|e| Error::io("read log entry", e))?;
        if read < body.len() {
            return Ok(self.mark_torn());
        }
        if crc32fast::hash(&body) != stored_crc {
            return Err(Error::Consistency(format!(
                "entry checksum mismatch at {}",
                self.current_position()
            )));
        }
        if body[0] != ENTRY_KIND_TRANSACTION {
            return Err(Error::Consistency(format!(
                "unknown entry kind {} at {}",
                body[0],
                self.current_position()
            )));
        }

        let position = self.current_position();
        let tx_id = read_u64(&body[1..9]);
        let timestamp = read_u64(&body[9..17]);
        body.drain(..17);
        self.offset += encoded_len(len);
        Ok(Some(LogEntry {
            tx_id,
            timestamp,
            position,
            payload: body,
        }))
    }

    fn mark_torn(&mut self) -> Option<LogEntry> {
        warn!("torn entry at end of log segment, stopping at {}", self.current_position());
        self.torn_tail = true;
        None
    }
}

impl<R: Read> Iterator for LogEntryCursor<R> {
    type Item = Result<LogEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn frames(entries: &[(u64, &[u8])]) -> Vec<u8> {
        let mut buf = Vec::new();
        for (tx_id, payload) in entries {
            encode_entry(&mut buf, *tx_id, 1000 + tx_id, payload).unwrap();
        }
        buf
    }

    #[test]
    fn reads_entries_with_positions() {
        let buf = frames(&[(2, b"first"), (3, b"second!")]);
        let entries: Vec<_> = LogEntryCursor::new(Cursor::new(buf), 4, 64)
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].tx_id, 2);
        assert_eq!(entries[0].position, LogPosition::new(4, 64));
        assert_eq!(entries[1].position, LogPosition::new(4, 64 + encoded_len(5)));
        assert_eq!(entries[1].payload, b"second!".to_vec());
        assert_eq!(entries[1].timestamp, 1003);
    }

    #[test]
    fn torn_tail_ends_iteration() {
        let mut buf = frames(&[(2, b"complete"), (3, b"partial entry")]);
        buf.truncate(buf.len() - 3);
        let mut cursor = LogEntryCursor::new(Cursor::new(buf), 0, 64);
        assert_eq!(cursor.next().unwrap().unwrap().tx_id, 2);
        assert!(cursor.next().is_none());
        assert!(cursor.torn_tail());
        assert_eq!(cursor.current_position(), LogPosition::new(0, 64 + encoded_len(8)));
    }

    #[test]
    fn corrupted_payload_is_a_consistency_violation() {
        let mut buf = frames(&[(2, b"payload")]);
        let last = buf.len() - 1;
        buf[last] ^= 0xff;
        let result = LogEntryCursor::new(Cursor::new(buf), 0, 64).next().unwrap();
        assert!(matches!(result, Err(Error::Consistency(_))));
    }
}
