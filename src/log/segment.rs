use crate::error::{Error, Result};
use crate::fs::{FileSystem, StoreChannel};
use crate::log::entry::{LogEntry, LogEntryCursor};
use crate::log::header::{SegmentHeader, HEADER_SIZE};
use crate::log::LogPosition;
use std::io::Read;
use std::path::{Path, PathBuf};

pub const LOG_FILE_PREFIX: &str = "txlog";

pub fn segment_file_name(version: u64) -> String {
    format!("{}.{}", LOG_FILE_PREFIX, version)
}

/// Parses `txlog.<version>`; anything else in the directory is ignored.
pub fn parse_segment_version(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    let version = name.strip_prefix(LOG_FILE_PREFIX)?.strip_prefix('.')?;
    version.parse().ok()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    pub version: u64,
    pub size: u64,
    pub path: PathBuf,
}

/// The single segment currently receiving writes.
pub(crate) struct ActiveSegment {
    pub(crate) version: u64,
    pub(crate) header: SegmentHeader,
    pub(crate) path: PathBuf,
    pub(crate) channel: Box<dyn StoreChannel>,
}

impl ActiveSegment {
    /// Creates the file, writes and forces its header.
    pub(crate) fn create(fs: &dyn FileSystem, path: PathBuf, header: SegmentHeader) -> Result<Self> {
        let mut channel = fs.open_channel(&path)?;
        if channel.size()? != 0 {
            return Err(Error::Consistency(format!(
                "refusing to overwrite existing segment {}",
                path.display()
            )));
        }
        channel.write_all(&header.encode())?;
        channel.force()?;
        Ok(ActiveSegment {
            version: header.log_version,
            header,
            path,
            channel,
        })
    }

    /// Reopens an existing segment for appending, cutting off any torn tail.
    pub(crate) fn reopen(fs: &dyn FileSystem, path: PathBuf, version: u64) -> Result<Self> {
        let mut reader = SegmentReader::open(fs, &path, version)?;
        let header = reader.header;
        for entry in reader.entries() {
            entry?;
        }
        let valid_end = reader.cursor.current_position().offset;

        let mut channel = fs.open_channel(&path)?;
        let size = channel.size()?;
        if size > valid_end {
            log::warn!(
                "truncating torn tail of {} from {} to {} bytes",
                path.display(),
                size,
                valid_end
            );
            channel.truncate(valid_end)?;
            channel.force()?;
        }
        Ok(ActiveSegment {
            version,
            header,
            path,
            channel,
        })
    }

    pub(crate) fn size(&self) -> Result<u64> {
        self.channel.size()
    }

    pub(crate) fn end_position(&self) -> Result<LogPosition> {
        Ok(LogPosition::new(self.version, self.size()?))
    }

    pub(crate) fn info(&self) -> Result<SegmentInfo> {
        Ok(SegmentInfo {
            version: self.version,
            size: self.size()?,
            path: self.path.clone(),
        })
    }
}

/// Read access to one segment: its header and the entries after it.
pub struct SegmentReader {
    pub header: SegmentHeader,
    cursor: LogEntryCursor<Box<dyn Read + Send>>,
}

impl SegmentReader {
    pub fn open(fs: &dyn FileSystem, path: &Path, version: u64) -> Result<Self> {
        let mut reader = fs.open_reader(path)?;
        let mut buf = [0u8; HEADER_SIZE as usize];
        reader.read_exact(&mut buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::Consistency(format!("segment {} has no complete header", path.display()))
            } else {
                Error::io(format!("read header of {}", path.display()), e)
            }
        })?;
        let header = SegmentHeader::decode(&buf)?;
        if header.log_version != version {
            return Err(Error::Consistency(format!(
                "segment {} claims version {} in its header",
                path.display(),
                header.log_version
            )));
        }
        Ok(SegmentReader {
            header,
            cursor: LogEntryCursor::new(reader, version, HEADER_SIZE),
        })
    }

    pub fn entries(&mut self) -> &mut LogEntryCursor<Box<dyn Read + Send>> {
        &mut self.cursor
    }

    pub fn into_entries(self) -> LogEntryCursor<Box<dyn Read + Send>> {
        self.cursor
    }

    pub fn read_all(mut self) -> Result<Vec<LogEntry>> {
        self.entries().collect()
    }
}
