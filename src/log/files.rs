use crate::error::{Error, Result};
use crate::log::context::{ContextMode, LogFilesContext};
use crate::log::entry::{LogEntry, LogEntryCursor};
use crate::log::header::{SegmentHeader, HEADER_SIZE};
use crate::log::segment::{
    parse_segment_version, segment_file_name, ActiveSegment, SegmentInfo, SegmentReader,
};
use crate::log::LogPosition;
use log::{debug, info};
use parking_lot::{Mutex, MutexGuard};
use std::collections::BTreeSet;
use std::io::Read;
use std::path::PathBuf;

/// Ordered set of append-only segment files with exactly one active (highest) segment.
///
/// All writes and rotations happen under one mutex, so an append round always lands
/// entirely in one segment.
pub struct LogSegmentStore {
    context: LogFilesContext,
    state: Mutex<SegmentState>,
}

struct SegmentState {
    versions: BTreeSet<u64>,
    active: Option<ActiveSegment>,
}

impl LogSegmentStore {
    pub fn open(context: LogFilesContext) -> Result<Self> {
        let fs = context.file_system().clone();
        let dir = context.log_dir().to_path_buf();

        let mut versions = BTreeSet::new();
        if fs.file_exists(&dir) {
            for path in fs.list_dir(&dir)? {
                if let Some(version) = parse_segment_version(&path) {
                    versions.insert(version);
                }
            }
        }

        let active = match context.mode() {
            ContextMode::FilesOnly => None,
            ContextMode::Full => {
                fs.create_dir_all(&dir)?;
                let repository = context.log_version_repository()?;
                let active = match versions.iter().next_back().copied() {
                    Some(highest) => {
                        let path = dir.join(segment_file_name(highest));
                        let segment = ActiveSegment::reopen(fs.as_ref(), path, highest)?;
                        let store_id = context.store_id();
                        if !store_id.is_unknown()
                            && !segment.header.store_id.is_unknown()
                            && segment.header.store_id != store_id
                        {
                            return Err(Error::Consistency(format!(
                                "log segment {} belongs to store {}, expected {}",
                                highest, segment.header.store_id, store_id
                            )));
                        }
                        if repository.current_log_version() < highest {
                            repository.set_current_log_version(highest);
                        }
                        segment
                    }
                    None => {
                        let version = repository.current_log_version();
                        let header = SegmentHeader::new(
                            version,
                            LogPosition::START,
                            context.last_committed_transaction_id()?,
                            context.store_id(),
                        );
                        let segment = ActiveSegment::create(
                            fs.as_ref(),
                            dir.join(segment_file_name(version)),
                            header,
                        )?;
                        fs.sync_dir(&dir)?;
                        versions.insert(version);
                        info!("created first log segment {} in {}", version, dir.display());
                        segment
                    }
                };
                Some(active)
            }
        };

        Ok(LogSegmentStore {
            context,
            state: Mutex::new(SegmentState { versions, active }),
        })
    }

    pub fn context(&self) -> &LogFilesContext {
        &self.context
    }

    pub fn segment_path(&self, version: u64) -> PathBuf {
        self.context.log_dir().join(segment_file_name(version))
    }

    /// Describes the active segment; in a files-only context, the highest one on disk.
    pub fn active_segment(&self) -> Result<SegmentInfo> {
        let state = self.state.lock();
        match &state.active {
            Some(active) => active.info(),
            None => {
                let version = state.versions.iter().next_back().copied().ok_or_else(|| {
                    Error::InvalidOperation("no log segments present".to_string())
                })?;
                let path = self.segment_path(version);
                Ok(SegmentInfo {
                    version,
                    size: self.context.file_system().file_size(&path)?,
                    path,
                })
            }
        }
    }

    pub fn lowest_version(&self) -> Option<u64> {
        self.state.lock().versions.iter().next().copied()
    }

    pub fn highest_version(&self) -> Option<u64> {
        self.state.lock().versions.iter().next_back().copied()
    }

    pub fn versions(&self) -> Vec<u64> {
        self.state.lock().versions.iter().copied().collect()
    }

    /// Exclusive handle on the active segment. Only one exists at a time.
    pub fn lock_active(&self) -> Result<ActiveSegmentGuard<'_>> {
        let state = self.state.lock();
        if state.active.is_none() {
            return Err(Error::Unsupported(
                "appending requires a full log context".to_string(),
            ));
        }
        Ok(ActiveSegmentGuard { store: self, state })
    }

    /// Closes the active segment and starts the next version. Returns the closing position.
    pub fn rotate(&self) -> Result<LogPosition> {
        self.lock_active()?.rotate()
    }

    pub fn open_for_version(&self, version: u64) -> Result<SegmentReader> {
        if !self.state.lock().versions.contains(&version) {
            return Err(Error::InvalidOperation(format!(
                "log segment {} does not exist",
                version
            )));
        }
        SegmentReader::open(
            self.context.file_system().as_ref(),
            &self.segment_path(version),
            version,
        )
    }

    /// Deletes one obsolete segment. The active (highest) segment can never be deleted.
    pub fn delete(&self, version: u64) -> Result<()> {
        let mut state = self.state.lock();
        self.delete_locked(&mut state, version)
    }

    /// Deletes every retained segment with a version below `version`, lowest first.
    pub fn prune_below(&self, version: u64) -> Result<Vec<u64>> {
        let mut state = self.state.lock();
        self.prune_locked(&mut state, version)
    }

    /// Retention-driven rotation: obsolete segments below `keep_from` are deleted first,
    /// then the active segment is completed and superseded.
    pub fn rotate_and_prune(&self, keep_from: u64) -> Result<LogPosition> {
        let mut guard = self.lock_active()?;
        let deleted = self.prune_locked(&mut guard.state, keep_from)?;
        debug!("pruned {:?} before rotation", deleted);
        guard.rotate()
    }

    /// All entries from `version` (inclusive) through the active segment, in log order.
    pub fn entries_from(&self, version: u64) -> LogEntries<'_> {
        let pending = self
            .versions()
            .into_iter()
            .filter(|v| *v >= version)
            .collect::<Vec<_>>()
            .into_iter();
        LogEntries {
            store: self,
            pending,
            current: None,
        }
    }

    fn prune_locked(&self, state: &mut SegmentState, version: u64) -> Result<Vec<u64>> {
        let obsolete: Vec<u64> = state.versions.range(..version).copied().collect();
        for v in &obsolete {
            self.delete_locked(state, *v)?;
        }
        Ok(obsolete)
    }

    fn delete_locked(&self, state: &mut SegmentState, version: u64) -> Result<()> {
        if !state.versions.contains(&version) {
            return Err(Error::InvalidOperation(format!(
                "log segment {} does not exist",
                version
            )));
        }
        if state.versions.iter().next_back() == Some(&version) {
            return Err(Error::InvalidOperation(format!(
                "log segment {} is the active segment",
                version
            )));
        }
        let fs = self.context.file_system();
        fs.delete_file(&self.segment_path(version))?;
        fs.sync_dir(self.context.log_dir())?;
        state.versions.remove(&version);
        self.context.version_tracker().log_deleted(version);
        info!("deleted log segment {}", version);
        Ok(())
    }
}

/// Exclusive access to the active segment for one append round or one rotation.
pub struct ActiveSegmentGuard<'a> {
    store: &'a LogSegmentStore,
    state: MutexGuard<'a, SegmentState>,
}

impl<'a> ActiveSegmentGuard<'a> {
    fn active(&self) -> Result<&ActiveSegment> {
        self.state
            .active
            .as_ref()
            .ok_or_else(|| Error::Unsupported("no active log segment".to_string()))
    }

    fn active_mut(&mut self) -> Result<&mut ActiveSegment> {
        self.state
            .active
            .as_mut()
            .ok_or_else(|| Error::Unsupported("no active log segment".to_string()))
    }

    pub fn version(&self) -> Result<u64> {
        Ok(self.active()?.version)
    }

    pub fn header(&self) -> Result<SegmentHeader> {
        Ok(self.active()?.header)
    }

    /// Position the next written byte will occupy.
    pub fn position(&self) -> Result<LogPosition> {
        self.active()?.end_position()
    }

    /// True if `pending` more bytes would push a non-empty segment past the threshold.
    pub fn rotation_needed(&self, pending: u64) -> Result<bool> {
        let size = self.active()?.size()?;
        let threshold = self.store.context.rotation_threshold();
        Ok(size > HEADER_SIZE && size.saturating_add(pending) > threshold)
    }

    pub fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.active_mut()?.channel.write_all(buf)
    }

    pub fn force(&mut self) -> Result<()> {
        self.active_mut()?.channel.force()
    }

    pub fn truncate(&mut self, len: u64) -> Result<()> {
        self.active_mut()?.channel.truncate(len)
    }

    pub fn rotate(&mut self) -> Result<LogPosition> {
        let store = self.store;
        let context = &store.context;
        let closing = {
            let active = self.active_mut()?;
            active.channel.force()?;
            active.end_position()?
        };
        let next_version = closing.version + 1;
        let header = SegmentHeader::new(
            next_version,
            closing,
            context.last_committed_transaction_id()?,
            context.store_id(),
        );
        let fs = context.file_system();
        let segment = ActiveSegment::create(
            fs.as_ref(),
            store.segment_path(next_version),
            header,
        )?;
        fs.sync_dir(context.log_dir())?;
        context
            .log_version_repository()?
            .set_current_log_version(next_version);

        self.state.versions.insert(next_version);
        self.state.active = Some(segment);
        context.version_tracker().log_completed(closing);
        info!(
            "rotated transaction log: closed {} and started version {}",
            closing, next_version
        );
        Ok(closing)
    }
}

/// Iterator over entries spanning several segments.
pub struct LogEntries<'a> {
    store: &'a LogSegmentStore,
    pending: std::vec::IntoIter<u64>,
    current: Option<LogEntryCursor<Box<dyn Read + Send>>>,
}

impl<'a> Iterator for LogEntries<'a> {
    type Item = Result<LogEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(cursor) = self.current.as_mut() {
                match cursor.next() {
                    Some(item) => return Some(item),
                    None => self.current = None,
                }
            }
            let version = self.pending.next()?;
            match self.store.open_for_version(version) {
                Ok(reader) => self.current = Some(reader.into_entries()),
                Err(e) => {
                    self.pending = Vec::new().into_iter();
                    return Some(Err(e));
                }
            }
        }
    }
}
