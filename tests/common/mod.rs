//! File system wrapper that fails `force` on demand.

#![allow(dead_code)]

use graph_kernel::error::{Error, Result};
use graph_kernel::fs::{DefaultFileSystem, FileSystem, StoreChannel};
use graph_kernel::log::{
    LogFilesBuilder, LogSegmentStore, SimpleLogVersionRepository, SimpleTransactionIdStore,
};
use parking_lot::Mutex;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Io,
    OutOfMemory,
}

impl Fault {
    fn to_error(self) -> Error {
        match self {
            Fault::Io => Error::io(
                "force",
                io::Error::new(io::ErrorKind::Other, "injected device failure"),
            ),
            Fault::OutOfMemory => Error::OutOfMemory("injected allocation failure".to_string()),
        }
    }
}

#[derive(Default)]
pub struct FaultyFileSystem {
    inner: DefaultFileSystem,
    next_force: Arc<Mutex<Option<Fault>>>,
}

impl FaultyFileSystem {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The next `force` on any channel fails with `fault`; later ones succeed.
    pub fn fail_next_force(&self, fault: Fault) {
        *self.next_force.lock() = Some(fault);
    }
}

struct FaultyChannel {
    inner: Box<dyn StoreChannel>,
    next_force: Arc<Mutex<Option<Fault>>>,
}

impl StoreChannel for FaultyChannel {
    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.inner.write_all(buf)
    }

    fn force(&mut self) -> Result<()> {
        if let Some(fault) = self.next_force.lock().take() {
            return Err(fault.to_error());
        }
        self.inner.force()
    }

    fn size(&self) -> Result<u64> {
        self.inner.size()
    }

    fn truncate(&mut self, len: u64) -> Result<()> {
        self.inner.truncate(len)
    }
}

impl FileSystem for FaultyFileSystem {
    fn create_dir_all(&self, path: &Path) -> Result<()> {
        self.inner.create_dir_all(path)
    }

    fn open_channel(&self, path: &Path) -> Result<Box<dyn StoreChannel>> {
        Ok(Box::new(FaultyChannel {
            inner: self.inner.open_channel(path)?,
            next_force: self.next_force.clone(),
        }))
    }

    fn open_reader(&self, path: &Path) -> Result<Box<dyn Read + Send>> {
        self.inner.open_reader(path)
    }

    fn file_size(&self, path: &Path) -> Result<u64> {
        self.inner.file_size(path)
    }

    fn file_exists(&self, path: &Path) -> bool {
        self.inner.file_exists(path)
    }

    fn delete_file(&self, path: &Path) -> Result<()> {
        self.inner.delete_file(path)
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        self.inner.list_dir(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        self.inner.rename(from, to)
    }

    fn sync_dir(&self, path: &Path) -> Result<()> {
        self.inner.sync_dir(path)
    }
}

/// A full log context over `fs` in `dir`, starting from an empty store.
pub fn open_log(dir: &Path, fs: Arc<dyn FileSystem>) -> Arc<LogSegmentStore> {
    Arc::new(
        LogFilesBuilder::builder(dir, fs)
            .with_transaction_id_store(Arc::new(SimpleTransactionIdStore::new()))
            .with_log_version_repository(Arc::new(SimpleLogVersionRepository::new(0)))
            .build()
            .unwrap(),
    )
}

/// Reads every entry of the log in `dir` through a files-only context.
pub fn committed_tx_ids(dir: &Path) -> Vec<u64> {
    let log = LogFilesBuilder::log_files_based_only(dir, Arc::new(DefaultFileSystem))
        .build()
        .unwrap();
    let lowest = log.lowest_version().unwrap_or(0);
    log.entries_from(lowest)
        .map(|entry| entry.map(|e| e.tx_id))
        .collect::<Result<_>>()
        .unwrap()
}
