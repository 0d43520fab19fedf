use crate::config::Config;
use crate::error::{Error, Result};
use crate::fs::FileSystem;
use crate::storage::stores::GraphStores;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

const DIGEST_LEN: usize = 32;

/// Persistence of the record stores between checkpoints.
///
/// Implementations must write snapshots atomically: after a crash either the previous
/// or the new snapshot is loaded, never a mix.
pub trait SnapshotStore: Send {
    /// Returns `None` if no snapshot exists yet.
    fn load(&self) -> Result<Option<GraphStores>>;

    fn persist(&mut self, stores: &GraphStores) -> Result<()>;
}

/// Single-file snapshot: `[bincode GraphStores][sha256 of the preceding bytes]`.
///
/// Files:
/// - `stores.bin`: the current snapshot
/// - `stores.bin.tmp`: scratch file for atomic replacement
pub struct SnapshotFile {
    fs: Arc<dyn FileSystem>,
    path: PathBuf,
    tmp_path: PathBuf,
}

impl SnapshotFile {
    pub fn new(config: &Config, fs: Arc<dyn FileSystem>) -> Self {
        Self::with_path(config.store_path(), fs)
    }

    pub fn with_path(path: PathBuf, fs: Arc<dyn FileSystem>) -> Self {
        let tmp_path = path.with_extension("bin.tmp");
        SnapshotFile { fs, path, tmp_path }
    }
}

impl SnapshotStore for SnapshotFile {
    fn load(&self) -> Result<Option<GraphStores>> {
        if !self.fs.file_exists(&self.path) {
            return Ok(None);
        }

        let mut data = Vec::new();
        self.fs
            .open_reader(&self.path)?
            .read_to_end(&mut data)
            .map_err(|e| Error::io(format!("read {}", self.path.display()), e))?;

        if data.len() < DIGEST_LEN {
            return Err(Error::Consistency(format!(
                "store snapshot {} is truncated",
                self.path.display()
            )));
        }
        let (body, digest) = data.split_at(data.len() - DIGEST_LEN);
        if crate::sha256_digest(body) != digest {
            return Err(Error::Consistency(format!(
                "store snapshot {} fails its checksum",
                self.path.display()
            )));
        }

        let stores: GraphStores = bincode::deserialize(body)?;
        stores.verify()?;
        Ok(Some(stores))
    }

    fn persist(&mut self, stores: &GraphStores) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            self.fs.create_dir_all(parent)?;
        }
        let body = bincode::serialize(stores)?;
        let digest = crate::sha256_digest(&body);

        self.fs.delete_file(&self.tmp_path)?;
        {
            let mut channel = self.fs.open_channel(&self.tmp_path)?;
            channel.write_all(&body)?;
            channel.write_all(&digest)?;
            channel.force()?;
        }
        self.fs.rename(&self.tmp_path, &self.path)?;
        if let Some(parent) = self.path.parent() {
            self.fs.sync_dir(parent)?;
        }

        log::debug!(
            "checkpointed stores at tx {} to {}",
            stores.last_applied_tx_id(),
            self.path.display()
        );
        Ok(())
    }
}
