//! File-system seam for the log and the stores.
//!
//! Everything that touches disk goes through [`FileSystem`] so tests can swap in a
//! wrapper that fails `force` or `write_all` on demand.

use crate::error::{Error, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Writable handle on one file, positioned at its end.
pub trait StoreChannel: Send {
    fn write_all(&mut self, buf: &[u8]) -> Result<()>;

    /// Durable flush: written bytes survive a crash once this returns.
    fn force(&mut self) -> Result<()>;

    fn size(&self) -> Result<u64>;

    /// Cut the file back to `len` bytes and continue writing from there.
    fn truncate(&mut self, len: u64) -> Result<()>;
}

pub trait FileSystem: Send + Sync {
    fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Open (creating if needed) a file for appending without truncating it.
    fn open_channel(&self, path: &Path) -> Result<Box<dyn StoreChannel>>;

    fn open_reader(&self, path: &Path) -> Result<Box<dyn Read + Send>>;

    fn file_size(&self, path: &Path) -> Result<u64>;

    fn file_exists(&self, path: &Path) -> bool;

    fn delete_file(&self, path: &Path) -> Result<()>;

    fn list_dir(&self, path: &Path) -> Result<Vec<PathBuf>>;

    /// Atomically replaces `to` with `from`.
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Flush directory metadata so creations, renames and deletions are durable.
    fn sync_dir(&self, path: &Path) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultFileSystem;

#[derive(Debug)]
struct FileChannel {
    path: PathBuf,
    file: File,
    cursor: u64,
}

impl StoreChannel for FileChannel {
    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.file
            .write_all(buf)
            .map_err(|e| Error::io(format!("write to {}", self.path.display()), e))?;
        self.cursor += buf.len() as u64;
        Ok(())
    }

    fn force(&mut self) -> Result<()> {
        self.file
            .sync_data()
            .map_err(|e| Error::io(format!("force {}", self.path.display()), e))
    }

    fn size(&self) -> Result<u64> {
        Ok(self.cursor)
    }

    fn truncate(&mut self, len: u64) -> Result<()> {
        self.file
            .set_len(len)
            .map_err(|e| Error::io(format!("truncate {}", self.path.display()), e))?;
        self.file
            .seek(SeekFrom::Start(len))
            .map_err(|e| Error::io(format!("seek {}", self.path.display()), e))?;
        self.cursor = len;
        Ok(())
    }
}

impl FileSystem for DefaultFileSystem {
    fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)
            .map_err(|e| Error::io(format!("create directory {}", path.display()), e))
    }

    fn open_channel(&self, path: &Path) -> Result<Box<dyn StoreChannel>> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|e| Error::io(format!("open {}", path.display()), e))?;
        let cursor = file
            .seek(SeekFrom::End(0))
            .map_err(|e| Error::io(format!("seek {}", path.display()), e))?;
        Ok(Box::new(FileChannel {
            path: path.to_path_buf(),
            file,
            cursor,
        }))
    }

    fn open_reader(&self, path: &Path) -> Result<Box<dyn Read + Send>> {
        let file =
            File::open(path).map_err(|e| Error::io(format!("open {}", path.display()), e))?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn file_size(&self, path: &Path) -> Result<u64> {
        fs::metadata(path)
            .map(|m| m.len())
            .map_err(|e| Error::io(format!("stat {}", path.display()), e))
    }

    fn file_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn delete_file(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(format!("delete {}", path.display()), e)),
        }
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let entries = fs::read_dir(path)
            .map_err(|e| Error::io(format!("list {}", path.display()), e))?;
        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(format!("list {}", path.display()), e))?;
            paths.push(entry.path());
        }
        paths.sort();
        Ok(paths)
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to).map_err(|e| {
            Error::io(format!("rename {} to {}", from.display(), to.display()), e)
        })
    }

    fn sync_dir(&self, path: &Path) -> Result<()> {
        #[cfg(unix)]
        {
            let dir = File::open(path)
                .map_err(|e| Error::io(format!("open directory {}", path.display()), e))?;
            dir.sync_all()
                .map_err(|e| Error::io(format!("fsync directory {}", path.display()), e))?;
        }
        #[cfg(not(unix))]
        let _ = path;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn channel_appends_and_truncates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chan.bin");
        let fs = DefaultFileSystem;

        let mut channel = fs.open_channel(&path).unwrap();
        channel.write_all(b"hello world").unwrap();
        channel.force().unwrap();
        assert_eq!(channel.size().unwrap(), 11);

        channel.truncate(5).unwrap();
        channel.write_all(b"!").unwrap();
        channel.force().unwrap();
        drop(channel);

        let mut contents = String::new();
        fs.open_reader(&path)
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents, "hello!");
    }

    #[test]
    fn reopened_channel_continues_at_end() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chan.bin");
        let fs = DefaultFileSystem;

        fs.open_channel(&path).unwrap().write_all(b"abc").unwrap();
        let channel = fs.open_channel(&path).unwrap();
        assert_eq!(channel.size().unwrap(), 3);
        assert_eq!(fs.file_size(&path).unwrap(), 3);
    }

    #[test]
    fn delete_missing_file_is_ok() {
        let dir = tempdir().unwrap();
        let fs = DefaultFileSystem;
        assert!(fs.delete_file(&dir.path().join("nope")).is_ok());
    }
}
