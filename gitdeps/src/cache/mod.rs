//! Content-addressed on-disk cache of downloaded packs.
//!
//! Packs are stored compressed, exactly as served, at
//! `<root>/<hash[0..2]>/<hash>`. Every use refreshes the entry's modification
//! time, which [`PackCache::purge`] uses to decide what to keep.
//!
//! ```text
//! <root>/
//! ├── 3f/
//! │   └── 3f8a...e1          (complete pack)
//! └── a0/
//!     └── a07c...92.incoming (being written, renamed when verified)
//! ```
//!
//! The cache is not locked: one process at a time is assumed to use it.

mod purge;

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use filetime::FileTime;
use tracing::{debug, warn};

use crate::error::{SyncError, SyncResult};
use crate::manifest::incoming_path;

pub use purge::PurgeResult;

/// Handle to a pack cache directory.
#[derive(Debug, Clone)]
pub struct PackCache {
    root: PathBuf,
}

impl PackCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the pack with `hash` is stored.
    pub fn entry_path(&self, hash: &str) -> PathBuf {
        let shard = hash.get(..2).unwrap_or(hash);
        self.root.join(shard).join(hash)
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.entry_path(hash).is_file()
    }

    /// Open a cached pack for reading and mark it as recently used.
    ///
    /// Returns `Ok(None)` on a cache miss.
    pub fn open(&self, hash: &str) -> SyncResult<Option<File>> {
        let path = self.entry_path(hash);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SyncError::CacheFailed { path, source: e }),
        };
        self.touch(hash);
        Ok(Some(file))
    }

    /// Refresh an entry's modification time. Failures only affect purge
    /// order and are logged.
    pub fn touch(&self, hash: &str) {
        let path = self.entry_path(hash);
        if let Err(e) = filetime::set_file_mtime(&path, FileTime::now()) {
            warn!(path = %path.display(), error = %e, "Failed to refresh cache entry time");
        }
    }

    /// Delete an entry, e.g. after it was found to be corrupt.
    pub fn remove(&self, hash: &str) -> SyncResult<()> {
        let path = self.entry_path(hash);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(pack = %hash, "Removed cached pack");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SyncError::CacheFailed { path, source: e }),
        }
    }

    /// Start writing a new entry. Bytes go to an `.incoming` file that only
    /// becomes visible on [`CacheEntryWriter::commit`].
    pub fn begin_entry(&self, hash: &str) -> SyncResult<CacheEntryWriter> {
        let final_path = self.entry_path(hash);
        let temp_path = incoming_path(&final_path);

        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).map_err(|e| SyncError::CacheFailed {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let file = File::create(&temp_path).map_err(|e| SyncError::CacheFailed {
            path: temp_path.clone(),
            source: e,
        })?;

        Ok(CacheEntryWriter {
            writer: Some(BufWriter::new(file)),
            temp_path,
            final_path,
        })
    }

    /// Number of complete entries and their total size.
    pub fn stats(&self) -> SyncResult<(usize, u64)> {
        let entries = purge::list_entries(&self.root)?;
        let bytes = entries.iter().map(|e| e.size).sum();
        Ok((entries.len(), bytes))
    }
}

/// A cache entry being written.
///
/// Dropping it without committing deletes the partial file.
#[derive(Debug)]
pub struct CacheEntryWriter {
    writer: Option<BufWriter<File>>,
    temp_path: PathBuf,
    final_path: PathBuf,
}

impl CacheEntryWriter {
    /// Flush and move the entry into place.
    pub fn commit(mut self) -> SyncResult<PathBuf> {
        let writer = match self.writer.take() {
            Some(writer) => writer,
            None => return Ok(self.final_path.clone()),
        };

        let file = writer.into_inner().map_err(|e| SyncError::CacheFailed {
            path: self.temp_path.clone(),
            source: e.into_error(),
        })?;
        file.sync_all().map_err(|e| SyncError::CacheFailed {
            path: self.temp_path.clone(),
            source: e,
        })?;
        drop(file);

        fs::rename(&self.temp_path, &self.final_path).map_err(|e| SyncError::CacheFailed {
            path: self.final_path.clone(),
            source: e,
        })?;
        debug!(path = %self.final_path.display(), "Committed cache entry");
        Ok(self.final_path.clone())
    }
}

impl Write for CacheEntryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.writer.as_mut() {
            Some(writer) => writer.write(buf),
            None => Err(io::Error::new(io::ErrorKind::Other, "cache entry closed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for CacheEntryWriter {
    fn drop(&mut self) {
        if self.writer.take().is_some() {
            fs::remove_file(&self.temp_path).ok();
        }
    }
}
