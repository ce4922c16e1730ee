//! Recency and size based eviction of cached packs.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, info};

use super::PackCache;
use crate::error::{SyncError, SyncResult};
use crate::manifest::INCOMING_EXTENSION;

/// Allowance for clock differences when comparing entry ages.
const CLOCK_SLACK: Duration = Duration::from_secs(5);

/// Outcome of a cache purge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeResult {
    pub files_removed: usize,
    pub bytes_freed: u64,
    pub bytes_retained: u64,
}

impl fmt::Display for PurgeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "purged {} cached pack(s), freed {} bytes, {} bytes retained",
            self.files_removed, self.bytes_freed, self.bytes_retained
        )
    }
}

#[derive(Debug, Clone)]
pub(super) struct CacheEntry {
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
    pub incoming: bool,
}

/// Every file in the two-level cache layout.
fn scan(root: &Path) -> SyncResult<Vec<CacheEntry>> {
    let mut entries = Vec::new();
    if !root.is_dir() {
        return Ok(entries);
    }

    let read_err = |path: &Path| {
        let path = path.to_path_buf();
        move |e: std::io::Error| SyncError::CacheFailed { path, source: e }
    };

    for shard in fs::read_dir(root).map_err(read_err(root))? {
        let shard = shard.map_err(read_err(root))?.path();
        if !shard.is_dir() {
            continue;
        }
        for file in fs::read_dir(&shard).map_err(read_err(&shard))? {
            let path = file.map_err(read_err(&shard))?.path();
            let metadata = fs::metadata(&path).map_err(read_err(&path))?;
            if !metadata.is_file() {
                continue;
            }
            let incoming = path
                .extension()
                .is_some_and(|ext| ext == INCOMING_EXTENSION);
            entries.push(CacheEntry {
                size: metadata.len(),
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                path,
                incoming,
            });
        }
    }
    Ok(entries)
}

/// Complete (non-`.incoming`) entries.
pub(super) fn list_entries(root: &Path) -> SyncResult<Vec<CacheEntry>> {
    Ok(scan(root)?.into_iter().filter(|e| !e.incoming).collect())
}

fn is_older_than(entry: &CacheEntry, now: SystemTime, max_age: Duration) -> bool {
    now.duration_since(entry.modified)
        .map(|age| age > max_age + CLOCK_SLACK)
        .unwrap_or(false)
}

fn remove(entry: &CacheEntry) -> SyncResult<()> {
    fs::remove_file(&entry.path).map_err(|e| SyncError::CacheFailed {
        path: entry.path.clone(),
        source: e,
    })
}

impl PackCache {
    /// Evict old packs beyond the size budget.
    ///
    /// Entries are visited newest first. An entry is removed only when the
    /// entries already kept exceed `desired_bytes` *and* it has not been
    /// used for longer than `max_age`, so recently used packs always survive
    /// and at least `min(desired_bytes, total)` bytes are retained.
    pub fn purge(&self, desired_bytes: u64, max_age: Duration) -> SyncResult<PurgeResult> {
        let now = SystemTime::now();
        let mut result = PurgeResult::default();

        let (incoming, mut entries): (Vec<_>, Vec<_>) =
            scan(&self.root)?.into_iter().partition(|e| e.incoming);

        for stray in incoming.iter().filter(|e| is_older_than(e, now, max_age)) {
            remove(stray)?;
            debug!(path = %stray.path.display(), "Removed abandoned cache download");
        }

        entries.sort_by(|a, b| b.modified.cmp(&a.modified));

        for entry in &entries {
            if result.bytes_retained > desired_bytes && is_older_than(entry, now, max_age) {
                remove(entry)?;
                result.files_removed += 1;
                result.bytes_freed += entry.size;
            } else {
                result.bytes_retained += entry.size;
            }
        }

        self.remove_empty_shards()?;

        if result.files_removed > 0 {
            info!(%result, "Purged pack cache");
        }
        Ok(result)
    }

    fn remove_empty_shards(&self) -> SyncResult<()> {
        if !self.root.is_dir() {
            return Ok(());
        }
        let entries = fs::read_dir(&self.root).map_err(|e| SyncError::CacheFailed {
            path: self.root.clone(),
            source: e,
        })?;
        for shard in entries.flatten() {
            let path = shard.path();
            let is_empty = fs::read_dir(&path)
                .map(|mut it| it.next().is_none())
                .unwrap_or(false);
            if path.is_dir() && is_empty {
                fs::remove_dir(&path).ok();
            }
        }
        Ok(())
    }
}
