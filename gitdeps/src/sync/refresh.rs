//! Bringing the recorded working state up to date with the disk.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use tracing::debug;

use crate::cancel::CancellationFlag;
use crate::checksum::calculate_file_hash;
use crate::error::{SyncError, SyncResult};
use crate::manifest::{file_key, file_timestamp, TargetManifest, WorkingFile, WorkingManifest};

/// Working files that exist on disk, keyed by lowercased name.
pub type LocalFiles = BTreeMap<String, WorkingFile>;

fn metadata_if_exists(path: &Path) -> SyncResult<Option<fs::Metadata>> {
    match fs::metadata(path) {
        Ok(metadata) if metadata.is_file() => Ok(Some(metadata)),
        Ok(_) => Ok(None),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SyncError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Re-hash tracked files whose modification time changed and adopt
/// untracked files that a manifest declares.
///
/// Tracked files that no longer exist are dropped. Adopted files get an
/// empty expected hash, so they are replaced if they differ from the target
/// but never reported as locally modified.
pub fn refresh_working_state(
    root: &Path,
    previous: Option<WorkingManifest>,
    target: &TargetManifest,
    cancel: &CancellationFlag,
) -> SyncResult<LocalFiles> {
    let mut local = LocalFiles::new();
    let mut rehashed = 0usize;

    for mut file in previous.map(|m| m.files).unwrap_or_default() {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        let path = root.join(&file.name);
        let Some(metadata) = metadata_if_exists(&path)? else {
            debug!(file = %file.name, "Tracked file no longer on disk");
            continue;
        };

        let timestamp = file_timestamp(&metadata);
        if timestamp != file.timestamp {
            file.hash = calculate_file_hash(&path)?;
            file.timestamp = timestamp;
            rehashed += 1;
        }
        local.insert(file_key(&file.name), file);
    }

    let mut adopted = 0usize;
    for (key, declared) in &target.files {
        if local.contains_key(key) {
            continue;
        }
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        let path = root.join(&declared.name);
        let Some(metadata) = metadata_if_exists(&path)? else {
            continue;
        };

        local.insert(
            key.clone(),
            WorkingFile {
                name: declared.name.clone(),
                hash: calculate_file_hash(&path)?,
                expected_hash: String::new(),
                timestamp: file_timestamp(&metadata),
            },
        );
        adopted += 1;
    }

    debug!(
        tracked = local.len(),
        rehashed, adopted, "Refreshed working state"
    );
    Ok(local)
}
