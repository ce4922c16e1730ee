//! Durable storage of the working manifest.
//!
//! The state file is rewritten by writing a `.tmp` sibling and renaming it
//! over the primary. A crash between the two leaves either a complete primary
//! or a complete `.tmp`, which [`WorkingStateStore::recover`] promotes.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use tracing::{debug, info, warn};

use super::model::WorkingManifest;
use crate::error::{SyncError, SyncResult};

/// Suffix of the temporary file a download is written to before it is
/// verified and renamed into place.
pub const INCOMING_EXTENSION: &str = "incoming";

/// Path of the in-progress sibling of `path`.
pub fn incoming_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(INCOMING_EXTENSION);
    PathBuf::from(name)
}

/// Modification time of a file as nanoseconds since the Unix epoch.
///
/// Never returns zero, which is reserved for "download pending".
pub fn file_timestamp(metadata: &fs::Metadata) -> u64 {
    let nanos = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    nanos.max(1)
}

/// Loads and saves the working manifest for one workspace.
#[derive(Debug, Clone)]
pub struct WorkingStateStore {
    path: PathBuf,
    temp_path: PathBuf,
}

impl WorkingStateStore {
    /// Create a store for `<root>/<file_name>`.
    pub fn new(root: &Path, file_name: &str) -> Self {
        let path = root.join(file_name);
        let mut temp = path.as_os_str().to_owned();
        temp.push(".tmp");
        Self {
            path,
            temp_path: PathBuf::from(temp),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// Finish an interrupted save.
    ///
    /// Promotes a lone `.tmp` file to the primary. A `.tmp` next to an
    /// existing primary never got renamed and is discarded.
    ///
    /// Returns `true` if a staged file was promoted.
    pub fn recover(&self) -> SyncResult<bool> {
        if !self.temp_path.exists() {
            return Ok(false);
        }

        if self.path.exists() {
            debug!(path = %self.temp_path.display(), "Discarding stale staged state file");
            fs::remove_file(&self.temp_path).map_err(|e| SyncError::DeleteFailed {
                path: self.temp_path.clone(),
                source: e,
            })?;
            return Ok(false);
        }

        info!(path = %self.path.display(), "Promoting staged state file from interrupted run");
        fs::rename(&self.temp_path, &self.path).map_err(|e| SyncError::RenameFailed {
            from: self.temp_path.clone(),
            to: self.path.clone(),
            source: e,
        })?;
        Ok(true)
    }

    /// Load the working manifest.
    ///
    /// Returns `None` when the file does not exist or cannot be parsed; a
    /// corrupt state file only costs a full re-verification of the workspace.
    pub fn load(&self) -> SyncResult<Option<WorkingManifest>> {
        let xml = match fs::read_to_string(&self.path) {
            Ok(xml) => xml,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(SyncError::ReadFailed {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };

        match WorkingManifest::from_xml(&xml) {
            Ok(manifest) => {
                debug!(files = manifest.files.len(), "Loaded working manifest");
                Ok(Some(manifest))
            }
            Err(reason) => {
                warn!(
                    path = %self.path.display(),
                    %reason,
                    "Ignoring unreadable working manifest; all files will be re-verified"
                );
                Ok(None)
            }
        }
    }

    /// Write the manifest durably: stage to `.tmp`, sync, then rename over
    /// the primary.
    pub fn save(&self, manifest: &WorkingManifest) -> SyncResult<()> {
        let xml = manifest.to_xml().map_err(|reason| SyncError::ManifestParse {
            path: self.path.clone(),
            reason,
        })?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| SyncError::CreateDirFailed {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let write_err = |e| SyncError::WriteFailed {
            path: self.temp_path.clone(),
            source: e,
        };
        let mut file = File::create(&self.temp_path).map_err(write_err)?;
        file.write_all(xml.as_bytes()).map_err(write_err)?;
        file.sync_all().map_err(write_err)?;
        drop(file);

        fs::rename(&self.temp_path, &self.path).map_err(|e| SyncError::RenameFailed {
            from: self.temp_path.clone(),
            to: self.path.clone(),
            source: e,
        })?;

        debug!(files = manifest.files.len(), path = %self.path.display(), "Saved working manifest");
        Ok(())
    }
}

/// Delete the `.incoming` leftovers of downloads that never completed.
///
/// Returns the number of artifacts removed.
pub(crate) fn remove_partial_downloads(
    root: &Path,
    manifest: &WorkingManifest,
) -> SyncResult<usize> {
    let mut removed = 0;
    for file in manifest.files.iter().filter(|f| f.is_pending()) {
        let partial = incoming_path(&root.join(&file.name));
        match fs::remove_file(&partial) {
            Ok(()) => {
                debug!(file = %file.name, "Removed partial download");
                removed += 1;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(SyncError::DeleteFailed {
                    path: partial,
                    source: e,
                })
            }
        }
    }
    Ok(removed)
}
