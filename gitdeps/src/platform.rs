//! Platform capabilities used after files are synchronized.

use std::path::Path;

use crate::error::{SyncError, SyncResult};

/// Marks files executable where the platform has such a notion.
pub trait ExecutableBit: Send + Sync {
    fn can_set_executable_bit(&self) -> bool;

    fn set_executable_bit(&self, path: &Path) -> SyncResult<()>;
}

/// Sets `u+x,g+x,o+x` via Unix permissions.
#[cfg(unix)]
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixExecutableBit;

#[cfg(unix)]
impl ExecutableBit for UnixExecutableBit {
    fn can_set_executable_bit(&self) -> bool {
        true
    }

    fn set_executable_bit(&self, path: &Path) -> SyncResult<()> {
        use std::os::unix::fs::PermissionsExt;

        let metadata = std::fs::metadata(path).map_err(|e| SyncError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut permissions = metadata.permissions();
        let mode = permissions.mode();
        if mode & 0o111 == 0o111 {
            return Ok(());
        }
        permissions.set_mode(mode | 0o111);
        std::fs::set_permissions(path, permissions).map_err(|e| SyncError::WriteFailed {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// For platforms without an executable bit.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoExecutableBit;

impl ExecutableBit for NoExecutableBit {
    fn can_set_executable_bit(&self) -> bool {
        false
    }

    fn set_executable_bit(&self, _path: &Path) -> SyncResult<()> {
        Ok(())
    }
}

/// The capability for the current platform.
pub fn native_executable_bit() -> Box<dyn ExecutableBit> {
    #[cfg(unix)]
    {
        Box::new(UnixExecutableBit)
    }
    #[cfg(not(unix))]
    {
        Box::new(NoExecutableBit)
    }
}
