//! Error types for dependency synchronization.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while synchronizing dependencies.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A declared manifest or the working-state file could not be parsed.
    #[error("failed to parse manifest {}: {reason}", path.display())]
    ManifestParse { path: PathBuf, reason: String },

    /// Aggregated manifests reference a blob or pack that does not exist.
    #[error("invalid manifest set: {0}")]
    InvalidManifest(String),

    /// Failed to read a file or directory.
    #[error("failed to read {}: {source}", path.display())]
    ReadFailed { path: PathBuf, source: io::Error },

    /// Failed to write a file.
    #[error("failed to write {}: {source}", path.display())]
    WriteFailed { path: PathBuf, source: io::Error },

    /// Failed to create a directory.
    #[error("failed to create directory {}: {source}", path.display())]
    CreateDirFailed { path: PathBuf, source: io::Error },

    /// Failed to delete a file.
    #[error("failed to delete {}: {source}", path.display())]
    DeleteFailed { path: PathBuf, source: io::Error },

    /// Failed to move a file into place.
    #[error("failed to rename {} to {}: {source}", from.display(), to.display())]
    RenameFailed {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },

    /// A pack's contents did not match its declared layout or identity.
    #[error("corrupt pack {pack}: {reason}")]
    CorruptPack { pack: String, reason: String },

    /// An extracted file did not hash to its declared blob hash.
    #[error("checksum mismatch for {name}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    /// Transport failure while fetching a pack.
    #[error("failed to download {url}: {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Server answered with a non-success status.
    #[error("request to {url} failed with status {status}")]
    HttpStatus { url: String, status: u16 },

    /// I/O failure inside the pack cache.
    #[error("cache error at {}: {source}", path.display())]
    CacheFailed { path: PathBuf, source: io::Error },

    /// The download pool gave up with files still missing.
    #[error("failed to download {remaining} file(s): {last_error}")]
    DownloadsIncomplete { remaining: usize, last_error: String },

    /// The run was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SyncError {
    /// Whether a pack job that failed with this error should be re-enqueued.
    ///
    /// Workspace filesystem failures need user intervention and abort the
    /// run; transport and pack-integrity failures are retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::CorruptPack { .. }
                | Self::ChecksumMismatch { .. }
                | Self::DownloadFailed { .. }
                | Self::HttpStatus { .. }
                | Self::CacheFailed { .. }
        )
    }

    /// Whether this error indicates bad pack data rather than a transport
    /// problem. Cached copies are evicted on these.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::CorruptPack { .. } | Self::ChecksumMismatch { .. })
    }
}
