//! SHA-1 content hashing for files, blobs and packs.
//!
//! Every hash in a dependency manifest is the lowercase hexadecimal SHA-1 of
//! uncompressed bytes. Comparisons are case-insensitive so manifests written
//! with uppercase digests still match.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha1::{Digest, Sha1};

use crate::error::{SyncError, SyncResult};

/// Buffer size for reading files during checksum calculation (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Incremental content hasher.
#[derive(Debug, Clone, Default)]
pub struct ContentHasher {
    inner: Sha1,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Consume the hasher and return the lowercase hex digest.
    pub fn finish(self) -> String {
        format!("{:x}", self.inner.finalize())
    }
}

/// Hash an in-memory buffer.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = ContentHasher::new();
    hasher.update(data);
    hasher.finish()
}

/// Calculate the content hash of a file.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn calculate_file_hash(path: &Path) -> SyncResult<String> {
    let mut file = File::open(path).map_err(|e| SyncError::ReadFailed {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut hasher = ContentHasher::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer).map_err(|e| SyncError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

        if bytes_read == 0 {
            break;
        }

        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finish())
}

/// Compare two hex digests ignoring case.
pub fn hashes_equal(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}
