//! Pack extraction.
//!
//! A pack's decompressed stream is the concatenation of its blobs. Extraction
//! makes a single forward pass over the stream, writing each blob's byte
//! range to every file that shares it:
//!
//! ```text
//! stream  |----blob A----|--blob B--|-------blob C-------|
//!              │              │               │
//!          a.bin.incoming  b.bin.incoming  c.dll.incoming ──copy──► c2.dll.incoming
//!              │ verify        │ verify         │ verify
//!              ▼               ▼                ▼
//!            a.bin           b.bin       c.dll + c2.dll
//! ```
//!
//! Each blob is hashed as it is written and only renamed into place once the
//! hash matches. Any failure removes every temporary file still open.

mod tee;

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::cancel::CancellationFlag;
use crate::checksum::{hashes_equal, ContentHasher};
use crate::error::{SyncError, SyncResult};
use crate::manifest::incoming_path;

pub use tee::{CountingReader, TeeReader};

/// Read buffer size for the decompressed stream (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// One blob of a pack and the files it produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackBlob {
    /// Destination paths; at least one. All receive identical content.
    pub names: Vec<PathBuf>,
    pub hash: String,
    /// First byte of the blob in the decompressed stream.
    pub min_offset: u64,
    /// One past the last byte.
    pub max_offset: u64,
}

impl PackBlob {
    pub fn size(&self) -> u64 {
        self.max_offset - self.min_offset
    }
}

/// What to check while extracting one pack.
#[derive(Debug, Clone, Copy)]
pub struct ExtractOptions<'a> {
    /// Pack identity, used in errors and for whole-stream verification.
    pub pack_hash: &'a str,
    /// Hash the entire decompressed stream and compare it to `pack_hash`.
    /// The remainder of the stream after the last blob is drained.
    pub verify_pack_hash: bool,
    pub cancel: Option<&'a CancellationFlag>,
}

impl<'a> ExtractOptions<'a> {
    pub fn new(pack_hash: &'a str) -> Self {
        Self {
            pack_hash,
            verify_pack_hash: false,
            cancel: None,
        }
    }

    pub fn with_pack_verification(mut self, verify: bool) -> Self {
        self.verify_pack_hash = verify;
        self
    }

    pub fn with_cancel(mut self, cancel: &'a CancellationFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// A blob whose temporary file is open for writing.
struct OpenBlob<'b> {
    blob: &'b PackBlob,
    temp_path: PathBuf,
    writer: BufWriter<File>,
    hasher: ContentHasher,
}

impl<'b> OpenBlob<'b> {
    fn create(blob: &'b PackBlob, pack_hash: &str) -> SyncResult<Self> {
        let primary = blob.names.first().ok_or_else(|| SyncError::CorruptPack {
            pack: pack_hash.to_string(),
            reason: format!("blob {} has no destination", blob.hash),
        })?;
        create_parent_dir(primary)?;

        let temp_path = incoming_path(primary);
        let file = File::create(&temp_path).map_err(|e| SyncError::WriteFailed {
            path: temp_path.clone(),
            source: e,
        })?;
        trace!(path = %temp_path.display(), "Opened blob destination");

        Ok(Self {
            blob,
            temp_path,
            writer: BufWriter::new(file),
            hasher: ContentHasher::new(),
        })
    }

    fn write(&mut self, data: &[u8]) -> SyncResult<()> {
        self.hasher.update(data);
        self.writer
            .write_all(data)
            .map_err(|e| SyncError::WriteFailed {
                path: self.temp_path.clone(),
                source: e,
            })
    }

    /// Verify the hash, fan out to the other names and move everything into
    /// place. Cleans up its own temporaries on failure.
    fn finish(self) -> SyncResult<()> {
        let Self {
            blob,
            temp_path,
            writer,
            hasher,
        } = self;

        let flushed = writer
            .into_inner()
            .map_err(|e| e.into_error())
            .and_then(|file| file.sync_all());
        if let Err(e) = flushed {
            fs::remove_file(&temp_path).ok();
            return Err(SyncError::WriteFailed {
                path: temp_path,
                source: e,
            });
        }

        let actual = hasher.finish();
        if !hashes_equal(&actual, &blob.hash) {
            fs::remove_file(&temp_path).ok();
            return Err(SyncError::ChecksumMismatch {
                name: blob.names[0].display().to_string(),
                expected: blob.hash.clone(),
                actual,
            });
        }

        let mut staged = vec![(temp_path.clone(), blob.names[0].clone())];
        for extra in &blob.names[1..] {
            let extra_temp = incoming_path(extra);
            let copied = create_parent_dir(extra).and_then(|_| {
                fs::copy(&temp_path, &extra_temp)
                    .map(|_| ())
                    .map_err(|e| SyncError::WriteFailed {
                        path: extra_temp.clone(),
                        source: e,
                    })
            });
            staged.push((extra_temp, extra.clone()));
            if let Err(e) = copied {
                discard_staged(&staged);
                return Err(e);
            }
        }

        for (index, (from, to)) in staged.iter().enumerate() {
            if let Err(e) = fs::rename(from, to) {
                discard_staged(&staged[index..]);
                return Err(SyncError::RenameFailed {
                    from: from.clone(),
                    to: to.clone(),
                    source: e,
                });
            }
        }

        debug!(blob = %blob.hash, files = blob.names.len(), "Extracted blob");
        Ok(())
    }

    fn discard(self) {
        drop(self.writer);
        fs::remove_file(&self.temp_path).ok();
    }
}

fn discard_staged(staged: &[(PathBuf, PathBuf)]) {
    for (temp, _) in staged {
        fs::remove_file(temp).ok();
    }
}

fn create_parent_dir(path: &Path) -> SyncResult<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|e| SyncError::CreateDirFailed {
                path: parent.to_path_buf(),
                source: e,
            })
        }
        _ => Ok(()),
    }
}

fn read_chunk<R: Read>(
    reader: &mut R,
    buffer: &mut [u8],
    pack_hash: &str,
    offset: u64,
) -> SyncResult<usize> {
    loop {
        match reader.read(buffer) {
            Ok(read) => return Ok(read),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(SyncError::CorruptPack {
                    pack: pack_hash.to_string(),
                    reason: format!("read failed at offset {}: {}", offset, e),
                })
            }
        }
    }
}

/// Extract every blob of one pack from its decompressed stream.
///
/// `blobs` must be sorted by `min_offset`. `on_blob_done` is called after
/// each blob's files are in place.
///
/// Returns the number of decompressed bytes consumed.
///
/// # Errors
///
/// - [`SyncError::ChecksumMismatch`] / [`SyncError::CorruptPack`] when the
///   stream does not match the declared hashes or ends early
/// - [`SyncError::Cancelled`] when the cancellation flag is raised
/// - filesystem errors for the destination files
pub fn extract_pack<R: Read>(
    mut reader: R,
    blobs: &[PackBlob],
    options: &ExtractOptions<'_>,
    mut on_blob_done: impl FnMut(&PackBlob),
) -> SyncResult<u64> {
    debug_assert!(blobs.windows(2).all(|w| w[0].min_offset <= w[1].min_offset));

    let mut open = Vec::new();
    let result = extract_blobs(&mut reader, blobs, options, &mut open, &mut on_blob_done);
    if result.is_err() {
        for blob in open.drain(..) {
            blob.discard();
        }
    }
    result
}

fn extract_blobs<'b, R: Read>(
    reader: &mut R,
    blobs: &'b [PackBlob],
    options: &ExtractOptions<'_>,
    open: &mut Vec<OpenBlob<'b>>,
    on_blob_done: &mut dyn FnMut(&PackBlob),
) -> SyncResult<u64> {
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut pack_hasher = options.verify_pack_hash.then(ContentHasher::new);
    let mut position = 0u64;
    let mut next = 0usize;

    loop {
        if options.cancel.is_some_and(|c| c.is_cancelled()) {
            return Err(SyncError::Cancelled);
        }

        while next < blobs.len() && blobs[next].min_offset <= position {
            open.push(OpenBlob::create(&blobs[next], options.pack_hash)?);
            next += 1;
        }
        finish_covered(open, position, on_blob_done)?;

        if next == blobs.len() && open.is_empty() {
            break;
        }

        let read = read_chunk(reader, &mut buffer, options.pack_hash, position)?;
        if read == 0 {
            return Err(SyncError::CorruptPack {
                pack: options.pack_hash.to_string(),
                reason: format!(
                    "stream ended at offset {} with {} file(s) incomplete",
                    position,
                    blobs.len() - next + open.len()
                ),
            });
        }
        let end = position + read as u64;
        if let Some(hasher) = pack_hasher.as_mut() {
            hasher.update(&buffer[..read]);
        }

        while next < blobs.len() && blobs[next].min_offset < end {
            open.push(OpenBlob::create(&blobs[next], options.pack_hash)?);
            next += 1;
        }

        for blob in open.iter_mut() {
            let lo = blob.blob.min_offset.max(position);
            let hi = blob.blob.max_offset.min(end);
            if hi > lo {
                blob.write(&buffer[(lo - position) as usize..(hi - position) as usize])?;
            }
        }

        position = end;
    }

    if let Some(mut hasher) = pack_hasher {
        loop {
            if options.cancel.is_some_and(|c| c.is_cancelled()) {
                return Err(SyncError::Cancelled);
            }
            let read = read_chunk(reader, &mut buffer, options.pack_hash, position)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
            position += read as u64;
        }

        let actual = hasher.finish();
        if !hashes_equal(&actual, options.pack_hash) {
            return Err(SyncError::CorruptPack {
                pack: options.pack_hash.to_string(),
                reason: format!("stream hashes to {}", actual),
            });
        }
    }

    Ok(position)
}

/// Finish every open blob whose last byte is at or before `position`.
fn finish_covered(
    open: &mut Vec<OpenBlob<'_>>,
    position: u64,
    on_blob_done: &mut dyn FnMut(&PackBlob),
) -> SyncResult<()> {
    let mut index = 0;
    while index < open.len() {
        if open[index].blob.max_offset <= position {
            let done = open.remove(index);
            let blob = done.blob;
            done.finish()?;
            on_blob_done(blob);
        } else {
            index += 1;
        }
    }
    Ok(())
}
