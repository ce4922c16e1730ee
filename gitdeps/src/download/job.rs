//! Turning a list of missing files into per-pack download jobs.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::error::{SyncError, SyncResult};
use crate::extract::PackBlob;
use crate::manifest::{TargetManifest, WorkingFile};

/// One pack to fetch and the blobs to extract from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackJob {
    /// Pack hash; also the cache key.
    pub pack_hash: String,
    pub url: String,
    pub use_proxy: bool,
    /// Sorted by `min_offset`.
    pub blobs: Vec<PackBlob>,
    pub compressed_size: u64,
    /// Number of destination files across all blobs.
    pub file_count: usize,
}

/// Group the files awaiting download by the pack that holds their content.
///
/// Only packs containing at least one required blob produce a job. Jobs are
/// ordered by pack hash so scheduling does not depend on map iteration.
pub fn plan_jobs(
    target: &TargetManifest,
    root: &Path,
    downloads: &[WorkingFile],
) -> SyncResult<Vec<PackJob>> {
    // blob hash -> files wanting it
    let mut files_by_hash: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for file in downloads {
        files_by_hash
            .entry(file.expected_hash.as_str())
            .or_default()
            .push(file.name.as_str());
    }

    // pack hash -> blobs needed from it
    let mut blobs_by_pack: HashMap<&str, Vec<PackBlob>> = HashMap::new();
    for (hash, names) in files_by_hash {
        let blob = target.blobs.get(hash).ok_or_else(|| {
            SyncError::InvalidManifest(format!(
                "{} references unknown blob {}",
                names.first().copied().unwrap_or_default(),
                hash
            ))
        })?;

        blobs_by_pack
            .entry(blob.pack_hash.as_str())
            .or_default()
            .push(PackBlob {
                names: names.iter().map(|name| root.join(name)).collect(),
                hash: blob.hash.clone(),
                min_offset: blob.pack_offset,
                max_offset: blob.pack_offset + blob.size,
            });
    }

    let mut jobs = Vec::with_capacity(blobs_by_pack.len());
    for (pack_hash, mut blobs) in blobs_by_pack {
        let entry = target.packs.get(pack_hash).ok_or_else(|| {
            SyncError::InvalidManifest(format!("unknown pack {}", pack_hash))
        })?;
        blobs.sort_by(|a, b| {
            a.min_offset
                .cmp(&b.min_offset)
                .then(a.max_offset.cmp(&b.max_offset))
        });

        jobs.push(PackJob {
            pack_hash: pack_hash.to_string(),
            url: entry.url(),
            use_proxy: !entry.ignore_proxy,
            file_count: blobs.iter().map(|b| b.names.len()).sum(),
            compressed_size: entry.pack.compressed_size,
            blobs,
        });
    }

    jobs.sort_by(|a, b| a.pack_hash.cmp(&b.pack_hash));
    Ok(jobs)
}
