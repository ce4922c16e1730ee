//! Dependency manifest types, discovery and working state.
//!
//! # Overview
//!
//! Two kinds of manifest are involved in a sync:
//!
//! - **Declared manifests** (`*.gitdeps.xml`): checked into the repository,
//!   one per module or plugin, listing the files a workspace needs, the
//!   blobs holding their content and the packs holding those blobs.
//! - **Working manifest** (`.dependencies-state`): the local record of what
//!   the last sync left on disk, rewritten every run.
//!
//! # Type Hierarchy
//!
//! ```text
//! DependencyFile ──hash──► DependencyBlob ──pack_hash──► DependencyPack
//!   (name)                  (offset, size)                (remote path)
//!
//! WorkingFile (name, hash, expected_hash, timestamp)
//! ```
//!
//! Declared data is parsed fresh every run and merged into a single
//! [`TargetManifest`]; only the working manifest is persisted.

mod aggregate;
mod model;
mod working;

pub use aggregate::{
    aggregate_manifests, DiscoveredManifest, ManifestDiscovery, PackEntry, TargetManifest,
};
pub use model::{
    parse_dependency_manifest, DependencyBlob, DependencyFile, DependencyManifest,
    DependencyPack, WorkingFile, WorkingManifest, DEFAULT_BASE_URL,
};
pub use working::{file_timestamp, incoming_path, WorkingStateStore, INCOMING_EXTENSION};

pub(crate) use aggregate::file_key;
pub(crate) use working::remove_partial_downloads;
