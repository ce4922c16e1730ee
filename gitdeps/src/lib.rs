//! gitdeps - binary dependency synchronization
//!
//! This library keeps a workspace's large binary files in sync with the
//! XML dependency manifests checked into the repository. File contents live
//! in content-addressed packs on a CDN; a sync works out which files are
//! missing, stale or modified, fetches only the packs it needs (through a
//! local pack cache and a pool of download workers), and records what it
//! did so an interrupted run resumes safely.
//!
//! # Example
//!
//! ```ignore
//! use gitdeps::config::SyncConfig;
//! use gitdeps::report::TracingReporter;
//! use gitdeps::sync::Synchronizer;
//!
//! let config = SyncConfig::new("/path/to/workspace").with_threads(8);
//! let summary = Synchronizer::new(config, &TracingReporter).run()?;
//! println!("{}", summary);
//! ```

pub mod cache;
pub mod cancel;
pub mod checksum;
pub mod config;
pub mod download;
pub mod error;
pub mod extract;
pub mod ignore;
pub mod logging;
pub mod manifest;
pub mod platform;
pub mod report;
pub mod sync;

pub use error::{SyncError, SyncResult};
pub use sync::{SyncSummary, Synchronizer};
