//! Parallel pack downloads.
//!
//! This module provides the download half of a sync:
//! - Grouping missing files into per-pack jobs (`job`)
//! - Fetching pack bytes over HTTP(S) (`source`)
//! - Real-time progress aggregation (`progress`)
//! - The retrying worker pool (`scheduler`)
//!
//! # Architecture
//!
//! ```text
//! DownloadScheduler
//!         │
//!         ├── PackCache (cache-first, tee on download)
//!         │
//!         ├── PackSource (trait)
//!         │       └── HttpPackSource
//!         │
//!         ├── extract_pack (per job)
//!         │
//!         └── progress reporter thread
//! ```
//!
//! # Example
//!
//! ```ignore
//! use gitdeps::download::{plan_jobs, DownloadScheduler, HttpPackSource, SchedulerOptions};
//! use gitdeps::report::TracingReporter;
//!
//! let jobs = plan_jobs(&target, root, &pending)?;
//! let source = HttpPackSource::new(None, Duration::from_secs(30))?;
//! let scheduler = DownloadScheduler::new(&source, Some(&cache), &TracingReporter, SchedulerOptions::default());
//! let stats = scheduler.run(jobs)?;
//! ```

mod job;
mod progress;
mod scheduler;
mod source;

pub use job::{plan_jobs, PackJob};
pub use progress::{ProgressCounters, Throughput};
pub use scheduler::{DownloadScheduler, DownloadStats, SchedulerOptions};
pub use source::{HttpPackSource, PackSource, PackStream};
