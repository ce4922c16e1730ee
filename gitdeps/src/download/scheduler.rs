//! Worker pool that fetches and extracts packs.
//!
//! ```text
//!              ┌──────────── PoolState (Mutex + Condvar) ────────────┐
//!              │ queue: VecDeque<PackJob>   in_flight   remaining    │
//!              │ failing[worker]   last_error   outcome             │
//!              └──────▲──────────────────────────────────────┬──────┘
//!            requeue  │                                      │ pop
//!                     │                                      ▼
//!   worker 0..N ── cache hit? ── extract ─── done ───► remaining -= 1
//!                     │ miss / corrupt
//!                     └── PackSource ─► Tee(cache entry) ─► gunzip ─► extract
//! ```
//!
//! Every worker exits once the pool is marked finished, which happens under
//! the lock when all jobs complete, when a non-retryable error occurs, or
//! when every worker has exceeded its retry budget.

use std::collections::VecDeque;
use std::io::{self, BufReader};
use std::thread;
use std::time::Duration;

use flate2::read::GzDecoder;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use super::job::PackJob;
use super::progress::{report_until_done, ProgressCounters, ProgressTotals, SAMPLE_INTERVAL};
use super::source::PackSource;
use crate::cache::PackCache;
use crate::cancel::CancellationFlag;
use crate::error::{SyncError, SyncResult};
use crate::extract::{extract_pack, CountingReader, ExtractOptions, PackBlob, TeeReader};
use crate::report::Reporter;

/// Longest single sleep while backing off, so cancellation stays responsive.
const BACKOFF_SLICE: Duration = Duration::from_millis(100);

/// Pool sizing and retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerOptions {
    pub threads: usize,
    /// Failures a worker may accumulate before it is considered failing.
    pub max_retries: u32,
    /// Base back-off for failing workers.
    pub retry_delay: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            threads: 4,
            max_retries: 4,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// What a completed download run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadStats {
    /// Packs fetched over the network.
    pub packs_downloaded: usize,
    /// Packs extracted from the local cache.
    pub packs_from_cache: usize,
    pub files_extracted: usize,
    pub bytes_downloaded: u64,
    pub bytes_cached: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobOrigin {
    Cache,
    Network,
}

struct PoolState {
    queue: VecDeque<PackJob>,
    in_flight: usize,
    remaining: usize,
    failing: Vec<bool>,
    last_error: Option<String>,
    fatal: Option<SyncError>,
    finished: bool,
    stats: DownloadStats,
}

struct Pool {
    state: Mutex<PoolState>,
    changed: Condvar,
}

/// Runs [`PackJob`]s on a fixed pool of threads.
pub struct DownloadScheduler<'a> {
    source: &'a dyn PackSource,
    cache: Option<&'a PackCache>,
    reporter: &'a dyn Reporter,
    cancel: CancellationFlag,
    options: SchedulerOptions,
}

impl<'a> DownloadScheduler<'a> {
    pub fn new(
        source: &'a dyn PackSource,
        cache: Option<&'a PackCache>,
        reporter: &'a dyn Reporter,
        options: SchedulerOptions,
    ) -> Self {
        Self {
            source,
            cache,
            reporter,
            cancel: CancellationFlag::new(),
            options,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Fetch and extract every job.
    ///
    /// Returns once every job has completed or the pool has given up. All
    /// worker threads have exited by the time this returns.
    ///
    /// # Errors
    ///
    /// - [`SyncError::DownloadsIncomplete`] when every worker exhausted its
    ///   retries, carrying the most recent failure
    /// - [`SyncError::Cancelled`] when the cancellation flag was raised
    /// - the first non-retryable error a worker hit
    pub fn run(&self, jobs: Vec<PackJob>) -> SyncResult<DownloadStats> {
        if jobs.is_empty() {
            return Ok(DownloadStats::default());
        }

        let totals = ProgressTotals {
            files: jobs.iter().map(|j| j.file_count).sum(),
            bytes: jobs.iter().map(|j| j.compressed_size).sum(),
        };
        let threads = self.options.threads.clamp(1, jobs.len());
        info!(
            packs = jobs.len(),
            files = totals.files,
            bytes = totals.bytes,
            threads,
            "Downloading packs"
        );

        let pool = Pool {
            state: Mutex::new(PoolState {
                remaining: jobs.len(),
                queue: jobs.into(),
                in_flight: 0,
                failing: vec![false; threads],
                last_error: None,
                fatal: None,
                finished: false,
                stats: DownloadStats::default(),
            }),
            changed: Condvar::new(),
        };
        let counters = ProgressCounters::new();

        thread::scope(|scope| {
            let progress = scope.spawn(|| {
                report_until_done(&counters, totals, self.reporter, SAMPLE_INTERVAL)
            });
            let workers: Vec<_> = (0..threads)
                .map(|id| {
                    let pool = &pool;
                    let counters = &counters;
                    scope.spawn(move || self.worker(id, pool, counters))
                })
                .collect();

            for worker in workers {
                if worker.join().is_err() {
                    let mut state = pool.state.lock();
                    let remaining = state.remaining;
                    state.fatal.get_or_insert(SyncError::DownloadsIncomplete {
                        remaining,
                        last_error: "download worker panicked".to_string(),
                    });
                }
            }
            counters.signal_done();
            progress.join().ok();
        });

        let mut state = pool.state.into_inner();
        if let Some(error) = state.fatal.take() {
            return Err(error);
        }
        if state.remaining > 0 {
            return Err(SyncError::DownloadsIncomplete {
                remaining: state.remaining,
                last_error: state
                    .last_error
                    .unwrap_or_else(|| "no progress possible".to_string()),
            });
        }

        state.stats.bytes_downloaded = counters.downloaded();
        state.stats.bytes_cached = counters.cached();
        info!(
            downloaded = state.stats.packs_downloaded,
            cached = state.stats.packs_from_cache,
            files = state.stats.files_extracted,
            "Downloads complete"
        );
        Ok(state.stats)
    }

    fn worker(&self, id: usize, pool: &Pool, counters: &ProgressCounters) {
        let mut retries: u32 = 0;

        while let Some(job) = next_job(pool) {
            if retries > self.options.max_retries {
                let excess = retries - self.options.max_retries;
                self.back_off(self.options.retry_delay * excess);
            }

            let result = if self.cancel.is_cancelled() {
                Err(SyncError::Cancelled)
            } else {
                self.process(&job, counters)
            };

            let mut state = pool.state.lock();
            state.in_flight -= 1;
            match result {
                Ok(origin) => {
                    retries = 0;
                    state.failing[id] = false;
                    state.remaining -= 1;
                    state.stats.files_extracted += job.file_count;
                    match origin {
                        JobOrigin::Cache => state.stats.packs_from_cache += 1,
                        JobOrigin::Network => state.stats.packs_downloaded += 1,
                    }
                    if state.remaining == 0 {
                        state.finished = true;
                    }
                }
                Err(e) if e.is_retryable() => {
                    retries += 1;
                    warn!(
                        worker = id,
                        pack = %job.pack_hash,
                        attempt = retries,
                        error = %e,
                        "Pack download failed, retrying"
                    );
                    if retries > self.options.max_retries {
                        state.failing[id] = true;
                    }
                    state.last_error = Some(e.to_string());
                    state.queue.push_back(job);
                    if state.failing.iter().all(|&f| f) {
                        warn!("Every download worker is failing, giving up");
                        state.finished = true;
                    }
                }
                Err(e) => {
                    debug!(worker = id, error = %e, "Aborting downloads");
                    state.fatal.get_or_insert(e);
                    state.finished = true;
                }
            }
            pool.changed.notify_all();
        }
    }

    /// Sleep for `delay` in short slices, stopping early on cancellation.
    fn back_off(&self, delay: Duration) {
        let mut left = delay;
        while !left.is_zero() && !self.cancel.is_cancelled() {
            let slice = left.min(BACKOFF_SLICE);
            thread::sleep(slice);
            left -= slice;
        }
    }

    fn process(&self, job: &PackJob, counters: &ProgressCounters) -> SyncResult<JobOrigin> {
        if let Some(cache) = self.cache {
            if self.extract_from_cache(cache, job, counters)? {
                return Ok(JobOrigin::Cache);
            }
        }
        self.extract_from_network(job, counters)?;
        Ok(JobOrigin::Network)
    }

    /// Returns `Ok(false)` on a miss or a corrupt entry, which is evicted.
    fn extract_from_cache(
        &self,
        cache: &PackCache,
        job: &PackJob,
        counters: &ProgressCounters,
    ) -> SyncResult<bool> {
        let file = match cache.open(&job.pack_hash) {
            Ok(Some(file)) => file,
            Ok(None) => return Ok(false),
            Err(e) => {
                warn!(pack = %job.pack_hash, error = %e, "Pack cache unreadable");
                return Ok(false);
            }
        };

        let reader = CountingReader::new(BufReader::new(file), counters.bytes_cached.clone());
        match self.extract(GzDecoder::new(reader), job, counters) {
            Ok(()) => {
                debug!(pack = %job.pack_hash, "Extracted pack from cache");
                Ok(true)
            }
            Err(e) if e.is_corruption() => {
                warn!(pack = %job.pack_hash, error = %e, "Cached pack is corrupt, refetching");
                cache.remove(&job.pack_hash)?;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn extract_from_network(&self, job: &PackJob, counters: &ProgressCounters) -> SyncResult<()> {
        let stream = self.source.open(job)?;
        let reader = CountingReader::new(stream, counters.bytes_downloaded.clone());

        let entry = match self.cache.map(|cache| cache.begin_entry(&job.pack_hash)) {
            Some(Ok(entry)) => Some(entry),
            Some(Err(e)) => {
                warn!(pack = %job.pack_hash, error = %e, "Not caching pack");
                None
            }
            None => None,
        };

        let Some(entry) = entry else {
            self.extract(GzDecoder::new(reader), job, counters)?;
            debug!(pack = %job.pack_hash, "Downloaded pack");
            return Ok(());
        };

        let mut tee = TeeReader::new(reader, entry);
        self.extract(GzDecoder::new(&mut tee), job, counters)?;
        // Anything after the gzip member still belongs in the cached copy.
        io::copy(&mut tee, &mut io::sink()).map_err(|e| SyncError::DownloadFailed {
            url: job.url.clone(),
            reason: e.to_string(),
        })?;

        let (_, entry) = tee.into_parts();
        if let Err(e) = entry.commit() {
            warn!(pack = %job.pack_hash, error = %e, "Failed to store pack in cache");
        }
        debug!(pack = %job.pack_hash, "Downloaded and cached pack");
        Ok(())
    }

    fn extract<R: io::Read>(
        &self,
        reader: R,
        job: &PackJob,
        counters: &ProgressCounters,
    ) -> SyncResult<()> {
        let mut files_done = 0;
        let options = ExtractOptions::new(&job.pack_hash)
            .with_pack_verification(true)
            .with_cancel(&self.cancel);

        let result = extract_pack(reader, &job.blobs, &options, |blob: &PackBlob| {
            files_done += blob.names.len();
            counters.add_files(blob.names.len());
        });

        if result.is_err() {
            counters.remove_files(files_done);
        }
        result.map(|_| ())
    }
}

/// Block until a job is available or the pool is finished.
fn next_job(pool: &Pool) -> Option<PackJob> {
    let mut state = pool.state.lock();
    loop {
        if state.finished {
            return None;
        }
        if let Some(job) = state.queue.pop_front() {
            state.in_flight += 1;
            return Some(job);
        }
        if state.in_flight == 0 {
            state.finished = true;
            pool.changed.notify_all();
            return None;
        }
        pool.changed.wait(&mut state);
    }
}
