//! Progress aggregation for the download pool.
//!
//! Workers bump atomic counters; a reporter thread samples them on a fixed
//! interval and forwards a [`ProgressSnapshot`] to the [`Reporter`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::report::{ProgressSnapshot, Reporter};

/// How often the reporter samples the counters.
pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(200);

/// Window of the throughput moving average.
pub const THROUGHPUT_WINDOW: Duration = Duration::from_secs(4);

/// Counters shared between workers and the reporter thread.
#[derive(Debug, Default)]
pub struct ProgressCounters {
    /// Compressed bytes read from the network.
    pub bytes_downloaded: Arc<AtomicU64>,
    /// Compressed bytes read from the cache.
    pub bytes_cached: Arc<AtomicU64>,
    files_done: AtomicUsize,
    done: AtomicBool,
}

impl ProgressCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_files(&self, count: usize) {
        self.files_done.fetch_add(count, Ordering::SeqCst);
    }

    /// Take back files counted by an attempt that later failed.
    pub fn remove_files(&self, count: usize) {
        self.files_done.fetch_sub(count, Ordering::SeqCst);
    }

    pub fn files_done(&self) -> usize {
        self.files_done.load(Ordering::SeqCst)
    }

    pub fn downloaded(&self) -> u64 {
        self.bytes_downloaded.load(Ordering::SeqCst)
    }

    pub fn cached(&self) -> u64 {
        self.bytes_cached.load(Ordering::SeqCst)
    }

    pub fn signal_done(&self) {
        self.done.store(true, Ordering::SeqCst);
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }
}

/// Trailing moving average over `(time, total bytes)` samples.
#[derive(Debug)]
pub struct Throughput {
    window: Duration,
    samples: VecDeque<(Instant, u64)>,
}

impl Throughput {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
        }
    }

    /// Record the running byte total and return bytes/second over the window.
    pub fn sample(&mut self, now: Instant, total: u64) -> f64 {
        self.samples.push_back((now, total));
        while let Some(&(time, _)) = self.samples.front() {
            if now.duration_since(time) > self.window && self.samples.len() > 2 {
                self.samples.pop_front();
            } else {
                break;
            }
        }

        match (self.samples.front(), self.samples.back()) {
            (Some(&(t0, b0)), Some(&(t1, b1))) if t1 > t0 => {
                b1.saturating_sub(b0) as f64 / t1.duration_since(t0).as_secs_f64()
            }
            _ => 0.0,
        }
    }
}

/// Totals the snapshots are reported against.
#[derive(Debug, Clone, Copy)]
pub struct ProgressTotals {
    pub files: usize,
    pub bytes: u64,
}

fn snapshot(counters: &ProgressCounters, totals: ProgressTotals, rate: f64) -> ProgressSnapshot {
    ProgressSnapshot {
        files_done: counters.files_done(),
        files_total: totals.files,
        bytes_downloaded: counters.downloaded(),
        bytes_cached: counters.cached(),
        bytes_total: totals.bytes,
        bytes_per_second: rate,
    }
}

/// Sample `counters` every `interval` until they are signalled done, then
/// send one final snapshot.
pub fn report_until_done(
    counters: &ProgressCounters,
    totals: ProgressTotals,
    reporter: &dyn Reporter,
    interval: Duration,
) {
    let mut throughput = Throughput::new(THROUGHPUT_WINDOW);
    while !counters.is_done() {
        let rate = throughput.sample(Instant::now(), counters.downloaded());
        reporter.progress(&snapshot(counters, totals, rate));
        thread::sleep(interval);
    }

    let rate = throughput.sample(Instant::now(), counters.downloaded());
    reporter.progress(&snapshot(counters, totals, rate));
    reporter.finish_progress();
}
