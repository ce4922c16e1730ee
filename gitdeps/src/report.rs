//! User-facing reporting and interaction.
//!
//! Components never print directly. They are handed a [`Reporter`] for
//! status lines and progress, and a [`Prompter`] for the one question a sync
//! may need to ask. The CLI renders both on the terminal; the library ships
//! implementations that log through `tracing` or stay silent.

use tracing::info;

/// Point-in-time view of download progress.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProgressSnapshot {
    /// Files fully extracted and verified.
    pub files_done: usize,
    pub files_total: usize,
    /// Compressed bytes received from the network.
    pub bytes_downloaded: u64,
    /// Compressed bytes read from the local pack cache.
    pub bytes_cached: u64,
    /// Compressed size of every scheduled pack.
    pub bytes_total: u64,
    /// Trailing average network throughput.
    pub bytes_per_second: f64,
}

impl ProgressSnapshot {
    /// Progress as a percentage of compressed bytes.
    ///
    /// Falls back to file counts when sizes are unknown.
    pub fn percent(&self) -> f64 {
        if self.bytes_total == 0 {
            if self.files_total == 0 {
                100.0
            } else {
                (self.files_done as f64 / self.files_total as f64) * 100.0
            }
        } else {
            let done = (self.bytes_downloaded + self.bytes_cached).min(self.bytes_total);
            (done as f64 / self.bytes_total as f64) * 100.0
        }
    }
}

/// Sink for status and progress output.
pub trait Reporter: Send + Sync {
    /// A line that should stay visible.
    fn message(&self, text: &str);

    /// A transient status line, replaced by the next one.
    fn status(&self, text: &str) {
        self.message(text);
    }

    /// Periodic download progress.
    fn progress(&self, snapshot: &ProgressSnapshot);

    /// Called once when downloads stop, successfully or not.
    fn finish_progress(&self) {}
}

/// Sends everything to the `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn message(&self, text: &str) {
        info!("{}", text);
    }

    fn progress(&self, snapshot: &ProgressSnapshot) {
        info!(
            files_done = snapshot.files_done,
            files_total = snapshot.files_total,
            percent = format!("{:.1}", snapshot.percent()),
            bytes_per_second = snapshot.bytes_per_second as u64,
            "Download progress"
        );
    }
}

/// Discards all output.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn message(&self, _text: &str) {}

    fn progress(&self, _snapshot: &ProgressSnapshot) {}
}

/// Asks the user whether locally modified files may be overwritten.
pub trait Prompter: Send + Sync {
    /// Asked once for the whole batch of tampered files.
    fn confirm_overwrite(&self, files: &[String]) -> bool;
}

/// Answers every question with "no"; used when no terminal is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeclinePrompter;

impl Prompter for DeclinePrompter {
    fn confirm_overwrite(&self, _files: &[String]) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_by_bytes() {
        let snapshot = ProgressSnapshot {
            bytes_downloaded: 300,
            bytes_cached: 200,
            bytes_total: 1000,
            ..Default::default()
        };
        assert_eq!(snapshot.percent(), 50.0);
    }

    #[test]
    fn test_percent_by_files() {
        let snapshot = ProgressSnapshot {
            files_done: 1,
            files_total: 4,
            ..Default::default()
        };
        assert_eq!(snapshot.percent(), 25.0);
        assert_eq!(ProgressSnapshot::default().percent(), 100.0);
    }

    #[test]
    fn test_decline_prompter() {
        assert!(!DeclinePrompter.confirm_overwrite(&["a.bin".to_string()]));
    }
}
