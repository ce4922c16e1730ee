//! Terminal rendering of sync output.
//!
//! Cargo-style status lines on stderr and a single byte-based progress bar
//! while packs download:
//! ```text
//!     Scanning Engine/Build/Engine.gitdeps.xml
//!  Downloading [=========>          ] 41.20 MiB/88.03 MiB 212/480 files, 9.8 MiB/s
//!      Updated 480 file(s), removed 3, kept 12031
//! ```

use std::sync::OnceLock;
use std::time::Duration;

use console::{Style, Term};
use dialoguer::Confirm;
use gitdeps::report::{ProgressSnapshot, Prompter, Reporter};
use indicatif::{HumanBytes, ProgressBar, ProgressDrawTarget, ProgressStyle};

const BAR_TEMPLATE: &str =
    "{prefix:>12.green.bold} [{bar:30.cyan/dim}] {bytes}/{total_bytes} {msg}";

/// Print a right-aligned, colored verb followed by a message.
pub fn print_status(verb: &str, message: &str) {
    print_styled(Style::new().green().bold(), verb, message);
}

/// Like [`print_status`], in yellow.
pub fn print_warning(verb: &str, message: &str) {
    print_styled(Style::new().yellow().bold(), verb, message);
}

/// Like [`print_status`], in red, for the final error.
pub fn print_error(message: &str) {
    print_styled(Style::new().red().bold(), "error:", message);
}

fn print_styled(style: Style, verb: &str, message: &str) {
    let _ = Term::stderr().write_line(&format!("{:>12} {}", style.apply_to(verb), message));
}

/// [`Reporter`] that draws on stderr.
pub struct TerminalReporter {
    bar: OnceLock<ProgressBar>,
    hidden: bool,
}

impl TerminalReporter {
    /// `hidden` suppresses the progress bar, for non-interactive output.
    pub fn new(hidden: bool) -> Self {
        Self {
            bar: OnceLock::new(),
            hidden: hidden || !Term::stderr().is_term(),
        }
    }

    fn bar(&self, snapshot: &ProgressSnapshot) -> &ProgressBar {
        self.bar.get_or_init(|| {
            let bar = if self.hidden {
                ProgressBar::with_draw_target(
                    Some(snapshot.bytes_total),
                    ProgressDrawTarget::hidden(),
                )
            } else {
                ProgressBar::new(snapshot.bytes_total)
            };
            let style = ProgressStyle::default_bar()
                .template(BAR_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> ");
            bar.set_style(style);
            bar.set_prefix("Downloading");
            bar.enable_steady_tick(Duration::from_millis(100));
            bar
        })
    }

    fn active_bar(&self) -> Option<&ProgressBar> {
        self.bar.get().filter(|bar| !bar.is_finished())
    }
}

impl Reporter for TerminalReporter {
    fn message(&self, text: &str) {
        match self.active_bar() {
            Some(bar) if !self.hidden => bar.println(text),
            _ => {
                let _ = Term::stderr().write_line(text);
            }
        }
    }

    fn status(&self, text: &str) {
        match self.active_bar() {
            Some(_) => {}
            None if self.hidden => {}
            None => print_status("Working", text),
        }
    }

    fn progress(&self, snapshot: &ProgressSnapshot) {
        let bar = self.bar(snapshot);
        bar.set_length(snapshot.bytes_total);
        let done = snapshot.bytes_downloaded + snapshot.bytes_cached;
        bar.set_position(done.min(snapshot.bytes_total));
        bar.set_message(format!(
            "{}/{} files, {}/s",
            snapshot.files_done,
            snapshot.files_total,
            HumanBytes(snapshot.bytes_per_second as u64)
        ));
    }

    fn finish_progress(&self) {
        if let Some(bar) = self.active_bar() {
            bar.finish_and_clear();
        }
    }
}

/// Asks on the terminal before overwriting modified files.
///
/// Without an interactive terminal the answer is always "no".
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn confirm_overwrite(&self, files: &[String]) -> bool {
        let term = Term::stderr();
        if !term.is_term() {
            return false;
        }

        print_warning("Modified", &format!("{} file(s) changed locally:", files.len()));
        for name in files {
            let _ = term.write_line(&format!("{:>12} {}", "", name));
        }

        Confirm::new()
            .with_prompt("Overwrite them with the versions from the manifest?")
            .default(false)
            .interact_on(&term)
            .unwrap_or(false)
    }
}
