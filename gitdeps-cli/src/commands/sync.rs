//! The default command: bring the workspace in line with its manifests.

use std::path::PathBuf;
use std::time::Instant;

use clap::Args;
use gitdeps::cancel::CancellationFlag;
use gitdeps::config::OverwriteMode;
use gitdeps::Synchronizer;
use indicatif::HumanBytes;
use tracing::{info, warn};

use crate::error::CliError;
use crate::terminal::{print_status, print_warning, TerminalPrompter, TerminalReporter};

/// Flags of a sync run.
#[derive(Debug, Args)]
pub struct SyncArgs {
    /// Workspace root containing the dependency manifests
    #[arg(default_value = ".")]
    pub root: PathBuf,

    /// Number of parallel download threads
    #[arg(long, value_name = "N")]
    pub threads: Option<usize>,

    /// Retries per download thread before it gives up
    #[arg(long, value_name = "N")]
    pub max_retries: Option<u32>,

    /// Pack cache directory (default: <root>/.git/gitdeps)
    #[arg(long, value_name = "DIR", conflicts_with = "no_cache")]
    pub cache: Option<PathBuf>,

    /// Do not read or populate the pack cache
    #[arg(long)]
    pub no_cache: bool,

    /// Cache size to keep, as a multiple of the packs the manifests use
    #[arg(long, value_name = "FACTOR")]
    pub cache_size_multiplier: Option<f64>,

    /// Days an unused pack stays in the cache
    #[arg(long, value_name = "DAYS")]
    pub cache_days: Option<u64>,

    /// HTTP proxy, optionally with credentials (user:pass@host:port)
    #[arg(long, value_name = "URL")]
    pub proxy: Option<String>,

    /// Overwrite locally modified files without asking
    #[arg(long, conflicts_with = "prompt")]
    pub force: bool,

    /// Ask before overwriting locally modified files
    #[arg(long)]
    pub prompt: bool,

    /// Report what would change without touching anything
    #[arg(long)]
    pub dry_run: bool,

    /// Never add, update or remove files under this folder (repeatable)
    #[arg(long = "exclude", value_name = "FOLDER")]
    pub excluded: Vec<String>,
}

impl SyncArgs {
    fn overwrite_mode(&self) -> OverwriteMode {
        if self.force {
            OverwriteMode::Force
        } else if self.prompt {
            OverwriteMode::Prompt
        } else {
            OverwriteMode::Unchanged
        }
    }
}

/// Run a sync.
pub fn run(
    args: SyncArgs,
    config_file: Option<PathBuf>,
    quiet: bool,
    cancel: CancellationFlag,
) -> Result<(), CliError> {
    let mut config = super::base_config(&args.root, config_file.as_deref())?;

    if let Some(threads) = args.threads {
        config = config.with_threads(threads);
    }
    if let Some(retries) = args.max_retries {
        config = config.with_max_retries(retries);
    }
    if let Some(dir) = &args.cache {
        config = config.with_cache_dir(Some(dir.clone()));
    }
    if args.no_cache {
        config = config.with_cache_dir(None);
    }
    if let Some(multiplier) = args.cache_size_multiplier {
        config = config.with_cache_size_multiplier(multiplier);
    }
    if let Some(days) = args.cache_days {
        config = config.with_cache_days(days);
    }
    if args.proxy.is_some() {
        config = config.with_proxy(args.proxy.clone());
    }
    for folder in &args.excluded {
        config = config.with_excluded_folder(folder.clone());
    }
    config = config
        .with_overwrite(args.overwrite_mode())
        .with_dry_run(args.dry_run);

    info!(
        root = %config.root_dir.display(),
        threads = config.threads,
        cache = ?config.cache_dir,
        proxy = config.proxy.is_some(),
        "Starting sync"
    );

    let reporter = TerminalReporter::new(quiet);
    let started = Instant::now();
    let summary = Synchronizer::new(config, &reporter)
        .with_prompter(Box::new(TerminalPrompter))
        .with_cancellation(cancel)
        .run()?;

    if quiet {
        return Ok(());
    }

    if summary.is_noop() {
        print_status("Fresh", "all files up to date");
    } else if summary.dry_run {
        print_warning("Dry run", &summary.to_string());
    } else {
        print_status(
            "Synced",
            &format!(
                "{} in {:.2}s ({} downloaded)",
                summary,
                started.elapsed().as_secs_f64(),
                HumanBytes(summary.bytes_downloaded)
            ),
        );
    }

    if summary.files_skipped > 0 {
        warn!(skipped = summary.files_skipped, "Locally modified files were left unchanged");
        print_warning(
            "Skipped",
            &format!(
                "{} modified file(s); rerun with --force or --prompt to overwrite",
                summary.files_skipped
            ),
        );
    }

    if let Some(purge) = &summary.purge {
        if purge.files_removed > 0 {
            print_status(
                "Purged",
                &format!(
                    "{} cached pack(s), freed {}",
                    purge.files_removed,
                    HumanBytes(purge.bytes_freed)
                ),
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: SyncArgs,
    }

    #[test]
    fn test_overwrite_mode_from_flags() {
        let parse = |flags: &[&str]| {
            let argv = std::iter::once("gitdeps").chain(flags.iter().copied());
            Harness::try_parse_from(argv).map(|h| h.args.overwrite_mode())
        };

        assert_eq!(parse(&[]).ok(), Some(OverwriteMode::Unchanged));
        assert_eq!(parse(&["--force"]).ok(), Some(OverwriteMode::Force));
        assert_eq!(parse(&["--prompt"]).ok(), Some(OverwriteMode::Prompt));
        assert!(parse(&["--force", "--prompt"]).is_err());
    }

    #[test]
    fn test_repeatable_exclude() {
        let harness =
            Harness::try_parse_from(["gitdeps", "ws", "--exclude", "A", "--exclude", "B/C"])
                .unwrap();
        assert_eq!(harness.args.root, PathBuf::from("ws"));
        assert_eq!(harness.args.excluded, vec!["A", "B/C"]);
    }

    #[test]
    fn test_cache_flags_conflict() {
        assert!(Harness::try_parse_from(["gitdeps", "--cache", "/c", "--no-cache"]).is_err());
    }
}
