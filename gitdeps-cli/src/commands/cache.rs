//! Pack cache management commands.

use std::path::PathBuf;
use std::time::Duration;

use clap::Subcommand;
use gitdeps::cache::PackCache;
use indicatif::HumanBytes;

use crate::error::CliError;
use crate::terminal::print_status;

/// Cache action subcommands.
#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Show pack cache statistics
    Stats {
        /// Workspace root whose cache to inspect
        #[arg(default_value = ".")]
        root: PathBuf,
    },
    /// Remove cached packs that have not been used recently
    Purge {
        /// Workspace root whose cache to purge
        #[arg(default_value = ".")]
        root: PathBuf,
        /// Bytes of recently used packs to keep regardless of age
        #[arg(long, value_name = "BYTES", default_value_t = 0)]
        keep_bytes: u64,
        /// Evict packs unused for this many days (default: configured value)
        #[arg(long, value_name = "DAYS")]
        days: Option<u64>,
    },
}

/// Run a cache subcommand.
pub fn run(action: CacheAction, config_file: Option<PathBuf>) -> Result<(), CliError> {
    match action {
        CacheAction::Stats { root } => {
            let config = super::base_config(&root, config_file.as_deref())?;
            let cache = open_cache(config.cache_dir)?;
            let (files, bytes) = cache.stats().map_err(|e| CliError::Cache(e.to_string()))?;

            println!("Pack cache: {}", cache.root().display());
            println!("  Packs: {}", files);
            println!("  Size:  {}", HumanBytes(bytes));
            Ok(())
        }
        CacheAction::Purge {
            root,
            keep_bytes,
            days,
        } => {
            let config = super::base_config(&root, config_file.as_deref())?;
            let max_age = days
                .map(|d| Duration::from_secs(d * 24 * 60 * 60))
                .unwrap_or(config.cache_max_age);
            let cache = open_cache(config.cache_dir)?;

            let result = cache
                .purge(keep_bytes, max_age)
                .map_err(|e| CliError::Cache(e.to_string()))?;

            print_status(
                "Purged",
                &format!(
                    "{} pack(s), freed {}, {} retained",
                    result.files_removed,
                    HumanBytes(result.bytes_freed),
                    HumanBytes(result.bytes_retained)
                ),
            );
            Ok(())
        }
    }
}

fn open_cache(dir: Option<PathBuf>) -> Result<PackCache, CliError> {
    dir.filter(|d| d.is_dir())
        .map(PackCache::new)
        .ok_or_else(|| CliError::Config("the pack cache is disabled or does not exist yet".to_string()))
}
