//! CLI command implementations.

pub mod cache;
pub mod sync;

use std::path::{Path, PathBuf};

use gitdeps::config::{proxy_from_env, ConfigFile, SyncConfig};

use crate::error::CliError;

/// Build the configuration for `root` from defaults, the user config file
/// and the environment. Command-line flags are applied by the caller.
pub fn base_config(root: &Path, config_file: Option<&Path>) -> Result<SyncConfig, CliError> {
    let file = match config_file {
        Some(path) => ConfigFile::load_from(path)?,
        None => ConfigFile::load()?,
    };

    let mut config = file.apply(SyncConfig::new(absolute(root)?));
    if config.proxy.is_none() {
        config.proxy = proxy_from_env();
    }
    Ok(config)
}

fn absolute(path: &Path) -> Result<PathBuf, CliError> {
    std::path::absolute(path)
        .map_err(|e| CliError::Config(format!("invalid root {}: {}", path.display(), e)))
}
