//! CLI error type.

use std::fmt;

use gitdeps::SyncError;

/// Anything that makes the `gitdeps` command fail.
#[derive(Debug)]
pub enum CliError {
    /// Bad or conflicting settings.
    Config(String),
    /// Logging could not be initialized.
    Logging(String),
    /// Reading or purging the pack cache failed.
    Cache(String),
    /// The sync itself failed.
    Sync(SyncError),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "configuration error: {}", msg),
            CliError::Logging(msg) => write!(f, "failed to initialize logging: {}", msg),
            CliError::Cache(msg) => write!(f, "cache error: {}", msg),
            CliError::Sync(SyncError::Cancelled) => write!(f, "cancelled"),
            CliError::Sync(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Sync(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SyncError> for CliError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::InvalidConfig(msg) => CliError::Config(msg),
            other => CliError::Sync(other),
        }
    }
}
