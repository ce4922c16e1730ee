//! gitdeps - fetch a workspace's binary dependencies.

mod commands;
mod error;
mod terminal;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use gitdeps::cancel::CancellationFlag;
use gitdeps::logging::init_logging;

use commands::cache::CacheAction;
use commands::sync::SyncArgs;
use error::CliError;

#[derive(Parser)]
#[command(name = "gitdeps")]
#[command(version)]
#[command(about = "Download the binary files declared in a workspace's dependency manifests")]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    sync: SyncArgs,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only print errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Also write logs to this file
    #[arg(long, value_name = "PATH", global = true)]
    log_file: Option<PathBuf>,

    /// Read defaults from this config file instead of the user's config.ini
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Synchronize the workspace (the default)
    Sync(SyncArgs),
    /// Inspect or purge the pack cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            terminal::print_error(&e.to_string());
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let _logging = init_logging(cli.verbose, cli.log_file.as_deref())
        .map_err(|e| CliError::Logging(e.to_string()))?;

    match cli.command {
        Some(Commands::Cache { action }) => commands::cache::run(action, cli.config),
        Some(Commands::Sync(args)) => sync(args, cli.config, cli.quiet),
        None => sync(cli.sync, cli.config, cli.quiet),
    }
}

fn sync(args: SyncArgs, config: Option<PathBuf>, quiet: bool) -> Result<(), CliError> {
    let cancel = CancellationFlag::new();
    let handler_flag = cancel.clone();
    ctrlc::set_handler(move || {
        terminal::print_warning("Stopping", "waiting for downloads to wind down...");
        handler_flag.cancel();
    })
    .map_err(|e| CliError::Config(format!("failed to set Ctrl-C handler: {}", e)))?;

    commands::sync::run(args, config, quiet, cancel)
}
