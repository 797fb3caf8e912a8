//! devwatch CLI - run remote dev tools against a freshly deployed workload
//!
//! Resolves where a deployed application can be reached (an exposed service
//! URL or a local port forward) and supervises the remote dev-tools client
//! connected to it.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::TargetArgs;

#[derive(Parser)]
#[command(name = "devwatch")]
#[command(author, version, about = "Run remote dev tools against a deployed workload")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (default: ~/.devwatch/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve the endpoint and run the remote dev tools client until it exits
    Watch {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Resolve and print the endpoint; a port forward stays up until Ctrl-C
    Resolve {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Show or change the configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Set how many seconds to wait for the first exposed service URL
    SetWait { seconds: u32 },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let store = commands::config_store(cli.config)?;

    match cli.command {
        Commands::Watch { target } => commands::watch::run(&store, target, cli.json).await?,
        Commands::Resolve { target } => commands::resolve::run(&store, target, cli.json).await?,
        Commands::Config { action } => match action.unwrap_or(ConfigAction::Show) {
            ConfigAction::Show => commands::config::show(&store, cli.json).await?,
            ConfigAction::SetWait { seconds } => commands::config::set_wait(&store, seconds).await?,
        },
    }

    Ok(())
}

/// Logs go to stderr so stdout only carries results.
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
