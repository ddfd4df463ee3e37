mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::commands::{import::ImportArgs, serve::ServeArgs};

#[derive(Parser)]
#[command(author, version, about = "bucketdb time-series document store")]
struct Cli {
    /// Path to the configuration file. Defaults to ~/.bucketdb/config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server in the foreground
    Serve(ServeArgs),
    /// Load a JSON or CSV file into a bucket
    Import(ImportArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let Cli { config, command } = Cli::parse();

    match command {
        Commands::Serve(args) => commands::serve::execute(config, args).await?,
        Commands::Import(args) => commands::import::execute(config, args).await?,
    }

    Ok(())
}
