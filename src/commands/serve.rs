use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use bucketdb::{
    config::{ConfigUpdate, load_or_default},
    server,
};

#[derive(Args, Clone, Default)]
pub struct ServeArgs {
    /// Override the configured server port
    #[arg(long)]
    pub port: Option<u16>,

    /// Override the configured bind address
    #[arg(long = "bind")]
    pub bind_addr: Option<String>,
}

pub async fn execute(config_path: Option<PathBuf>, args: ServeArgs) -> Result<()> {
    let (mut config, path) = load_or_default(config_path)?;
    config.apply_update(ConfigUpdate {
        port: args.port,
        bind_addr: args.bind_addr,
    });
    tracing::info!(config = %path.display(), "loaded configuration");
    server::run(config).await?;
    Ok(())
}
