use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use bucketdb::{
    Bucket,
    config::{StoreBackend, load_or_default},
    ingest,
};

#[derive(Args, Clone)]
pub struct ImportArgs {
    /// Bucket receiving the records
    pub bucket: String,

    /// JSON (object or list of objects) or CSV file
    pub file: PathBuf,
}

pub async fn execute(config_path: Option<PathBuf>, args: ImportArgs) -> Result<()> {
    let (config, _) = load_or_default(config_path)?;
    if config.store.backend == StoreBackend::Memory {
        tracing::warn!("the memory store is not persisted; imported records are discarded on exit");
    }
    let store = config.open_store()?;
    let bucket = Bucket::new(store, &args.bucket, config.allow_raw_queries(&args.bucket))?
        .with_write_attempts(config.write_attempts());

    let records = ingest::records_from_path(&args.file)
        .with_context(|| format!("failed to read records from {}", args.file.display()))?;
    let stored = tokio::task::spawn_blocking(move || bucket.store(records)).await??;

    println!("stored {stored} record(s) in {}", args.bucket);
    Ok(())
}
