//! Bulkload Ingest - load entities, catalog items and records from CSV files

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use bulkload_common::logging::{init_logging, LogConfig, LogLevel};
use bulkload_ingest::{DatasetKind, DbConfig, IngestionCoordinator, InputFile, MemoryStore, PgStore, Store, UploadSet};
use clap::Parser;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "bulkload-ingest")]
#[command(author, version, about = "Bulk CSV ingestion tool")]
struct Cli {
    /// Entities CSV (id, name, email)
    #[arg(long)]
    entities: Option<PathBuf>,

    /// Catalog items CSV (id, name, price)
    #[arg(long)]
    items: Option<PathBuf>,

    /// Records CSV (id, entity_ref, item_ref, quantity)
    #[arg(long)]
    records: Option<PathBuf>,

    /// Load into an in-memory store instead of PostgreSQL
    #[arg(long)]
    dry_run: bool,

    /// Create the tables before loading if they do not exist
    #[arg(long, conflicts_with = "dry_run")]
    init_schema: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the flags
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("bulkload-ingest")
        .build()
        .merge_env()?;

    let _log_guard = init_logging(&log_config)?;

    let store: Arc<dyn Store> = if cli.dry_run {
        info!("Dry run: loading into an in-memory store");
        Arc::new(MemoryStore::new())
    } else {
        let config = DbConfig::from_env().context("Failed to load database configuration")?;
        let store = PgStore::connect(&config).await.context("Failed to connect to database")?;
        if cli.init_schema {
            store.ensure_schema().await.context("Failed to create schema")?;
        }
        Arc::new(store)
    };

    let mut uploads = UploadSet::default();
    for (kind, path) in [
        (DatasetKind::Entities, cli.entities),
        (DatasetKind::Items, cli.items),
        (DatasetKind::Records, cli.records),
    ] {
        if let Some(path) = path {
            uploads.insert(kind, InputFile::from_path(path));
        }
    }

    let report = IngestionCoordinator::new(store).run(uploads).await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    info!(
        created = report.total_created(),
        errors = report.total_errors(),
        "Ingestion complete"
    );
    Ok(())
}
