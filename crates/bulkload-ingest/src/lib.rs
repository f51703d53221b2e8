//! Bulkload ingestion core
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Loads three related CSV datasets into a store in one run:
//!
//! - **entities** (`id`, `name`, `email`) and **catalog items** (`id`, `name`,
//!   `price`) ingest concurrently
//! - **records** (`id`, `entity_ref`, `item_ref`, `quantity`) ingest afterwards,
//!   inside one transaction, resolving references against what the first two
//!   committed
//!
//! Duplicate detection for all three runs under a single process-wide
//! [`DuplicateGuard`]. Row problems are collected per dataset into a
//! [`Report`]; only a missing upload fails a run outright.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bulkload_ingest::{IngestionCoordinator, InputFile, MemoryStore, UploadSet};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let coordinator = IngestionCoordinator::new(Arc::new(MemoryStore::new()));
//! let uploads = UploadSet::new(
//!     InputFile::from_path("entities.csv"),
//!     InputFile::from_path("items.csv"),
//!     InputFile::from_path("records.csv"),
//! );
//! let report = coordinator.run(uploads).await?;
//! println!("{}", serde_json::to_string_pretty(&report)?);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod csv_source;
pub mod error;
pub mod guard;
pub mod model;
pub mod pipeline;
pub mod report;
pub mod store;
pub mod validation;

pub use config::DbConfig;
pub use coordinator::{IngestionCoordinator, UploadSet};
pub use csv_source::InputFile;
pub use error::{CoordinatorError, DatasetError, RowError};
pub use guard::DuplicateGuard;
pub use model::DatasetKind;
pub use pipeline::PipelineOutcome;
pub use report::Report;
pub use store::{MemoryStore, PgStore, Store, StoreCounts, StoreError};
