//! Storage seam for ingestion
//!
//! Pipelines only talk to the store through [`Store`] and, for the relational
//! dataset, through one [`RecordTransaction`] per batch. Two backends exist:
//!
//! - [`PgStore`]: PostgreSQL through `sqlx`, row locks via `SELECT ... FOR UPDATE`
//! - [`MemoryStore`]: an in-process store with the same transactional rules

use std::collections::HashSet;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::model::{DatasetKind, Record, StagedBatch};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Failures reported by a store backend
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("foreign key constraint violated: {0}")]
    ForeignKeyViolation(String),

    #[error("lock wait timed out: {0}")]
    LockTimeout(String),

    #[error("deadlock detected: {0}")]
    Deadlock(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("transaction is no longer active")]
    Closed,
}

/// Row totals per table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub entities: i64,
    pub items: i64,
    pub records: i64,
}

/// The persistent store the pipelines commit into
#[async_trait]
pub trait Store: Send + Sync {
    /// Subset of `ids` already committed in the table for `kind`
    async fn existing_ids(&self, kind: DatasetKind, ids: &[String]) -> StoreResult<HashSet<String>>;

    /// Insert a whole batch atomically; returns the number of rows written
    async fn insert_batch(&self, batch: StagedBatch) -> StoreResult<usize>;

    /// Open the transaction a relational batch is resolved and committed in
    async fn begin(&self) -> StoreResult<Box<dyn RecordTransaction>>;

    async fn counts(&self) -> StoreResult<StoreCounts>;
}

/// One relational batch's transaction
///
/// Dropping a transaction without calling [`RecordTransaction::commit`]
/// discards its writes and releases its row locks.
#[async_trait]
pub trait RecordTransaction: Send {
    async fn existing_record_ids(&mut self, ids: &[String]) -> StoreResult<HashSet<String>>;

    async fn entity_exists(&mut self, id: &str) -> StoreResult<bool>;

    /// Take an exclusive row lock on a catalog item until the transaction
    /// ends; returns `false` (and locks nothing) when the item is absent
    async fn lock_item(&mut self, id: &str) -> StoreResult<bool>;

    async fn insert_records(&mut self, records: Vec<Record>) -> StoreResult<usize>;

    async fn commit(&mut self) -> StoreResult<()>;

    async fn rollback(&mut self) -> StoreResult<()>;
}
