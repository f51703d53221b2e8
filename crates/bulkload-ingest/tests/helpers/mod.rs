//! Shared fixtures for ingestion integration tests

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bulkload_ingest::model::{DatasetKind, Record, StagedBatch};
use bulkload_ingest::store::{RecordTransaction, StoreResult};
use bulkload_ingest::{
    DuplicateGuard, IngestionCoordinator, InputFile, MemoryStore, Store, StoreCounts, StoreError, UploadSet,
};

pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,bulkload_ingest=debug")),
        )
        .with_test_writer()
        .try_init();
}

pub fn uploads(entities: &str, items: &str, records: &str) -> UploadSet {
    UploadSet::new(
        InputFile::from_bytes("entities.csv", entities),
        InputFile::from_bytes("items.csv", items),
        InputFile::from_bytes("records.csv", records),
    )
}

/// Coordinator over `store` with its own guard, so parallel tests never
/// contend on the process-wide one
pub fn coordinator(store: Arc<dyn Store>) -> IngestionCoordinator {
    IngestionCoordinator::with_guard(store, Arc::new(DuplicateGuard::new()))
}

/// What a [`FaultyStore`] should break
#[derive(Debug, Clone, Copy, Default)]
pub struct Faults {
    /// `existing_ids` panics for this dataset
    pub panic_on_lookup: Option<DatasetKind>,
    /// `insert_records` fails after resolution succeeded
    pub fail_record_insert: bool,
    /// `insert_batch` sleeps this long before writing
    pub insert_delay: Option<Duration>,
}

/// Wraps a [`MemoryStore`] and injects failures
pub struct FaultyStore {
    pub inner: MemoryStore,
    faults: Faults,
}

impl FaultyStore {
    pub fn new(inner: MemoryStore, faults: Faults) -> Self {
        Self { inner, faults }
    }
}

#[async_trait]
impl Store for FaultyStore {
    async fn existing_ids(&self, kind: DatasetKind, ids: &[String]) -> StoreResult<HashSet<String>> {
        if self.faults.panic_on_lookup == Some(kind) {
            panic!("injected lookup panic for {kind}");
        }
        self.inner.existing_ids(kind, ids).await
    }

    async fn insert_batch(&self, batch: StagedBatch) -> StoreResult<usize> {
        if let Some(delay) = self.faults.insert_delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.insert_batch(batch).await
    }

    async fn begin(&self) -> StoreResult<Box<dyn RecordTransaction>> {
        let tx = self.inner.begin().await?;
        if self.faults.fail_record_insert {
            Ok(Box::new(FailingInsert { inner: tx }))
        } else {
            Ok(tx)
        }
    }

    async fn counts(&self) -> StoreResult<StoreCounts> {
        self.inner.counts().await
    }
}

/// Resolves normally, stages into the real transaction, then reports failure
struct FailingInsert {
    inner: Box<dyn RecordTransaction>,
}

#[async_trait]
impl RecordTransaction for FailingInsert {
    async fn existing_record_ids(&mut self, ids: &[String]) -> StoreResult<HashSet<String>> {
        self.inner.existing_record_ids(ids).await
    }

    async fn entity_exists(&mut self, id: &str) -> StoreResult<bool> {
        self.inner.entity_exists(id).await
    }

    async fn lock_item(&mut self, id: &str) -> StoreResult<bool> {
        self.inner.lock_item(id).await
    }

    async fn insert_records(&mut self, records: Vec<Record>) -> StoreResult<usize> {
        let staged = records.len();
        self.inner.insert_records(records).await?;
        Err(StoreError::Database(format!("injected failure after staging {staged} records")))
    }

    async fn commit(&mut self) -> StoreResult<()> {
        self.inner.commit().await
    }

    async fn rollback(&mut self) -> StoreResult<()> {
        self.inner.rollback().await
    }
}
