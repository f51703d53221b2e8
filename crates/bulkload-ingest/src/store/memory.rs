//! In-process store with database-like transactional rules
//!
//! Unique ids per table, record references checked on insert and again on
//! commit, and exclusive per-item row locks held until the owning
//! transaction ends. Lock waits are bounded by a timeout.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};

use super::{RecordTransaction, Store, StoreCounts, StoreError, StoreResult};
use crate::model::{CatalogItem, DatasetKind, Entity, Keyed, Record, StagedBatch};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct Tables {
    entities: HashMap<String, Entity>,
    items: HashMap<String, CatalogItem>,
    records: HashMap<String, Record>,
}

impl Tables {
    fn contains(&self, kind: DatasetKind, id: &str) -> bool {
        match kind {
            DatasetKind::Entities => self.entities.contains_key(id),
            DatasetKind::Items => self.items.contains_key(id),
            DatasetKind::Records => self.records.contains_key(id),
        }
    }

    fn check_reference(&self, record: &Record) -> StoreResult<()> {
        if !self.entities.contains_key(&record.entity_ref) {
            return Err(StoreError::ForeignKeyViolation(format!(
                "records.entity_ref {} not present in entities",
                record.entity_ref
            )));
        }
        if !self.items.contains_key(&record.item_ref) {
            return Err(StoreError::ForeignKeyViolation(format!(
                "records.item_ref {} not present in catalog_items",
                record.item_ref
            )));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Inner {
    tables: Mutex<Tables>,
    row_locks: Mutex<HashMap<String, Arc<RowLock<()>>>>,
    lock_timeout: Duration,
}

impl Inner {
    fn tables(&self) -> StoreResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Database("memory store tables poisoned".to_string()))
    }

    fn row_lock(&self, id: &str) -> StoreResult<Arc<RowLock<()>>> {
        let mut locks = self
            .row_locks
            .lock()
            .map_err(|_| StoreError::Database("memory store row locks poisoned".to_string()))?;
        Ok(Arc::clone(locks.entry(id.to_string()).or_default()))
    }

    /// Forget the locks of `ids` that nobody holds or waits on any more
    fn prune_row_locks<'a>(&self, ids: impl IntoIterator<Item = &'a String>) {
        let mut locks = self.row_locks.lock().unwrap_or_else(PoisonError::into_inner);
        for id in ids {
            if locks.get(id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
                locks.remove(id);
            }
        }
    }
}

/// Shared handle; clones see the same tables
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                tables: Mutex::new(Tables::default()),
                row_locks: Mutex::new(HashMap::new()),
                lock_timeout,
            }),
        }
    }

    pub fn contains(&self, kind: DatasetKind, id: &str) -> bool {
        self.inner.tables().map(|t| t.contains(kind, id)).unwrap_or(false)
    }

    pub fn record(&self, id: &str) -> Option<Record> {
        self.inner.tables().ok()?.records.get(id).cloned()
    }

    pub fn entity(&self, id: &str) -> Option<Entity> {
        self.inner.tables().ok()?.entities.get(id).cloned()
    }

    pub fn item(&self, id: &str) -> Option<CatalogItem> {
        self.inner.tables().ok()?.items.get(id).cloned()
    }

    /// Hold an item's row lock from outside any transaction until the
    /// returned guard is dropped
    pub async fn hold_item_lock(&self, id: &str) -> StoreResult<OwnedMutexGuard<()>> {
        Ok(self.inner.row_lock(id)?.lock_owned().await)
    }
}

fn duplicates<'a, T: Keyed + 'a>(
    rows: impl IntoIterator<Item = &'a T>,
    taken: impl Fn(&str) -> bool,
) -> Option<String> {
    let mut seen = HashSet::new();
    rows.into_iter()
        .map(Keyed::id)
        .find(|id| taken(id) || !seen.insert(*id))
        .map(str::to_string)
}

#[async_trait]
impl Store for MemoryStore {
    async fn existing_ids(&self, kind: DatasetKind, ids: &[String]) -> StoreResult<HashSet<String>> {
        let tables = self.inner.tables()?;
        Ok(ids.iter().filter(|id| tables.contains(kind, id)).cloned().collect())
    }

    async fn insert_batch(&self, batch: StagedBatch) -> StoreResult<usize> {
        let mut tables = self.inner.tables()?;
        let kind = batch.kind();
        let written = batch.len();

        match batch {
            StagedBatch::Entities(rows) => {
                if let Some(id) = duplicates(&rows, |id| tables.entities.contains_key(id)) {
                    return Err(StoreError::UniqueViolation(format!("{}.id {id}", kind.table())));
                }
                tables.entities.extend(rows.into_iter().map(|r| (r.id.clone(), r)));
            },
            StagedBatch::Items(rows) => {
                if let Some(id) = duplicates(&rows, |id| tables.items.contains_key(id)) {
                    return Err(StoreError::UniqueViolation(format!("{}.id {id}", kind.table())));
                }
                tables.items.extend(rows.into_iter().map(|r| (r.id.clone(), r)));
            },
        }

        Ok(written)
    }

    async fn begin(&self) -> StoreResult<Box<dyn RecordTransaction>> {
        Ok(Box::new(MemoryTransaction {
            inner: Arc::clone(&self.inner),
            pending: Vec::new(),
            held: HashMap::new(),
            active: true,
        }))
    }

    async fn counts(&self) -> StoreResult<StoreCounts> {
        let tables = self.inner.tables()?;
        Ok(StoreCounts {
            entities: tables.entities.len() as i64,
            items: tables.items.len() as i64,
            records: tables.records.len() as i64,
        })
    }
}

struct MemoryTransaction {
    inner: Arc<Inner>,
    pending: Vec<Record>,
    held: HashMap<String, OwnedMutexGuard<()>>,
    active: bool,
}

impl MemoryTransaction {
    fn ensure_active(&self) -> StoreResult<()> {
        if self.active {
            Ok(())
        } else {
            Err(StoreError::Closed)
        }
    }

    /// Re-check uniqueness and references against what is committed now
    fn apply_pending(&mut self) -> StoreResult<()> {
        let mut tables = self.inner.tables()?;
        if let Some(id) = duplicates(&self.pending, |id| tables.records.contains_key(id)) {
            return Err(StoreError::UniqueViolation(format!("records.id {id}")));
        }
        for record in &self.pending {
            tables.check_reference(record)?;
        }
        tables
            .records
            .extend(self.pending.drain(..).map(|r| (r.id.clone(), r)));
        Ok(())
    }

    fn finish(&mut self) {
        self.active = false;
        self.pending.clear();
        let released: Vec<String> = self.held.drain().map(|(id, _guard)| id).collect();
        self.inner.prune_row_locks(&released);
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if self.active {
            self.finish();
        }
    }
}

#[async_trait]
impl RecordTransaction for MemoryTransaction {
    async fn existing_record_ids(&mut self, ids: &[String]) -> StoreResult<HashSet<String>> {
        self.ensure_active()?;
        let tables = self.inner.tables()?;
        Ok(ids.iter().filter(|id| tables.records.contains_key(*id)).cloned().collect())
    }

    async fn entity_exists(&mut self, id: &str) -> StoreResult<bool> {
        self.ensure_active()?;
        Ok(self.inner.tables()?.entities.contains_key(id))
    }

    async fn lock_item(&mut self, id: &str) -> StoreResult<bool> {
        self.ensure_active()?;
        if self.held.contains_key(id) {
            return Ok(true);
        }
        if !self.inner.tables()?.items.contains_key(id) {
            return Ok(false);
        }

        let lock = self.inner.row_lock(id)?;
        let guard = tokio::time::timeout(self.inner.lock_timeout, lock.lock_owned())
            .await
            .map_err(|_| {
                StoreError::LockTimeout(format!(
                    "catalog_items {id} still locked after {}ms",
                    self.inner.lock_timeout.as_millis()
                ))
            })?;
        self.held.insert(id.to_string(), guard);
        Ok(true)
    }

    async fn insert_records(&mut self, records: Vec<Record>) -> StoreResult<usize> {
        self.ensure_active()?;
        let tables = self.inner.tables()?;

        let staged: HashSet<&str> = self.pending.iter().map(|r| r.id.as_str()).collect();
        if let Some(id) = duplicates(&records, |id| tables.records.contains_key(id) || staged.contains(id)) {
            return Err(StoreError::UniqueViolation(format!("records.id {id}")));
        }
        for record in &records {
            tables.check_reference(record)?;
        }
        drop(tables);

        let written = records.len();
        self.pending.extend(records);
        Ok(written)
    }

    async fn commit(&mut self) -> StoreResult<()> {
        self.ensure_active()?;
        let outcome = self.apply_pending();
        self.finish();
        outcome
    }

    async fn rollback(&mut self) -> StoreResult<()> {
        self.ensure_active()?;
        self.finish();
        Ok(())
    }
}
