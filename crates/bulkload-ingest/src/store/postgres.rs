//! PostgreSQL backend
//!
//! Batches are written with multi-row `INSERT`s built by [`QueryBuilder`],
//! chunked to stay under the bind parameter limit, all inside one transaction.
//! Relational transactions bound their row lock waits with a transaction-local
//! `lock_timeout`.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder, Transaction};

use super::{RecordTransaction, Store, StoreCounts, StoreError, StoreResult};
use crate::config::DbConfig;
use crate::model::{CatalogItem, DatasetKind, Entity, Record, StagedBatch};

const SCHEMA: [&str; 3] = [
    r#"
    CREATE TABLE IF NOT EXISTS entities (
        id    TEXT PRIMARY KEY,
        name  TEXT NOT NULL,
        email TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS catalog_items (
        id    TEXT PRIMARY KEY,
        name  TEXT NOT NULL,
        price DOUBLE PRECISION NOT NULL CHECK (price > 0)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS records (
        id         TEXT PRIMARY KEY,
        entity_ref TEXT NOT NULL REFERENCES entities (id),
        item_ref   TEXT NOT NULL REFERENCES catalog_items (id),
        quantity   INTEGER NOT NULL CHECK (quantity > 0)
    )
    "#,
];

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db) = err {
            let message = db.message().to_string();
            if db.is_unique_violation() {
                return StoreError::UniqueViolation(message);
            }
            if db.is_foreign_key_violation() {
                return StoreError::ForeignKeyViolation(message);
            }
            match db.code().as_deref() {
                Some("55P03") => return StoreError::LockTimeout(message),
                Some("40P01") => return StoreError::Deadlock(message),
                _ => {},
            }
        }
        StoreError::Database(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    lock_timeout_ms: u64,
    insert_chunk_size: usize,
}

impl PgStore {
    pub async fn connect(config: &DbConfig) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await?;

        tracing::info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            lock_timeout_ms = config.lock_timeout_ms,
            "Database connection pool created"
        );

        Ok(Self::from_pool(pool, config))
    }

    pub fn from_pool(pool: PgPool, config: &DbConfig) -> Self {
        Self {
            pool,
            lock_timeout_ms: config.lock_timeout_ms,
            insert_chunk_size: config.insert_chunk_size.max(1),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the three tables when they do not exist yet
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::info!("Schema ensured");
        Ok(())
    }

    pub async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

async fn insert_entities(
    tx: &mut Transaction<'_, Postgres>,
    rows: &[Entity],
    chunk_size: usize,
) -> StoreResult<()> {
    for chunk in rows.chunks(chunk_size) {
        let mut query_builder: QueryBuilder<Postgres> =
            QueryBuilder::new("INSERT INTO entities (id, name, email) ");
        query_builder.push_values(chunk, |mut b, entity| {
            b.push_bind(&entity.id)
                .push_bind(&entity.name)
                .push_bind(&entity.email);
        });
        query_builder.build().execute(&mut **tx).await?;
    }
    Ok(())
}

async fn insert_items(
    tx: &mut Transaction<'_, Postgres>,
    rows: &[CatalogItem],
    chunk_size: usize,
) -> StoreResult<()> {
    for chunk in rows.chunks(chunk_size) {
        let mut query_builder: QueryBuilder<Postgres> =
            QueryBuilder::new("INSERT INTO catalog_items (id, name, price) ");
        query_builder.push_values(chunk, |mut b, item| {
            b.push_bind(&item.id).push_bind(&item.name).push_bind(item.price);
        });
        query_builder.build().execute(&mut **tx).await?;
    }
    Ok(())
}

async fn insert_record_rows(
    tx: &mut Transaction<'_, Postgres>,
    rows: &[Record],
    chunk_size: usize,
) -> StoreResult<()> {
    for chunk in rows.chunks(chunk_size) {
        let mut query_builder: QueryBuilder<Postgres> =
            QueryBuilder::new("INSERT INTO records (id, entity_ref, item_ref, quantity) ");
        query_builder.push_values(chunk, |mut b, record| {
            b.push_bind(&record.id)
                .push_bind(&record.entity_ref)
                .push_bind(&record.item_ref)
                .push_bind(record.quantity);
        });
        query_builder.build().execute(&mut **tx).await?;
    }
    Ok(())
}

#[async_trait]
impl Store for PgStore {
    async fn existing_ids(&self, kind: DatasetKind, ids: &[String]) -> StoreResult<HashSet<String>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let sql = format!("SELECT id FROM {} WHERE id = ANY($1)", kind.table());
        let found: Vec<String> = sqlx::query_scalar(&sql).bind(ids).fetch_all(&self.pool).await?;
        Ok(found.into_iter().collect())
    }

    async fn insert_batch(&self, batch: StagedBatch) -> StoreResult<usize> {
        let written = batch.len();
        if written == 0 {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        match &batch {
            StagedBatch::Entities(rows) => insert_entities(&mut tx, rows, self.insert_chunk_size).await?,
            StagedBatch::Items(rows) => insert_items(&mut tx, rows, self.insert_chunk_size).await?,
        }
        tx.commit().await?;

        tracing::debug!(table = batch.kind().table(), rows = written, "Batch committed");
        Ok(written)
    }

    async fn begin(&self) -> StoreResult<Box<dyn RecordTransaction>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.lock_timeout_ms))
            .execute(&mut *tx)
            .await?;

        Ok(Box::new(PgRecordTransaction {
            tx: Some(tx),
            chunk_size: self.insert_chunk_size,
        }))
    }

    async fn counts(&self) -> StoreResult<StoreCounts> {
        let (entities, items, records): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM entities),
                (SELECT COUNT(*) FROM catalog_items),
                (SELECT COUNT(*) FROM records)
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(StoreCounts {
            entities,
            items,
            records,
        })
    }
}

/// Dropping the inner `sqlx` transaction without commit rolls it back
struct PgRecordTransaction {
    tx: Option<Transaction<'static, Postgres>>,
    chunk_size: usize,
}

impl PgRecordTransaction {
    fn active(&mut self) -> StoreResult<&mut Transaction<'static, Postgres>> {
        self.tx.as_mut().ok_or(StoreError::Closed)
    }
}

#[async_trait]
impl RecordTransaction for PgRecordTransaction {
    async fn existing_record_ids(&mut self, ids: &[String]) -> StoreResult<HashSet<String>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let tx = self.active()?;
        let found: Vec<String> = sqlx::query_scalar("SELECT id FROM records WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&mut **tx)
            .await?;
        Ok(found.into_iter().collect())
    }

    async fn entity_exists(&mut self, id: &str) -> StoreResult<bool> {
        let tx = self.active()?;
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM entities WHERE id = $1)")
            .bind(id)
            .fetch_one(&mut **tx)
            .await?;
        Ok(exists)
    }

    async fn lock_item(&mut self, id: &str) -> StoreResult<bool> {
        let tx = self.active()?;
        let locked: Option<String> = sqlx::query_scalar("SELECT id FROM catalog_items WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(locked.is_some())
    }

    async fn insert_records(&mut self, records: Vec<Record>) -> StoreResult<usize> {
        let chunk_size = self.chunk_size;
        let tx = self.active()?;
        insert_record_rows(tx, &records, chunk_size).await?;
        Ok(records.len())
    }

    async fn commit(&mut self) -> StoreResult<()> {
        let tx = self.tx.take().ok_or(StoreError::Closed)?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&mut self) -> StoreResult<()> {
        let tx = self.tx.take().ok_or(StoreError::Closed)?;
        tx.rollback().await?;
        Ok(())
    }
}
