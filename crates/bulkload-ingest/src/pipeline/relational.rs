//! Records: one transaction per batch
//!
//! Resolution runs under the shared guard inside the transaction. Each
//! referenced catalog item is row-locked on first use and stays locked until
//! the transaction ends. The batch commits only if the insert succeeds; any
//! store failure rolls back the whole batch.

use std::collections::{HashMap, HashSet};

use tracing::Instrument;

use super::{finish, load, PipelineContext, PipelineOutcome};
use crate::csv_source::InputFile;
use crate::error::{DatasetError, RowError};
use crate::guard::DuplicateGuard;
use crate::model::{DatasetKind, Record};
use crate::store::{RecordTransaction, StoreError, StoreResult};
use crate::validation::RecordValidator;

const KIND: DatasetKind = DatasetKind::Records;

pub async fn run_records(ctx: &PipelineContext, input: InputFile) -> PipelineOutcome {
    let span = tracing::info_span!("pipeline", dataset = %KIND, source = input.name());

    async move {
        let mut errors = Vec::new();
        let result = ingest(ctx, input, &mut errors).await;
        finish(KIND, errors, result)
    }
    .instrument(span)
    .await
}

async fn ingest(ctx: &PipelineContext, input: InputFile, errors: &mut Vec<String>) -> Result<usize, DatasetError> {
    let validation = load::<RecordValidator>(input).await?;
    errors.extend(validation.error_messages());

    let mut tx = ctx.store.begin().await.map_err(DatasetError::Transaction)?;

    let guard = ctx.guard.as_ref();
    let resolved = guard
        .with_guard(KIND, || async {
            let staged = resolve(tx.as_mut(), guard, validation.valid, errors).await?;
            let reservation = guard.reserve(KIND, staged.iter().map(|r| r.id.as_str()));
            Ok::<_, StoreError>((staged, reservation))
        })
        .await;

    let (staged, _reservation) = match resolved {
        Ok(resolved) => resolved,
        Err(e) => {
            abandon(tx).await;
            return Err(DatasetError::Transaction(e));
        },
    };

    let inserted = match tx.insert_records(staged).await {
        Ok(inserted) => inserted,
        Err(e) => {
            abandon(tx).await;
            return Err(DatasetError::Transaction(e));
        },
    };

    tx.commit().await.map_err(DatasetError::Transaction)?;
    Ok(inserted)
}

/// Check duplicates, resolve both references and lock each referenced item
///
/// Lookups are memoised for the batch; an item locked once stays locked.
async fn resolve(
    tx: &mut dyn RecordTransaction,
    guard: &DuplicateGuard,
    rows: Vec<Record>,
    errors: &mut Vec<String>,
) -> StoreResult<Vec<Record>> {
    let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
    let existing = tx.existing_record_ids(&ids).await?;

    let mut entities: HashMap<String, bool> = HashMap::new();
    let mut items: HashMap<String, bool> = HashMap::new();
    let mut staged_ids = HashSet::with_capacity(rows.len());
    let mut staged = Vec::with_capacity(rows.len());

    for record in rows {
        let taken = existing.contains(&record.id) || guard.is_reserved(KIND, &record.id);
        if taken || staged_ids.contains(&record.id) {
            tracing::warn!(dataset = %KIND, id = %record.id, "Skipping duplicate id");
            errors.push(RowError::Duplicate { id: record.id }.to_string());
            continue;
        }

        let entity_found = match entities.get(&record.entity_ref) {
            Some(&found) => found,
            None => {
                let found = tx.entity_exists(&record.entity_ref).await?;
                entities.insert(record.entity_ref.clone(), found);
                found
            },
        };
        if !entity_found {
            errors.push(
                RowError::MissingEntity {
                    id: record.id,
                    reference: record.entity_ref,
                }
                .to_string(),
            );
            continue;
        }

        let item_found = match items.get(&record.item_ref) {
            Some(&found) => found,
            None => {
                let found = tx.lock_item(&record.item_ref).await?;
                items.insert(record.item_ref.clone(), found);
                found
            },
        };
        if !item_found {
            errors.push(
                RowError::MissingItem {
                    id: record.id,
                    reference: record.item_ref,
                }
                .to_string(),
            );
            continue;
        }

        staged_ids.insert(record.id.clone());
        staged.push(record);
    }

    tracing::debug!(
        dataset = %KIND,
        staged = staged.len(),
        items_locked = items.values().filter(|found| **found).count(),
        "Records resolved"
    );
    Ok(staged)
}

async fn abandon(mut tx: Box<dyn RecordTransaction>) {
    if let Err(e) = tx.rollback().await {
        tracing::warn!(dataset = %KIND, error = %e, "Rollback failed; the transaction is discarded on drop");
    }
}
