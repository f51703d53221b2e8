//! Entities and catalog items

use std::collections::HashSet;

use tracing::Instrument;

use super::{finish, load, PipelineContext, PipelineOutcome};
use crate::csv_source::InputFile;
use crate::error::{DatasetError, RowError};
use crate::guard::DuplicateGuard;
use crate::model::{DatasetKind, Keyed, StagedBatch};
use crate::store::Store;
use crate::validation::{EntityValidator, ItemValidator, RowValidator};

pub async fn run_entities(ctx: &PipelineContext, input: InputFile) -> PipelineOutcome {
    run_independent::<EntityValidator>(ctx, input).await
}

pub async fn run_items(ctx: &PipelineContext, input: InputFile) -> PipelineOutcome {
    run_independent::<ItemValidator>(ctx, input).await
}

/// Validate, check-and-stage under the guard, then insert the staged rows
/// in one batch outside the guard
pub async fn run_independent<V>(ctx: &PipelineContext, input: InputFile) -> PipelineOutcome
where
    V: RowValidator,
    V::Row: Keyed + Send,
    Vec<V::Row>: Into<StagedBatch>,
{
    let kind = V::KIND;
    let span = tracing::info_span!("pipeline", dataset = %kind, source = input.name());

    async move {
        let mut errors = Vec::new();
        let result = ingest::<V>(ctx, input, &mut errors).await;
        finish(kind, errors, result)
    }
    .instrument(span)
    .await
}

async fn ingest<V>(ctx: &PipelineContext, input: InputFile, errors: &mut Vec<String>) -> Result<usize, DatasetError>
where
    V: RowValidator,
    V::Row: Keyed + Send,
    Vec<V::Row>: Into<StagedBatch>,
{
    let kind = V::KIND;
    let validation = load::<V>(input).await?;
    errors.extend(validation.error_messages());

    let store = ctx.store.as_ref();
    let guard = ctx.guard.as_ref();
    let (staged, _reservation) = guard
        .with_guard(kind, || async {
            let staged = stage_new(store, guard, kind, validation.valid, errors).await?;
            let reservation = guard.reserve(kind, staged.iter().map(|row| row.id()));
            Ok::<_, DatasetError>((staged, reservation))
        })
        .await?;

    if staged.is_empty() {
        return Ok(0);
    }

    store
        .insert_batch(staged.into())
        .await
        .map_err(|source| DatasetError::Insert { kind, source })
}

/// Drop rows whose id is already committed, reserved by another pipeline or
/// already staged in this batch
async fn stage_new<T: Keyed>(
    store: &dyn Store,
    guard: &DuplicateGuard,
    kind: DatasetKind,
    rows: Vec<T>,
    errors: &mut Vec<String>,
) -> Result<Vec<T>, DatasetError> {
    let ids: Vec<String> = rows.iter().map(|row| row.id().to_string()).collect();
    let existing = store
        .existing_ids(kind, &ids)
        .await
        .map_err(|source| DatasetError::Lookup { kind, source })?;

    let mut staged_ids = HashSet::with_capacity(rows.len());
    let mut staged = Vec::with_capacity(rows.len());
    for row in rows {
        let taken = existing.contains(row.id()) || guard.is_reserved(kind, row.id());
        if taken || !staged_ids.insert(row.id().to_string()) {
            tracing::warn!(dataset = %kind, id = row.id(), "Skipping duplicate id");
            errors.push(
                RowError::Duplicate {
                    id: row.id().to_string(),
                }
                .to_string(),
            );
            continue;
        }
        staged.push(row);
    }

    tracing::debug!(dataset = %kind, staged = staged.len(), "Rows staged");
    Ok(staged)
}
