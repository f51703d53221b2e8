//! Runs the three pipelines of one upload in dependency order
//!
//! A run lives on its own task. Entities and items run concurrently on tasks
//! of their own. Records start only after both have finished, so every row
//! those two committed is visible to reference resolution.

use std::any::Any;
use std::sync::Arc;

use tokio::task::JoinError;
use tracing::Instrument;
use uuid::Uuid;

use crate::csv_source::InputFile;
use crate::error::{CoordinatorError, DatasetError};
use crate::guard::DuplicateGuard;
use crate::model::DatasetKind;
use crate::pipeline::{run_entities, run_items, run_records, PipelineContext, PipelineOutcome};
use crate::report::Report;
use crate::store::Store;

/// The three uploads of one run; any may be absent until validated
#[derive(Debug, Default)]
pub struct UploadSet {
    pub entities: Option<InputFile>,
    pub items: Option<InputFile>,
    pub records: Option<InputFile>,
}

impl UploadSet {
    pub fn new(entities: InputFile, items: InputFile, records: InputFile) -> Self {
        Self {
            entities: Some(entities),
            items: Some(items),
            records: Some(records),
        }
    }

    pub fn insert(&mut self, kind: DatasetKind, file: InputFile) {
        *self.slot(kind) = Some(file);
    }

    pub fn missing(&self) -> Vec<DatasetKind> {
        DatasetKind::ALL
            .into_iter()
            .filter(|kind| self.get(*kind).is_none())
            .collect()
    }

    fn get(&self, kind: DatasetKind) -> Option<&InputFile> {
        match kind {
            DatasetKind::Entities => self.entities.as_ref(),
            DatasetKind::Items => self.items.as_ref(),
            DatasetKind::Records => self.records.as_ref(),
        }
    }

    fn slot(&mut self, kind: DatasetKind) -> &mut Option<InputFile> {
        match kind {
            DatasetKind::Entities => &mut self.entities,
            DatasetKind::Items => &mut self.items,
            DatasetKind::Records => &mut self.records,
        }
    }
}

#[derive(Clone)]
pub struct IngestionCoordinator {
    ctx: PipelineContext,
}

impl IngestionCoordinator {
    /// Coordinator bound to the process-wide duplicate guard
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            ctx: PipelineContext::new(store),
        }
    }

    pub fn with_guard(store: Arc<dyn Store>, guard: Arc<DuplicateGuard>) -> Self {
        Self {
            ctx: PipelineContext::with_guard(store, guard),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.ctx.store
    }

    /// Run one upload to completion
    ///
    /// Fails only when an input is missing, in which case nothing runs, or
    /// when the run's own task dies. Every other problem is reported inside
    /// the returned [`Report`]. The run owns its task: dropping the returned
    /// future detaches it but all three pipelines still run in order.
    pub async fn run(&self, uploads: UploadSet) -> Result<Report, CoordinatorError> {
        let missing = uploads.missing();
        let (Some(entities), Some(items), Some(records)) = (uploads.entities, uploads.items, uploads.records)
        else {
            tracing::warn!(?missing, "Rejecting upload with missing datasets");
            return Err(CoordinatorError::MissingInput { missing });
        };

        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("ingestion", %run_id);
        let ctx = self.ctx.clone();

        tokio::spawn(ingest(ctx, entities, items, records).instrument(span))
            .await
            .map_err(|e| {
                let reason = join_failure(e);
                tracing::error!(%run_id, %reason, "Ingestion task failed");
                CoordinatorError::Interrupted { reason }
            })
    }
}

async fn ingest(ctx: PipelineContext, entities: InputFile, items: InputFile, records: InputFile) -> Report {
    tracing::info!(
        entities = entities.name(),
        items = items.name(),
        records = records.name(),
        "Ingestion started"
    );

    let entities_task = tokio::spawn({
        let ctx = ctx.clone();
        async move { run_entities(&ctx, entities).await }.in_current_span()
    });
    let items_task = tokio::spawn({
        let ctx = ctx.clone();
        async move { run_items(&ctx, items).await }.in_current_span()
    });

    let (entities, items) = tokio::join!(entities_task, items_task);
    let entities = settle(DatasetKind::Entities, entities);
    let items = settle(DatasetKind::Items, items);

    let records_task = tokio::spawn(async move { run_records(&ctx, records).await }.in_current_span());
    let records = settle(DatasetKind::Records, records_task.await);

    let report = Report::aggregate(entities, items, records);
    tracing::info!(
        created = report.total_created(),
        errors = report.total_errors(),
        "Ingestion finished"
    );
    report
}

/// A task that died is reported as that dataset's single error
fn settle(kind: DatasetKind, joined: Result<PipelineOutcome, JoinError>) -> PipelineOutcome {
    match joined {
        Ok(outcome) => outcome,
        Err(e) => {
            let error = DatasetError::Aborted {
                kind,
                reason: join_failure(e),
            };
            tracing::error!(dataset = %kind, error = %error, "Pipeline task failed");
            PipelineOutcome::failed(Vec::new(), &error)
        },
    }
}

fn join_failure(e: JoinError) -> String {
    if e.is_panic() {
        format!("task panicked: {}", panic_message(e.into_panic()))
    } else {
        "task was cancelled".to_string()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => (*message).to_string(),
            Err(_) => "unknown panic payload".to_string(),
        },
    }
}
