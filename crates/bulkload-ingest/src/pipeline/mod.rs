//! Per-dataset ingestion pipelines
//!
//! Each pipeline turns one [`InputFile`] into a [`PipelineOutcome`]. Row-level
//! problems become messages in the outcome; a dataset-level failure adds one
//! message and leaves `created` at zero. Pipelines never return `Err`.
//!
//! - [`independent`]: entities and catalog items, checked and staged under the
//!   shared guard, then bulk-inserted
//! - [`relational`]: records, resolved and inserted inside one transaction

use std::sync::Arc;

use serde::Serialize;

use crate::csv_source::{parse_rows, InputFile};
use crate::error::DatasetError;
use crate::guard::DuplicateGuard;
use crate::model::DatasetKind;
use crate::store::Store;
use crate::validation::{RowValidator, Validation};

pub mod independent;
pub mod relational;

pub use independent::{run_entities, run_independent, run_items};
pub use relational::run_records;

/// What one pipeline reports back to the coordinator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineOutcome {
    pub errors: Vec<String>,
    pub created: usize,
}

impl PipelineOutcome {
    /// Outcome of a pipeline that stopped at the dataset level
    pub fn failed(mut errors: Vec<String>, error: &DatasetError) -> Self {
        errors.push(error.to_string());
        Self { errors, created: 0 }
    }
}

/// Shared collaborators handed to every pipeline of a run
#[derive(Clone)]
pub struct PipelineContext {
    pub store: Arc<dyn Store>,
    pub guard: Arc<DuplicateGuard>,
}

impl PipelineContext {
    /// Uses the process-wide [`DuplicateGuard`]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            guard: DuplicateGuard::shared(),
        }
    }

    pub fn with_guard(store: Arc<dyn Store>, guard: Arc<DuplicateGuard>) -> Self {
        Self { store, guard }
    }
}

/// Read, decode, parse and validate one upload
async fn load<V: RowValidator>(input: InputFile) -> Result<Validation<V::Row>, DatasetError> {
    let name = input.name().to_string();
    let text = input.read_text().await?;
    let rows = parse_rows(&name, &text)?;
    Ok(V::validate(rows))
}

/// Fold an ingestion result into an outcome, logging how it ended
fn finish(kind: DatasetKind, errors: Vec<String>, result: Result<usize, DatasetError>) -> PipelineOutcome {
    match result {
        Ok(created) => {
            tracing::info!(dataset = %kind, created, rejected = errors.len(), "Pipeline complete");
            PipelineOutcome { errors, created }
        },
        Err(e) => {
            tracing::error!(dataset = %kind, error = %e, rejected = errors.len(), "Pipeline failed");
            PipelineOutcome::failed(errors, &e)
        },
    }
}
