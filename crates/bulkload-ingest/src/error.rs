//! Error taxonomy for ingestion
//!
//! Row-level errors drop one row and let the batch continue. Dataset-level
//! errors stop one pipeline. Only [`CoordinatorError`] stops a whole run.

use thiserror::Error;

use crate::csv_source::SourceError;
use crate::model::DatasetKind;
use crate::store::StoreError;

/// Identifies a row in messages: its id when present, otherwise its content
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowLabel {
    Id(String),
    Raw { line: u64, content: String },
}

impl std::fmt::Display for RowLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RowLabel::Id(id) => write!(f, "{id}"),
            RowLabel::Raw { line, content } => write!(f, "at line {line} {content}"),
        }
    }
}

/// Why a single row was not committed
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RowError {
    #[error("{noun} row at line {line} could not be parsed: {reason}")]
    Malformed {
        noun: &'static str,
        line: u64,
        reason: String,
    },

    #[error("invalid {noun} {label}: missing required field(s) {fields}")]
    MissingFields {
        noun: &'static str,
        label: RowLabel,
        fields: String,
    },

    #[error("item {id} has non-numeric price '{value}'")]
    UnparsablePrice { id: String, value: String },

    #[error("item {id} has invalid price: {price}")]
    InvalidPrice { id: String, price: f64 },

    #[error("record {id} has non-integer quantity '{value}'")]
    UnparsableQuantity { id: String, value: String },

    #[error("record {id} has invalid quantity: {quantity}")]
    InvalidQuantity { id: String, quantity: i32 },

    #[error("skipping duplicate id {id}")]
    Duplicate { id: String },

    #[error("record {id}: entity {reference} does not exist")]
    MissingEntity { id: String, reference: String },

    #[error("record {id}: item {reference} does not exist")]
    MissingItem { id: String, reference: String },
}

/// Failure that stops one pipeline; reported as a single message
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("failed to check existing {kind} ids: {source}")]
    Lookup {
        kind: DatasetKind,
        #[source]
        source: StoreError,
    },

    #[error("failed to insert {kind}: {source}")]
    Insert {
        kind: DatasetKind,
        #[source]
        source: StoreError,
    },

    #[error("transaction blocked or failed: {0}")]
    Transaction(#[source] StoreError),

    #[error("{kind} pipeline aborted: {reason}")]
    Aborted { kind: DatasetKind, reason: String },
}

/// Request-level failure; no report was produced
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("missing required file: {}", labels(.missing))]
    MissingInput { missing: Vec<DatasetKind> },

    #[error("ingestion run did not finish: {reason}")]
    Interrupted { reason: String },
}

fn labels(kinds: &[DatasetKind]) -> String {
    kinds.iter().map(DatasetKind::as_str).collect::<Vec<_>>().join(", ")
}
