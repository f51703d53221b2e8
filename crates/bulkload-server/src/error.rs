//! Server-specific error types

use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bulkload_ingest::{CoordinatorError, DatasetKind, StoreError};
use serde_json::json;
use thiserror::Error;

/// Message returned when an upload lacks one of the three files
pub const MISSING_FILES_MESSAGE: &str = "Please upload all three CSV files.";

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("missing upload fields: {0:?}")]
    MissingFiles(Vec<DatasetKind>),

    #[error("Multipart error: {0}")]
    Multipart(#[from] MultipartError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<CoordinatorError> for AppError {
    fn from(err: CoordinatorError) -> Self {
        match err {
            CoordinatorError::MissingInput { missing } => AppError::MissingFiles(missing),
            err @ CoordinatorError::Interrupted { .. } => AppError::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::MissingFiles(missing) => {
                let missing: Vec<&str> = missing.iter().map(DatasetKind::as_str).collect();
                let body = Json(json!({
                    "error": MISSING_FILES_MESSAGE,
                    "missing": missing,
                }));
                return (StatusCode::BAD_REQUEST, body).into_response();
            },
            AppError::Multipart(ref e) => {
                tracing::warn!("Rejected multipart body: {}", e);
                (e.status(), e.body_text())
            },
            AppError::Store(ref e) => {
                tracing::error!("Store error: {:?}", e);
                (StatusCode::SERVICE_UNAVAILABLE, "The store is unavailable".to_string())
            },
            AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "The upload could not be processed".to_string())
            },
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
