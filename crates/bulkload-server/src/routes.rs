//! Upload and health handlers

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bulkload_ingest::{DatasetKind, InputFile, Report, StoreCounts, UploadSet};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::AppState;

pub const COMPLETED_MESSAGE: &str = "Process completed.";

/// Body of a successful upload
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub message: String,
    pub details: Report,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub counts: StoreCounts,
}

/// Dataset carried by a multipart field, by its canonical or legacy name
pub fn field_kind(name: &str) -> Option<DatasetKind> {
    match name {
        "entities" | "users" => Some(DatasetKind::Entities),
        "items" | "products" => Some(DatasetKind::Items),
        "records" | "orders" => Some(DatasetKind::Records),
        _ => None,
    }
}

#[tracing::instrument(skip(state, multipart))]
pub async fn upload(State(state): State<AppState>, mut multipart: Multipart) -> Result<Response, AppError> {
    let mut uploads = UploadSet::default();

    while let Some(field) = multipart.next_field().await? {
        let field_name = field.name().unwrap_or("").to_string();
        let Some(kind) = field_kind(&field_name) else {
            tracing::debug!(field = %field_name, "Ignoring unknown upload field");
            continue;
        };

        let file_name = field
            .file_name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{kind}.csv"));
        let data = field.bytes().await?;
        tracing::debug!(dataset = %kind, file = %file_name, size = data.len(), "Received upload");

        uploads.insert(kind, InputFile::from_bytes(file_name, data.to_vec()));
    }

    // completes on its own task even if the client disconnects
    let report = state.coordinator.run(uploads).await?;

    tracing::info!(
        created = report.total_created(),
        errors = report.total_errors(),
        "Upload processed"
    );

    let body = UploadResponse {
        message: COMPLETED_MESSAGE.to_string(),
        details: report,
    };
    Ok((StatusCode::OK, Json(body)).into_response())
}

pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    let counts = state.coordinator.store().counts().await?;
    Ok(Json(HealthResponse {
        status: "healthy",
        counts,
    }))
}
