//! Bulkload Server
//!
//! HTTP front end for the ingestion coordinator: a multipart upload endpoint
//! that runs one ingestion per request and returns its report.
#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use bulkload_ingest::{IngestionCoordinator, Store};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

pub use config::{Config, ServerConfig};
pub use error::AppError;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub coordinator: IngestionCoordinator,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            coordinator: IngestionCoordinator::new(store),
        }
    }
}

/// Build the router with its middleware stack
pub fn app(state: AppState, config: &ServerConfig) -> Router {
    let api = Router::new().route("/upload", post(routes::upload));

    Router::new()
        .route("/health", get(routes::health))
        .nest("/api/v1", api)
        .with_state(state)
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(
                    DefaultOnResponse::new()
                        .level(Level::INFO)
                        .latency_unit(tower_http::LatencyUnit::Micros),
                ),
        )
}
