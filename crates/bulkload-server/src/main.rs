//! Bulkload Server - Main entry point

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bulkload_common::logging::{init_logging, LogConfig};
use bulkload_ingest::PgStore;
use bulkload_server::{app, AppState, Config};
use tokio::signal;
use tokio::sync::Notify;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Environment variables take precedence over these defaults
    let log_config = LogConfig::builder()
        .log_file_prefix("bulkload-server")
        .filter_directives("bulkload_server=debug,bulkload_ingest=debug,tower_http=debug,sqlx=warn")
        .build()
        .merge_env()?;

    let _log_guard = init_logging(&log_config)?;

    info!("Starting Bulkload Server");

    let config = Config::load().context("Failed to load configuration")?;
    info!(
        "Configuration loaded - server will bind to {}",
        config.server.bind_address()
    );

    let store = PgStore::connect(&config.database)
        .await
        .context("Failed to connect to database")?;
    store.health_check().await.context("Database health check failed")?;
    info!("Database connection pool established");

    if config.init_schema {
        store.ensure_schema().await.context("Failed to create schema")?;
        info!("Database schema ensured");
    }

    let router = app(AppState::new(Arc::new(store)), &config.server);

    let addr: SocketAddr = config.server.bind_address().parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on {}", addr);

    let signalled = Arc::new(Notify::new());
    let serve = axum::serve(listener, router).with_graceful_shutdown({
        let signalled = Arc::clone(&signalled);
        async move {
            wait_for_signal().await;
            signalled.notify_one();
        }
    });

    // in-flight uploads get the shutdown timeout to finish once a signal arrives
    let drain_limit = Duration::from_secs(config.server.shutdown_timeout_secs);
    tokio::select! {
        served = async { serve.await } => served?,
        _ = async {
            signalled.notified().await;
            tokio::time::sleep(drain_limit).await;
        } => {
            warn!(timeout_secs = config.server.shutdown_timeout_secs, "Uploads still running at shutdown timeout");
            return Ok(());
        },
    }

    info!("Server shut down gracefully");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            },
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, draining connections"),
        _ = terminate => info!("Received SIGTERM, draining connections"),
    }
}
