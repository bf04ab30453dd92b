//! # Pipenotify Main Entry Point
//!
//! Loads configuration, prepares the database, then runs the HTTP server, the
//! delivery worker and the delayed-notification sweep until ctrl-c.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use pipenotify::{
    chat::{ChatClient, GoogleChatClient},
    config::ConfigLoader,
    db::{init_pool, run_migrations},
    server::run_server,
    sweep::DelayedSweep,
    telemetry::init_tracing,
    worker::DeliveryWorker,
};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(ConfigLoader::new().load()?);
    init_tracing(&config)?;

    tracing::info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(config = %redacted_json, "Effective configuration");
    }

    let db = init_pool(&config).await?;
    run_migrations(&db).await?;

    let chat: Arc<dyn ChatClient> = Arc::new(
        GoogleChatClient::new(Duration::from_secs(config.delivery.request_timeout_seconds))
            .context("failed to build Google Chat client")?,
    );

    let shutdown = CancellationToken::new();
    let shared_db = Arc::new(db.clone());

    let worker = DeliveryWorker::new(Arc::clone(&shared_db), chat, &config);
    let worker_handle = tokio::spawn(worker.run(shutdown.clone()));

    let sweep = DelayedSweep::new(Arc::clone(&config), shared_db);
    let sweep_handle = tokio::spawn(sweep.run(shutdown.clone()));

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to listen for shutdown signal");
        }
        tracing::info!("Shutdown signal received");
        signal_token.cancel();
    });

    let server_result = run_server(Arc::clone(&config), db, shutdown.clone()).await;
    shutdown.cancel();

    if let Err(err) = worker_handle.await {
        tracing::error!(error = %err, "Delivery worker task failed");
    }
    if let Err(err) = sweep_handle.await {
        tracing::error!(error = %err, "Sweep task failed");
    }

    server_result
}
