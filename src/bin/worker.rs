//! Standalone worker: the poll loop without the HTTP server.
//!
//! Run this instead of the server's embedded worker (`WORKER_ENABLED=false`
//! on the server) to scale processing separately from request handling.

use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use imagegen_jobs::{
    config::AppConfig,
    db::{self, session::SessionManager},
    routes,
    services::{
        provider::image_provider_from_config,
        storage::{prepare_storage, storage_from_config},
        worker::{Worker, WorkerSettings},
    },
    shutdown_signal,
    store::PgJobStore,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting image generation worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");

    // No HTTP server here, so the exporter serves /metrics on its own listener.
    let metrics_addr = config.worker_metrics_addr().expect("Invalid worker metrics address");
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .expect("Failed to install Prometheus exporter");
    routes::metrics::describe_job_metrics();
    tracing::info!(%metrics_addr, "Serving worker metrics");

    tracing::info!("Connecting to PostgreSQL");
    let sessions = SessionManager::connect(&config.database_url, &config.pool_settings())
        .await
        .expect("Failed to connect to database");

    db::run_migrations(sessions.pool())
        .await
        .expect("Failed to run database migrations");

    let provider = image_provider_from_config(&config).expect("Failed to initialize image provider");
    let storage = storage_from_config(&config).expect("Failed to initialize image storage");
    prepare_storage(storage.as_ref()).await;

    let worker = Worker::new(
        Arc::new(PgJobStore::new(sessions.clone())),
        provider,
        storage,
        WorkerSettings::from_config(&config),
    )
    .spawn();

    tracing::info!("Worker ready, polling for pending jobs");

    shutdown_signal().await;

    if !worker.shutdown(config.shutdown_grace()).await {
        tracing::warn!("Worker was stopped before in-flight jobs finished");
    }
    sessions.close().await;
}
