use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use imagegen_jobs::{
    app_state::AppState,
    config::AppConfig,
    db::{self, session::SessionManager},
    routes,
    services::{
        jobs::JobService,
        provider::{image_provider_from_config, vision_provider_from_config},
        storage::{prepare_storage, storage_from_config},
        worker::{Worker, WorkerSettings},
    },
    shutdown_signal,
    store::{JobStore, PgJobStore},
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!(
        image_provider = %config.image_provider,
        vision_provider = %config.vision_provider,
        storage = %config.storage_backend,
        worker_enabled = config.worker_enabled,
        "Initializing imagegen-jobs server"
    );

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe_job_metrics();

    tracing::info!("Connecting to PostgreSQL database");
    let sessions = SessionManager::connect(&config.database_url, &config.pool_settings())
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(sessions.pool())
        .await
        .expect("Failed to run database migrations");

    let image_provider = image_provider_from_config(&config).expect("Failed to initialize image provider");
    let vision_provider = vision_provider_from_config(&config).expect("Failed to initialize vision provider");
    let storage = storage_from_config(&config).expect("Failed to initialize image storage");
    if config.worker_enabled {
        prepare_storage(storage.as_ref()).await;
    }

    let store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(sessions.clone()));
    let jobs = JobService::new(store.clone(), config.job_limits());

    let worker = config.worker_enabled.then(|| {
        Worker::new(
            store.clone(),
            image_provider,
            storage,
            WorkerSettings::from_config(&config),
        )
        .spawn()
    });

    let app = routes::router(AppState::new(jobs, vision_provider)).route(
        "/metrics",
        get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
    );

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    tracing::info!("Server stopped accepting connections, cleaning up");

    if let Some(worker) = worker {
        if !worker.shutdown(config.shutdown_grace()).await {
            tracing::warn!("Worker was stopped before in-flight jobs finished");
        }
    }

    sessions.close().await;
    tracing::info!("Shutdown complete");
}
