use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Describe the job lifecycle metrics. Call once after installing the recorder.
pub fn describe_job_metrics() {
    metrics::describe_counter!("generation_jobs_submitted_total", "Generation jobs accepted");
    metrics::describe_counter!("generation_jobs_completed_total", "Generation jobs completed");
    metrics::describe_counter!("generation_jobs_failed_total", "Generation jobs that failed");
    metrics::describe_histogram!(
        "generation_job_processing_seconds",
        "Time from claim to terminal write for one job"
    );
    metrics::describe_gauge!("generation_jobs_claimed", "Jobs claimed by the last poll iteration");
    metrics::describe_counter!(
        "generation_worker_poll_errors_total",
        "Poll iterations that failed before processing"
    );
}

/// Prometheus metrics scrape endpoint.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}
