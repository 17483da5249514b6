use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Register descriptions for the pipeline's metrics.
pub fn describe_metrics() {
    metrics::describe_counter!(
        "recognition_jobs_submitted_total",
        "Recognition jobs accepted for processing"
    );
    metrics::describe_counter!(
        "recognition_jobs_completed_total",
        "Recognition jobs that reached the completed state"
    );
    metrics::describe_counter!(
        "recognition_jobs_failed_total",
        "Recognition jobs that ended in the error state"
    );
    metrics::describe_counter!(
        "recognition_faces_total",
        "Detected faces by outcome (present, identified, not_enrolled, unknown, skipped)"
    );
    metrics::describe_histogram!(
        "recognition_job_seconds",
        metrics::Unit::Seconds,
        "Wall time spent processing a recognition job"
    );
    metrics::describe_counter!(
        "job_store_evictions_total",
        "Jobs removed from the store by reason (viewed, abandoned, expired)"
    );
    metrics::describe_gauge!(
        "job_store_resident_jobs",
        "Jobs currently held in the job store"
    );
}

/// GET /metrics: Prometheus text exposition.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    )
}
