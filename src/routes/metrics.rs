use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Register descriptions for the engine's metrics. Call once after installing the recorder.
pub fn describe_metrics() {
    metrics::describe_counter!(
        "analysis_requests_enqueued_total",
        "Request IDs pushed onto the work queue"
    );
    metrics::describe_counter!(
        "analysis_requests_completed_total",
        "Requests that finished with a valid result"
    );
    metrics::describe_counter!(
        "analysis_requests_failed_total",
        "Requests that finished as Failed"
    );
    metrics::describe_counter!(
        "analysis_attempts_total",
        "Finished analysis API attempts, by outcome"
    );
    metrics::describe_gauge!("analysis_queue_depth", "Request IDs waiting for a worker");
    metrics::describe_gauge!(
        "analysis_gate_in_flight",
        "Requests currently admitted through the concurrency gate"
    );
    metrics::describe_histogram!(
        "analysis_processing_seconds",
        "Time from processing start to final status"
    );
}

/// GET /metrics: Prometheus text exposition.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    )
}
