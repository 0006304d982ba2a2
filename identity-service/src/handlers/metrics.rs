use axum::{http::header, response::IntoResponse};

/// Prometheus text exposition.
///
/// GET /metrics
pub async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        service_core::observability::metrics::render(),
    )
}
