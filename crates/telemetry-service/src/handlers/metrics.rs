//! Prometheus metrics endpoint handler.
//!
//! Unauthenticated so Prometheus can scrape it.

use crate::observability::MetricsRegistry;
use axum::{extract::State, http::header, response::IntoResponse};
use std::sync::Arc;

/// Handler for GET /metrics
///
/// ```text
/// # TYPE mqtt_messages_total counter
/// mqtt_messages_total{topic="sensors/sensor-1/data",device_id="sensor-1"} 42
/// ```
#[tracing::instrument(skip_all, name = "telemetry.metrics.scrape")]
pub async fn metrics_handler(State(metrics): State<Arc<MetricsRegistry>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics.render(),
    )
}
