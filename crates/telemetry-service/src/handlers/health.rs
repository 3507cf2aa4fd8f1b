//! Health check handler.

use crate::models::{HealthResponse, ServiceStatus};
use crate::routes::AppState;
use crate::services::{ComponentState, HealthReport, HealthStatus};
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use std::sync::Arc;
use tracing::instrument;

/// Handler for GET /health
///
/// Returns 200 when both the store and the broker link are up:
///
/// ```json
/// {
///   "status": "healthy",
///   "timestamp": "2025-03-01T12:00:00Z",
///   "services": {"database": "connected", "broker": "connected"}
/// }
/// ```
///
/// Otherwise returns 500 with `"status": "unhealthy"` and an `error` message.
#[instrument(skip_all, name = "telemetry.health.check")]
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<HealthResponse>) {
    let report = state.health.check_health().await;
    let status = match report.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(to_response(&report)))
}

fn to_response(report: &HealthReport) -> HealthResponse {
    let mut problems = Vec::new();
    if report.components.store == ComponentState::Disconnected {
        problems.push("Database connection failed");
    }
    if report.components.broker == ComponentState::Disconnected {
        problems.push("Broker connection unavailable");
    }

    HealthResponse {
        status: report.status,
        timestamp: Utc::now(),
        services: ServiceStatus {
            database: report.components.store,
            broker: report.components.broker,
        },
        error: (!problems.is_empty()).then(|| problems.join("; ")),
    }
}
