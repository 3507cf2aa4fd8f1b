//! Statistics handler.

use crate::errors::TelemetryError;
use crate::models::StatsResponse;
use crate::routes::AppState;
use axum::extract::State;
use axum::Json;
use std::sync::Arc;
use tracing::instrument;

/// Handler for GET /api/stats
///
/// ```json
/// {"deviceCount": 2, "messageCount": 11, "lastMessageTime": "2025-03-01T11:00:00Z"}
/// ```
#[instrument(skip_all, name = "telemetry.api.stats")]
pub async fn get_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StatsResponse>, TelemetryError> {
    let stats = state.query.stats().await?;
    Ok(Json(stats))
}
