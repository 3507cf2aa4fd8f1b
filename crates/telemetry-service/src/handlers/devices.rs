//! Device handlers.
//!
//! - `GET /api/devices` - Distinct devices
//! - `GET /api/devices/{device_id}/data?limit&from&to` - Device history

use crate::errors::TelemetryError;
use crate::models::{DeviceSummary, HistoryQuery, SensorRecord};
use crate::routes::AppState;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::Json;
use std::sync::Arc;
use tracing::instrument;

/// Handler for GET /api/devices
#[instrument(skip_all, name = "telemetry.api.devices")]
pub async fn list_devices(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<DeviceSummary>>, TelemetryError> {
    let devices = state.query.list_devices().await?;
    Ok(Json(devices))
}

/// Handler for GET /api/devices/{device_id}/data
///
/// `from`/`to` are RFC 3339 timestamps and bound the window inclusively.
/// `limit` defaults to 100 and is clamped to 1..=1000.
#[instrument(skip_all, name = "telemetry.api.device_history", fields(device_id = %device_id))]
pub async fn device_history(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<Vec<SensorRecord>>, TelemetryError> {
    let Query(query) = query.map_err(|e| TelemetryError::BadRequest(e.body_text()))?;

    let records = state.query.device_history(&device_id, &query).await?;
    Ok(Json(records))
}
