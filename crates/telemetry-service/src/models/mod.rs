//! Telemetry service models.
//!
//! Contains data types shared by the ingestion and query paths.

use chrono::{DateTime, NaiveDate, Utc};
use common::types::DeviceId;
use serde::{Deserialize, Deserializer, Serialize};

/// Connection Manager's view of the broker link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// One persisted reading.
///
/// Immutable once written; the store assigns `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorRecord {
    /// Store-assigned monotonic identifier.
    pub id: i64,

    /// Originating device.
    pub device_id: DeviceId,

    /// Topic the message was delivered on.
    pub topic: String,

    /// The device document, preserved verbatim.
    pub payload: serde_json::Value,

    /// Ingestion time.
    pub timestamp: DateTime<Utc>,
}

/// A validated reading awaiting its store-assigned id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSensorRecord {
    pub device_id: DeviceId,
    pub topic: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Entry in the device listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSummary {
    pub device_id: DeviceId,
}

/// Scalar aggregates over the whole record history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    /// Number of distinct devices.
    pub device_count: i64,

    /// Number of stored records.
    pub message_count: i64,

    /// Timestamp of the most recent record, `null` if none exist.
    pub last_message_time: Option<DateTime<Utc>>,
}

/// Query string for the device history endpoint.
///
/// `from` and `to` take an RFC 3339 timestamp or a bare `YYYY-MM-DD` date,
/// which means midnight UTC of that day.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryQuery {
    /// Maximum number of records (clamped server-side).
    pub limit: Option<i64>,

    /// Inclusive lower timestamp bound.
    #[serde(default, deserialize_with = "deserialize_bound")]
    pub from: Option<DateTime<Utc>>,

    /// Inclusive upper timestamp bound.
    #[serde(default, deserialize_with = "deserialize_bound")]
    pub to: Option<DateTime<Utc>>,
}

/// Parse a history window bound.
fn parse_bound(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = raw.parse::<DateTime<Utc>>() {
        return Some(ts);
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()?
        .and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc())
}

fn deserialize_bound<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    parse_bound(&raw).map(Some).ok_or_else(|| {
        serde::de::Error::custom(format!(
            "expected an RFC 3339 timestamp or a YYYY-MM-DD date, got {raw:?}"
        ))
    })
}

/// Composite health verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Readiness of a single component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentState {
    Connected,
    Disconnected,
}

impl ComponentState {
    pub fn from_ready(ready: bool) -> Self {
        if ready {
            ComponentState::Connected
        } else {
            ComponentState::Disconnected
        }
    }
}

/// Per-component readiness reported by `/health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    /// Persistence store state.
    pub database: ComponentState,

    /// Broker link state.
    pub broker: ComponentState,
}

/// Health check response.
///
/// Returned by the `/health` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,

    /// When the check ran.
    pub timestamp: DateTime<Utc>,

    pub services: ServiceStatus,

    /// Reason for an unhealthy status (generic, no infrastructure details).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
