//! Query Service.
//!
//! Read operations over the Persistence Store, independent of HTTP. Every store
//! round trip is bounded by a timeout, and store failures surface as errors,
//! never as empty results.

use crate::errors::TelemetryError;
use crate::models::{DeviceSummary, HistoryQuery, SensorRecord, StatsResponse};
use crate::repositories::{HistoryFilter, SensorStore, StoreError};
use common::types::DeviceId;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Records returned when the caller gives no limit.
pub const DEFAULT_HISTORY_LIMIT: i64 = 100;

/// Server-side cap on history size regardless of the requested limit.
pub const MAX_HISTORY_LIMIT: i64 = 1000;

/// Default bound on a single store round trip.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Clamp a client-supplied limit into `[1, MAX_HISTORY_LIMIT]`.
pub fn clamp_limit(requested: Option<i64>) -> i64 {
    requested
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT)
}

/// Answers device listing, history and statistics requests.
#[derive(Clone)]
pub struct QueryService {
    store: Arc<dyn SensorStore>,
    timeout: Duration,
}

impl QueryService {
    pub fn new(store: Arc<dyn SensorStore>) -> Self {
        Self {
            store,
            timeout: QUERY_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Distinct devices across all history, sorted by id.
    #[instrument(skip_all, name = "telemetry.query.devices")]
    pub async fn list_devices(&self) -> Result<Vec<DeviceSummary>, TelemetryError> {
        let devices = self.bounded(self.store.list_devices()).await?;
        debug!(target: "telemetry.query", count = devices.len(), "Listed devices");
        Ok(devices
            .into_iter()
            .map(|device_id| DeviceSummary { device_id })
            .collect())
    }

    /// History for one device, newest first, within the optional window.
    #[instrument(skip_all, name = "telemetry.query.history", fields(device_id = %device_id))]
    pub async fn device_history(
        &self,
        device_id: &str,
        query: &HistoryQuery,
    ) -> Result<Vec<SensorRecord>, TelemetryError> {
        let device_id = DeviceId::parse(device_id)
            .map_err(|e| TelemetryError::BadRequest(e.to_string()))?;

        let filter = HistoryFilter {
            limit: clamp_limit(query.limit),
            from: query.from,
            to: query.to,
        };

        let records = self
            .bounded(self.store.device_history(&device_id, filter))
            .await?;
        debug!(
            target: "telemetry.query",
            device_id = %device_id,
            limit = filter.limit,
            count = records.len(),
            "Fetched device history"
        );
        Ok(records)
    }

    /// Aggregates over the full history, computed on demand.
    #[instrument(skip_all, name = "telemetry.query.stats")]
    pub async fn stats(&self) -> Result<StatsResponse, TelemetryError> {
        self.bounded(self.store.stats()).await
    }

    async fn bounded<T>(
        &self,
        operation: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, TelemetryError> {
        match tokio::time::timeout(self.timeout, operation).await {
            Ok(result) => result.map_err(TelemetryError::from),
            Err(_) => Err(TelemetryError::Timeout(self.timeout)),
        }
    }
}
