//! Persistence Store access.
//!
//! The store is an append-only table of [`SensorRecord`]s with range queries
//! on `(device_id, timestamp)`. Components depend on the [`SensorStore`] trait;
//! production uses [`PgSensorStore`], tests use [`InMemorySensorStore`].

pub mod memory;
pub mod postgres;

pub use memory::InMemorySensorStore;
pub use postgres::PgSensorStore;

use crate::models::{NewSensorRecord, SensorRecord, StatsResponse};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::DeviceId;
use thiserror::Error;

/// Persistence Store failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached (pool exhausted, closed, I/O).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store was reached but the statement failed.
    #[error("store query failed: {0}")]
    Query(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(err.to_string())
            }
            other => StoreError::Query(other.to_string()),
        }
    }
}

/// Bounds for a device history query. All supplied bounds apply together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryFilter {
    /// Maximum number of records, already clamped by the caller.
    pub limit: i64,

    /// Inclusive lower bound.
    pub from: Option<DateTime<Utc>>,

    /// Inclusive upper bound.
    pub to: Option<DateTime<Utc>>,
}

impl HistoryFilter {
    /// Whether `timestamp` falls inside the window.
    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| timestamp >= from)
            && self.to.map_or(true, |to| timestamp <= to)
    }
}

/// Append-only record store with read queries.
#[async_trait]
pub trait SensorStore: Send + Sync {
    /// Persist one record and return it with its assigned id.
    async fn append(&self, record: NewSensorRecord) -> Result<SensorRecord, StoreError>;

    /// Distinct device ids across all history, sorted.
    async fn list_devices(&self) -> Result<Vec<DeviceId>, StoreError>;

    /// Records for `device_id` within `filter`, newest first.
    async fn device_history(
        &self,
        device_id: &DeviceId,
        filter: HistoryFilter,
    ) -> Result<Vec<SensorRecord>, StoreError>;

    /// Aggregates over the full history.
    async fn stats(&self) -> Result<StatsResponse, StoreError>;

    /// Trivial liveness check.
    async fn ping(&self) -> Result<(), StoreError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn ts(raw: &str) -> DateTime<Utc> {
        raw.parse().unwrap()
    }

    #[test]
    fn test_filter_bounds_are_inclusive() {
        let filter = HistoryFilter {
            limit: 10,
            from: Some(ts("2025-03-01T10:00:00Z")),
            to: Some(ts("2025-03-01T12:00:00Z")),
        };

        assert!(filter.contains(ts("2025-03-01T10:00:00Z")));
        assert!(filter.contains(ts("2025-03-01T11:00:00Z")));
        assert!(filter.contains(ts("2025-03-01T12:00:00Z")));
        assert!(!filter.contains(ts("2025-03-01T09:59:59Z")));
        assert!(!filter.contains(ts("2025-03-01T12:00:01Z")));
    }

    #[test]
    fn test_open_filter_contains_everything() {
        let filter = HistoryFilter {
            limit: 10,
            from: None,
            to: None,
        };
        assert!(filter.contains(ts("1970-01-01T00:00:00Z")));
        assert!(filter.contains(ts("2999-01-01T00:00:00Z")));
    }

    #[test]
    fn test_sqlx_pool_errors_are_unavailable() {
        assert!(matches!(
            StoreError::from(sqlx::Error::PoolTimedOut),
            StoreError::Unavailable(_)
        ));
        assert!(matches!(
            StoreError::from(sqlx::Error::RowNotFound),
            StoreError::Query(_)
        ));
    }
}
