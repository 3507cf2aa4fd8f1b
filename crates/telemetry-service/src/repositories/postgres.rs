//! PostgreSQL-backed Persistence Store.
//!
//! Operates on the `sensor_data` table:
//!
//! ```sql
//! sensor_data(id BIGSERIAL, device_id TEXT, topic TEXT, data JSONB, timestamp TIMESTAMPTZ)
//! ```
//!
//! All queries are parameterized and run against the shared pool, which caps
//! concurrent connections and queues excess callers.

use super::{HistoryFilter, SensorStore, StoreError};
use crate::models::{NewSensorRecord, SensorRecord, StatsResponse};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::DeviceId;
use sqlx::PgPool;
use tracing::instrument;

type RecordRow = (i64, String, String, serde_json::Value, DateTime<Utc>);

/// Store over a `sqlx` PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PgSensorStore {
    pool: PgPool,
}

impl PgSensorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn into_record(row: RecordRow) -> SensorRecord {
    let (id, device_id, topic, payload, timestamp) = row;
    SensorRecord {
        id,
        device_id: DeviceId::from_stored(device_id),
        topic,
        payload,
        timestamp,
    }
}

#[async_trait]
impl SensorStore for PgSensorStore {
    #[instrument(skip_all, fields(device_id = %record.device_id))]
    async fn append(&self, record: NewSensorRecord) -> Result<SensorRecord, StoreError> {
        // TIMESTAMPTZ keeps microseconds; hand back what was stored
        let (id, timestamp): (i64, DateTime<Utc>) = sqlx::query_as(
            r#"
            INSERT INTO sensor_data (device_id, topic, data, timestamp)
            VALUES ($1, $2, $3, $4)
            RETURNING id, timestamp
            "#,
        )
        .bind(record.device_id.as_str())
        .bind(&record.topic)
        .bind(&record.payload)
        .bind(record.timestamp)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!(
            target: "telemetry.store",
            id = id,
            device_id = %record.device_id,
            "Record stored"
        );

        Ok(SensorRecord {
            id,
            device_id: record.device_id,
            topic: record.topic,
            payload: record.payload,
            timestamp,
        })
    }

    #[instrument(skip_all)]
    async fn list_devices(&self) -> Result<Vec<DeviceId>, StoreError> {
        let rows: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT device_id
            FROM sensor_data
            ORDER BY device_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(DeviceId::from_stored).collect())
    }

    #[instrument(skip_all, fields(device_id = %device_id, limit = filter.limit))]
    async fn device_history(
        &self,
        device_id: &DeviceId,
        filter: HistoryFilter,
    ) -> Result<Vec<SensorRecord>, StoreError> {
        let rows: Vec<RecordRow> = sqlx::query_as(
            r#"
            SELECT id, device_id, topic, data, timestamp
            FROM sensor_data
            WHERE device_id = $1
              AND ($2::timestamptz IS NULL OR timestamp >= $2)
              AND ($3::timestamptz IS NULL OR timestamp <= $3)
            ORDER BY timestamp DESC, id DESC
            LIMIT $4
            "#,
        )
        .bind(device_id.as_str())
        .bind(filter.from)
        .bind(filter.to)
        .bind(filter.limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(into_record).collect())
    }

    #[instrument(skip_all)]
    async fn stats(&self) -> Result<StatsResponse, StoreError> {
        let (device_count, message_count, last_message_time): (
            i64,
            i64,
            Option<DateTime<Utc>>,
        ) = sqlx::query_as(
            r#"
            SELECT COUNT(DISTINCT device_id), COUNT(*), MAX(timestamp)
            FROM sensor_data
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(StatsResponse {
            device_count,
            message_count,
            last_message_time,
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}
