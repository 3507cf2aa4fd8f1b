//! In-memory Persistence Store.
//!
//! Behaves like the PostgreSQL store for the query contract and can be switched
//! into an unavailable state to exercise outage handling.

use super::{HistoryFilter, SensorStore, StoreError};
use crate::models::{NewSensorRecord, SensorRecord, StatsResponse};
use async_trait::async_trait;
use common::types::DeviceId;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug)]
struct Inner {
    records: Vec<SensorRecord>,
    next_id: i64,
}

/// Mutex-backed record store.
#[derive(Debug)]
pub struct InMemorySensorStore {
    inner: Mutex<Inner>,
    available: AtomicBool,
    append_calls: AtomicUsize,
}

impl Default for InMemorySensorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySensorStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                records: Vec::new(),
                next_id: 1,
            }),
            available: AtomicBool::new(true),
            append_calls: AtomicUsize::new(0),
        }
    }

    /// Simulate the store going away (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of append attempts, successful or not.
    pub fn append_calls(&self) -> usize {
        self.append_calls.load(Ordering::SeqCst)
    }

    /// Snapshot of everything stored, in append order.
    pub fn records(&self) -> Vec<SensorRecord> {
        self.inner
            .lock()
            .map(|inner| inner.records.clone())
            .unwrap_or_default()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Query("store lock poisoned".to_string()))
    }
}

#[async_trait]
impl SensorStore for InMemorySensorStore {
    async fn append(&self, record: NewSensorRecord) -> Result<SensorRecord, StoreError> {
        self.append_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let mut inner = self.lock()?;
        let stored = SensorRecord {
            id: inner.next_id,
            device_id: record.device_id,
            topic: record.topic,
            payload: record.payload,
            timestamp: record.timestamp,
        };
        inner.next_id += 1;
        inner.records.push(stored.clone());
        Ok(stored)
    }

    async fn list_devices(&self) -> Result<Vec<DeviceId>, StoreError> {
        self.check_available()?;

        let inner = self.lock()?;
        let devices: BTreeSet<&DeviceId> = inner.records.iter().map(|r| &r.device_id).collect();
        Ok(devices.into_iter().cloned().collect())
    }

    async fn device_history(
        &self,
        device_id: &DeviceId,
        filter: HistoryFilter,
    ) -> Result<Vec<SensorRecord>, StoreError> {
        self.check_available()?;

        let inner = self.lock()?;
        let mut matching: Vec<SensorRecord> = inner
            .records
            .iter()
            .filter(|r| &r.device_id == device_id && filter.contains(r.timestamp))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        matching.truncate(usize::try_from(filter.limit).unwrap_or(0));
        Ok(matching)
    }

    async fn stats(&self) -> Result<StatsResponse, StoreError> {
        self.check_available()?;

        let inner = self.lock()?;
        let devices: BTreeSet<&DeviceId> = inner.records.iter().map(|r| &r.device_id).collect();
        Ok(StatsResponse {
            device_count: devices.len() as i64,
            message_count: inner.records.len() as i64,
            last_message_time: inner.records.iter().map(|r| r.timestamp).max(),
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_available()
    }
}
