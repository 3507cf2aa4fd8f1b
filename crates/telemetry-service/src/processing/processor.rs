//! Message Processor.
//!
//! Consumes [`InboundMessage`]s from the delivery channel one at a time, in
//! delivery order. For each message:
//!
//! 1. Parse the payload as JSON; it must be an object carrying a non-empty
//!    `deviceId` string.
//! 2. Count it in `mqtt_messages_total{topic,device_id}`.
//! 3. Append a [`NewSensorRecord`] stamped with the arrival time, truncated to
//!    the microsecond precision of the store.
//!
//! Messages failing step 1 are dropped without touching the store or the
//! message counter. Failed appends are dropped as well; nothing is retried.

use crate::broker::InboundMessage;
use crate::errors::IngestError;
use crate::models::{NewSensorRecord, SensorRecord};
use crate::observability::MetricsRegistry;
use crate::repositories::SensorStore;
use chrono::{DateTime, SubsecRound, Utc};
use common::types::DeviceId;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Longest payload prefix included in log events.
pub const LOG_PAYLOAD_LIMIT: usize = 256;

/// Fractional-second digits kept on record timestamps.
const STORED_SUBSEC_DIGITS: u16 = 6;

/// Field every device document must carry.
const DEVICE_ID_FIELD: &str = "deviceId";

/// Validate a raw payload and build the record to persist.
///
/// Pure: the same bytes always yield the same record apart from `arrival`.
/// The timestamp keeps microseconds so it round-trips through `TIMESTAMPTZ`.
pub fn parse_message(
    topic: &str,
    payload: &[u8],
    arrival: DateTime<Utc>,
) -> Result<NewSensorRecord, IngestError> {
    let document: serde_json::Value =
        serde_json::from_slice(payload).map_err(|e| IngestError::Parse(e.to_string()))?;

    let device_id = match document.get(DEVICE_ID_FIELD) {
        Some(serde_json::Value::String(raw)) => DeviceId::parse(raw.as_str())
            .map_err(|e| IngestError::Validation(format!("{DEVICE_ID_FIELD}: {e}")))?,
        Some(_) => {
            return Err(IngestError::Validation(format!(
                "{DEVICE_ID_FIELD} must be a string"
            )))
        }
        None if document.is_object() => {
            return Err(IngestError::Validation(format!(
                "missing {DEVICE_ID_FIELD}"
            )))
        }
        None => {
            return Err(IngestError::Validation(
                "payload must be a JSON object".to_string(),
            ))
        }
    };

    Ok(NewSensorRecord {
        device_id,
        topic: topic.to_string(),
        payload: document,
        timestamp: arrival.trunc_subsecs(STORED_SUBSEC_DIGITS),
    })
}

/// Lossy, length-bounded rendering of a payload for logs.
fn payload_for_log(payload: &[u8]) -> String {
    let end = payload.len().min(LOG_PAYLOAD_LIMIT);
    let head = payload.get(..end).unwrap_or_default();
    let mut rendered = String::from_utf8_lossy(head).into_owned();
    if payload.len() > LOG_PAYLOAD_LIMIT {
        rendered.push_str("...");
    }
    rendered
}

/// Turns inbound broker messages into stored records.
pub struct MessageProcessor {
    store: Arc<dyn SensorStore>,
    metrics: Arc<MetricsRegistry>,
}

impl MessageProcessor {
    pub fn new(store: Arc<dyn SensorStore>, metrics: Arc<MetricsRegistry>) -> Self {
        Self { store, metrics }
    }

    /// Process one message. Failures are logged and counted, never propagated
    /// beyond the returned value.
    pub async fn on_message(&self, message: &InboundMessage) -> Result<SensorRecord, IngestError> {
        let record = match parse_message(&message.topic, &message.payload, message.received_at) {
            Ok(record) => record,
            Err(e) => {
                warn!(
                    target: "telemetry.processor",
                    topic = %message.topic,
                    payload = %payload_for_log(&message.payload),
                    error = %e,
                    "Dropping invalid message"
                );
                self.metrics.record_drop(e.reason());
                return Err(e);
            }
        };

        self.metrics
            .record_message(&message.topic, record.device_id.as_str());

        match self.store.append(record).await {
            Ok(stored) => {
                debug!(
                    target: "telemetry.processor",
                    id = stored.id,
                    topic = %stored.topic,
                    device_id = %stored.device_id,
                    "Message stored"
                );
                Ok(stored)
            }
            Err(e) => {
                let e = IngestError::from(e);
                warn!(
                    target: "telemetry.processor",
                    topic = %message.topic,
                    error = %e,
                    "Dropping message, store append failed"
                );
                self.metrics.record_drop(e.reason());
                Err(e)
            }
        }
    }

    /// Drain `deliveries` until it closes or `cancel_token` fires.
    pub async fn run(
        self,
        mut deliveries: mpsc::Receiver<InboundMessage>,
        cancel_token: CancellationToken,
    ) {
        info!(target: "telemetry.processor", "Message processor started");

        loop {
            tokio::select! {
                () = cancel_token.cancelled() => break,
                next = deliveries.recv() => match next {
                    Some(message) => {
                        if let Err(e) = self.on_message(&message).await {
                            debug!(
                                target: "telemetry.processor",
                                reason = e.reason(),
                                "Message not stored"
                            );
                        }
                    }
                    None => break,
                },
            }
        }

        info!(target: "telemetry.processor", "Message processor stopped");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::observability::metrics::{MESSAGES_DROPPED_TOTAL, MESSAGES_TOTAL};
    use crate::repositories::InMemorySensorStore;
    use bytes::Bytes;

    const TOPIC: &str = "sensors/sensor-1/data";

    fn inbound(payload: &'static [u8]) -> InboundMessage {
        InboundMessage {
            topic: TOPIC.to_string(),
            payload: Bytes::from_static(payload),
            received_at: Utc::now(),
        }
    }

    fn processor() -> (MessageProcessor, Arc<InMemorySensorStore>, Arc<MetricsRegistry>) {
        let store = Arc::new(InMemorySensorStore::new());
        let metrics = Arc::new(MetricsRegistry::new());
        let processor = MessageProcessor::new(store.clone(), Arc::clone(&metrics));
        (processor, store, metrics)
    }

    #[test]
    fn test_parse_keeps_extra_fields_verbatim() {
        let arrival = Utc::now();
        let record = parse_message(
            TOPIC,
            br#"{"deviceId":"sensor-1","temp":21.5,"meta":{"fw":"1.2"}}"#,
            arrival,
        )
        .unwrap();

        assert_eq!(record.device_id.as_str(), "sensor-1");
        assert_eq!(record.topic, TOPIC);
        assert_eq!(record.payload["temp"], 21.5);
        assert_eq!(record.payload["meta"]["fw"], "1.2");
        assert_eq!(record.timestamp, arrival.trunc_subsecs(6));
    }

    #[test]
    fn test_parse_truncates_timestamp_to_microseconds() {
        let arrival: DateTime<Utc> = "2025-03-01T10:00:00.123456789Z".parse().unwrap();
        let record = parse_message(TOPIC, br#"{"deviceId":"sensor-1"}"#, arrival).unwrap();

        let expected: DateTime<Utc> = "2025-03-01T10:00:00.123456Z".parse().unwrap();
        assert_eq!(record.timestamp, expected);
    }

    #[test]
    fn test_parse_accepts_any_non_empty_device_id() {
        let arrival = Utc::now();

        let long_id = "d".repeat(300);
        let payload = serde_json::json!({"deviceId": long_id, "temp": 1}).to_string();
        let record = parse_message(TOPIC, payload.as_bytes(), arrival).unwrap();
        assert_eq!(record.device_id.as_str(), long_id);

        let record = parse_message(TOPIC, br#"{"deviceId":" "}"#, arrival).unwrap();
        assert_eq!(record.device_id.as_str(), " ");
    }

    #[test]
    fn test_parse_is_deterministic_for_same_bytes() {
        let arrival = Utc::now();
        let bytes = br#"{"deviceId":"sensor-1","temp":21.5}"#;

        let first = parse_message(TOPIC, bytes, arrival).unwrap();
        let second = parse_message(TOPIC, bytes, arrival).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_parse_rejects_malformed_and_incomplete_payloads() {
        let arrival = Utc::now();

        let cases: [(&[u8], &str); 6] = [
            (b"not json", "parse_error"),
            (b"{\"deviceId\":", "parse_error"),
            (b"{\"temp\":21.5}", "validation_error"),
            (b"{\"deviceId\":\"\"}", "validation_error"),
            (b"{\"deviceId\":42}", "validation_error"),
            (b"[1,2,3]", "validation_error"),
        ];

        for (payload, reason) in cases {
            let err = parse_message(TOPIC, payload, arrival).unwrap_err();
            assert_eq!(
                err.reason(),
                reason,
                "unexpected outcome for {:?}",
                String::from_utf8_lossy(payload)
            );
        }
    }

    #[test]
    fn test_payload_for_log_truncates() {
        let long = vec![b'x'; LOG_PAYLOAD_LIMIT + 10];
        let rendered = payload_for_log(&long);
        assert_eq!(rendered.len(), LOG_PAYLOAD_LIMIT + 3);
        assert!(rendered.ends_with("..."));

        assert_eq!(payload_for_log(b"{\"a\":1}"), "{\"a\":1}");
    }

    #[tokio::test]
    async fn test_valid_message_is_counted_and_stored() {
        let (processor, store, metrics) = processor();

        let stored = processor
            .on_message(&inbound(br#"{"deviceId":"sensor-1","temp":21.5}"#))
            .await
            .unwrap();

        assert_eq!(stored.id, 1);
        assert_eq!(store.records().len(), 1);
        assert_eq!(
            metrics.counter_value(
                MESSAGES_TOTAL,
                &[("topic", TOPIC), ("device_id", "sensor-1")]
            ),
            Some(1.0)
        );
    }

    #[tokio::test]
    async fn test_malformed_message_never_reaches_store() {
        let (processor, store, metrics) = processor();

        assert!(processor.on_message(&inbound(b"garbage")).await.is_err());
        assert!(processor
            .on_message(&inbound(br#"{"temp":1}"#))
            .await
            .is_err());

        assert_eq!(store.append_calls(), 0);
        assert_eq!(
            metrics.counter_value(MESSAGES_TOTAL, &[("topic", TOPIC), ("device_id", "sensor-1")]),
            None
        );
        assert_eq!(
            metrics.counter_value(MESSAGES_DROPPED_TOTAL, &[("reason", "parse_error")]),
            Some(1.0)
        );
        assert_eq!(
            metrics.counter_value(MESSAGES_DROPPED_TOTAL, &[("reason", "validation_error")]),
            Some(1.0)
        );
    }

    #[tokio::test]
    async fn test_store_failure_does_not_stop_processing() {
        let (processor, store, metrics) = processor();
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        store.set_available(false);
        tx.send(inbound(br#"{"deviceId":"sensor-1","n":1}"#))
            .await
            .unwrap();

        let task = tokio::spawn(processor.run(rx, cancel.clone()));

        // Wait for the failed append before restoring the store
        for _ in 0..100 {
            if store.append_calls() == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        store.set_available(true);
        tx.send(inbound(br#"{"deviceId":"sensor-1","n":2}"#))
            .await
            .unwrap();
        drop(tx);

        task.await.unwrap();

        let records = store.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records.first().unwrap().payload["n"], 2);
        assert_eq!(
            metrics.counter_value(MESSAGES_DROPPED_TOTAL, &[("reason", "store_write_error")]),
            Some(1.0)
        );
    }
}
