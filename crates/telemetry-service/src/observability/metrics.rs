//! Metrics Registry for the telemetry service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! The registry owns its own Prometheus recorder and is passed explicitly to
//! every component that records. Nothing is installed globally, so each test
//! can build a fresh registry and read back exactly what it recorded.
//!
//! # Cardinality
//!
//! - `topic`, `device_id`: bounded by the device fleet
//! - `reason`: bounded by [`IngestError`](crate::errors::IngestError) variants
//! - `method`, `route`: bounded by the router (unmatched paths are `/other`)

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{
    Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder,
};
#[cfg(any(test, feature = "test-utils"))]
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
#[cfg(any(test, feature = "test-utils"))]
use metrics_util::MetricKind;
use std::fmt;
use std::time::Duration;

/// Ingested messages, labelled by `topic` and `device_id`.
pub const MESSAGES_TOTAL: &str = "mqtt_messages_total";

/// Messages that did not become a stored record, labelled by `reason`.
pub const MESSAGES_DROPPED_TOTAL: &str = "mqtt_messages_dropped_total";

/// Broker connection failures that triggered a reconnect.
pub const RECONNECTS_TOTAL: &str = "mqtt_reconnects_total";

/// HTTP responses, labelled by `method`, `route` and `status`.
pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";

/// HTTP request latency, labelled like [`HTTP_REQUESTS_TOTAL`].
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";

/// Request latency buckets in seconds.
const HTTP_DURATION_BUCKETS: &[f64] = &[0.1, 0.3, 0.5, 0.7, 1.0, 3.0, 5.0, 7.0, 10.0];

/// Process-wide counters and histograms.
///
/// With the `test-utils` feature every sample is also captured by a
/// `metrics_util` debugging recorder so tests can read values back through
/// [`MetricsRegistry::counter_value`].
pub struct MetricsRegistry {
    prometheus: PrometheusRecorder,
    handle: PrometheusHandle,
    #[cfg(any(test, feature = "test-utils"))]
    debugging: DebuggingRecorder,
    #[cfg(any(test, feature = "test-utils"))]
    snapshotter: Snapshotter,
}

impl fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsRegistry").finish_non_exhaustive()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        let builder = match PrometheusBuilder::new().set_buckets_for_metric(
            Matcher::Full(HTTP_REQUEST_DURATION_SECONDS.to_string()),
            HTTP_DURATION_BUCKETS,
        ) {
            Ok(builder) => builder,
            Err(e) => {
                tracing::warn!(error = %e, "Falling back to summary for request latency");
                PrometheusBuilder::new()
            }
        };

        let prometheus = builder.build_recorder();
        let handle = prometheus.handle();

        #[cfg(any(test, feature = "test-utils"))]
        let debugging = DebuggingRecorder::new();

        Self {
            prometheus,
            handle,
            #[cfg(any(test, feature = "test-utils"))]
            snapshotter: debugging.snapshotter(),
            #[cfg(any(test, feature = "test-utils"))]
            debugging,
        }
    }

    /// Run `record` against every recorder owned by this registry.
    fn with_recorders(&self, record: impl Fn()) {
        metrics::with_local_recorder(&self.prometheus, &record);
        #[cfg(any(test, feature = "test-utils"))]
        metrics::with_local_recorder(&self.debugging, &record);
    }

    /// Count one successfully validated message.
    pub fn record_message(&self, topic: &str, device_id: &str) {
        self.with_recorders(|| {
            counter!(MESSAGES_TOTAL,
                "topic" => topic.to_string(),
                "device_id" => device_id.to_string()
            )
            .increment(1);
        });
    }

    /// Count one dropped message.
    pub fn record_drop(&self, reason: &'static str) {
        self.with_recorders(|| {
            counter!(MESSAGES_DROPPED_TOTAL, "reason" => reason).increment(1);
        });
    }

    /// Count one broker connection failure.
    pub fn record_broker_reconnect(&self) {
        self.with_recorders(|| {
            counter!(RECONNECTS_TOTAL).increment(1);
        });
    }

    /// Record HTTP request completion.
    pub fn record_http_request(&self, method: &str, route: &str, status: u16, duration: Duration) {
        let labels = [
            ("method", method.to_string()),
            ("route", route.to_string()),
            ("status", status.to_string()),
        ];
        self.with_recorders(|| {
            counter!(HTTP_REQUESTS_TOTAL, labels.as_slice()).increment(1);
            histogram!(HTTP_REQUEST_DURATION_SECONDS, labels.as_slice())
                .record(duration.as_secs_f64());
        });
    }

    /// Prometheus text exposition of every recorded series.
    pub fn render(&self) -> String {
        self.handle.render()
    }

    /// Current value of the counter `name` with exactly `labels`, in any order.
    ///
    /// Returns `None` if the series has never been recorded.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn counter_value(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        let mut wanted = labels.to_vec();
        wanted.sort_unstable();

        self.snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .find_map(|(composite, _, _, value)| {
                if composite.kind() != MetricKind::Counter || composite.key().name() != name {
                    return None;
                }
                let mut found: Vec<(&str, &str)> = composite
                    .key()
                    .labels()
                    .map(|label| (label.key(), label.value()))
                    .collect();
                found.sort_unstable();
                match value {
                    DebugValue::Counter(count) if found == wanted => Some(count as f64),
                    _ => None,
                }
            })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_message_counter_is_keyed_by_topic_and_device() {
        let registry = MetricsRegistry::new();

        registry.record_message("sensors/sensor-1/data", "sensor-1");
        registry.record_message("sensors/sensor-1/data", "sensor-1");
        registry.record_message("sensors/sensor-2/data", "sensor-2");

        assert_eq!(
            registry.counter_value(
                MESSAGES_TOTAL,
                &[("topic", "sensors/sensor-1/data"), ("device_id", "sensor-1")]
            ),
            Some(2.0)
        );
        // Label order does not matter
        assert_eq!(
            registry.counter_value(
                MESSAGES_TOTAL,
                &[("device_id", "sensor-2"), ("topic", "sensors/sensor-2/data")]
            ),
            Some(1.0)
        );
        assert_eq!(
            registry.counter_value(MESSAGES_TOTAL, &[("topic", "sensors/sensor-1/data")]),
            None
        );
    }

    #[test]
    fn test_registries_are_isolated() {
        let first = MetricsRegistry::new();
        let second = MetricsRegistry::new();

        first.record_drop("parse_error");

        assert_eq!(
            first.counter_value(MESSAGES_DROPPED_TOTAL, &[("reason", "parse_error")]),
            Some(1.0)
        );
        assert_eq!(
            second.counter_value(MESSAGES_DROPPED_TOTAL, &[("reason", "parse_error")]),
            None
        );
    }

    #[test]
    fn test_unlabelled_counter() {
        let registry = MetricsRegistry::new();
        assert_eq!(registry.counter_value(RECONNECTS_TOTAL, &[]), None);

        registry.record_broker_reconnect();
        registry.record_broker_reconnect();

        assert_eq!(registry.counter_value(RECONNECTS_TOTAL, &[]), Some(2.0));
    }

    #[test]
    fn test_http_request_renders_counter_and_histogram() {
        let registry = MetricsRegistry::new();

        registry.record_http_request("GET", "/api/stats", 200, Duration::from_millis(40));

        assert_eq!(
            registry.counter_value(
                HTTP_REQUESTS_TOTAL,
                &[("method", "GET"), ("route", "/api/stats"), ("status", "200")]
            ),
            Some(1.0)
        );
        let rendered = registry.render();
        assert!(rendered.contains("http_request_duration_seconds_bucket"));
        assert!(rendered.contains("le=\"0.1\""));
    }
}
