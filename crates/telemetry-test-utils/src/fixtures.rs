//! Topics and payloads shared by tests.

use telemetry_service::broker::TopicFilter;

/// Default subscription filter used by the service.
pub const SENSOR_FILTER: &str = "sensors/+/data";

/// Topic a device publishes readings on.
pub fn sensor_topic(device_id: &str) -> String {
    format!("sensors/{device_id}/data")
}

/// A temperature reading as published by a device.
pub fn temperature_payload(device_id: &str, temp: f64) -> Vec<u8> {
    serde_json::json!({ "deviceId": device_id, "temp": temp })
        .to_string()
        .into_bytes()
}

/// Filters the service subscribes to by default.
pub fn default_topics() -> Vec<TopicFilter> {
    vec![TopicFilter::parse(SENSOR_FILTER).expect("default filter is valid")]
}
