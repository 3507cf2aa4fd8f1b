//! HTTP request handlers for the telemetry service.

pub mod devices;
pub mod health;
pub mod metrics;
pub mod stats;

pub use devices::{device_history, list_devices};
pub use health::health_check;
pub use metrics::metrics_handler;
pub use stats::get_stats;
