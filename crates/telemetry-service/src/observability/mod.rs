//! Observability for the telemetry service.

pub mod metrics;

pub use self::metrics::MetricsRegistry;
