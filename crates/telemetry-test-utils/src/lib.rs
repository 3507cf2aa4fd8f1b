//! Test utilities for the telemetry service.
//!
//! - `server_harness` - `TestTelemetryServer`, the real router on a random port,
//!   optionally with the full ingestion pipeline behind it
//! - `mock_broker` - `MockBroker`, an in-process broker with wildcard-aware
//!   delivery and connection-drop injection
//! - `fixtures` - Topics and payloads

pub mod fixtures;
pub mod mock_broker;
pub mod server_harness;

pub use mock_broker::{MockBroker, MockSession};
pub use server_harness::TestTelemetryServer;
