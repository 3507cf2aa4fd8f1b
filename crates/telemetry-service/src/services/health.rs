//! Health Aggregator.
//!
//! Combines the Connection Manager's state with a liveness ping against the
//! Persistence Store. Overall health is the AND of both components.

use crate::broker::ConnectionStateHandle;
pub use crate::models::{ComponentState, HealthStatus};
use crate::repositories::SensorStore;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Bound on the store liveness ping.
pub const PING_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Components {
    pub broker: ComponentState,
    pub store: ComponentState,
}

/// Result of one health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub components: Components,
}

/// Produces the composite health signal.
#[derive(Clone)]
pub struct HealthAggregator {
    connection: ConnectionStateHandle,
    store: Arc<dyn SensorStore>,
    ping_timeout: Duration,
}

impl HealthAggregator {
    pub fn new(connection: ConnectionStateHandle, store: Arc<dyn SensorStore>) -> Self {
        Self {
            connection,
            store,
            ping_timeout: PING_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    /// Check both components now. Never consults stored history.
    pub async fn check_health(&self) -> HealthReport {
        let broker_ready = self.connection.current().is_connected();

        let store_ready = match tokio::time::timeout(self.ping_timeout, self.store.ping()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(target: "telemetry.store", error = %e, "Store liveness ping failed");
                false
            }
            Err(_) => {
                warn!(target: "telemetry.store", "Store liveness ping timed out");
                false
            }
        };

        let status = if broker_ready && store_ready {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };

        HealthReport {
            status,
            components: Components {
                broker: ComponentState::from_ready(broker_ready),
                store: ComponentState::from_ready(store_ready),
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::ConnectionState;
    use crate::repositories::InMemorySensorStore;

    fn aggregator(state: ConnectionState, store_up: bool) -> HealthAggregator {
        let store = Arc::new(InMemorySensorStore::new());
        store.set_available(store_up);
        HealthAggregator::new(ConnectionStateHandle::fixed(state), store)
    }

    #[tokio::test]
    async fn test_all_components_ready_is_healthy() {
        let report = aggregator(ConnectionState::Connected, true)
            .check_health()
            .await;

        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.components.broker, ComponentState::Connected);
        assert_eq!(report.components.store, ComponentState::Connected);
    }

    #[tokio::test]
    async fn test_store_down_is_unhealthy_regardless_of_broker() {
        for state in [
            ConnectionState::Connected,
            ConnectionState::Reconnecting,
            ConnectionState::Disconnected,
        ] {
            let report = aggregator(state, false).check_health().await;
            assert_eq!(report.status, HealthStatus::Unhealthy);
            assert_eq!(report.components.store, ComponentState::Disconnected);
        }
    }

    #[tokio::test]
    async fn test_broker_not_connected_is_unhealthy() {
        for state in [ConnectionState::Connecting, ConnectionState::Reconnecting] {
            let report = aggregator(state, true).check_health().await;
            assert_eq!(report.status, HealthStatus::Unhealthy);
            assert_eq!(report.components.broker, ComponentState::Disconnected);
            assert_eq!(report.components.store, ComponentState::Connected);
        }
    }

    #[test]
    fn test_report_serialization() {
        let report = HealthReport {
            status: HealthStatus::Unhealthy,
            components: Components {
                broker: ComponentState::Connected,
                store: ComponentState::Disconnected,
            },
        };

        let value = serde_json::to_value(report).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "status": "unhealthy",
                "components": {"broker": "connected", "store": "disconnected"}
            })
        );
    }
}
