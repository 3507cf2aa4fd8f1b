//! Test server harness for E2E testing
//!
//! Provides `TestTelemetryServer` for spawning real telemetry service instances
//! in tests.

use crate::mock_broker::MockBroker;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use telemetry_service::broker::{
    BackoffPolicy, ConnectionManager, ConnectionStateHandle, TopicFilter,
};
use telemetry_service::models::ConnectionState;
use telemetry_service::observability::MetricsRegistry;
use telemetry_service::processing::MessageProcessor;
use telemetry_service::repositories::SensorStore;
use telemetry_service::routes::{self, AppState};
use telemetry_service::services::{HealthAggregator, QueryService};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Backoff used by harness pipelines so reconnect tests stay fast.
pub const TEST_BACKOFF: BackoffPolicy = BackoffPolicy {
    initial: Duration::from_millis(10),
    max: Duration::from_millis(100),
};

/// Test harness for spawning the telemetry service in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_stats_e2e() -> Result<()> {
///     let store = Arc::new(InMemorySensorStore::new());
///     let server = TestTelemetryServer::spawn(store).await?;
///
///     let response = reqwest::get(format!("{}/api/stats", server.url())).await?;
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestTelemetryServer {
    addr: SocketAddr,
    metrics: Arc<MetricsRegistry>,
    connection: ConnectionStateHandle,
    cancel_token: CancellationToken,
    _handle: JoinHandle<()>,
}

impl TestTelemetryServer {
    /// Spawn the read API over `store`, reporting the broker as connected.
    ///
    /// No ingestion pipeline runs; seed the store directly.
    pub async fn spawn(store: Arc<dyn SensorStore>) -> Result<Self, anyhow::Error> {
        Self::spawn_with_state(
            store,
            ConnectionStateHandle::fixed(ConnectionState::Connected),
            Arc::new(MetricsRegistry::new()),
            CancellationToken::new(),
        )
        .await
    }

    /// Spawn the read API plus the full ingestion pipeline fed by `broker`.
    ///
    /// The Connection Manager subscribes to `topics` and uses [`TEST_BACKOFF`].
    pub async fn spawn_with_broker(
        store: Arc<dyn SensorStore>,
        broker: &MockBroker,
        topics: Vec<TopicFilter>,
    ) -> Result<Self, anyhow::Error> {
        let metrics = Arc::new(MetricsRegistry::new());
        let cancel_token = CancellationToken::new();

        let (tx, rx) = mpsc::channel(64);
        let (manager, connection) =
            ConnectionManager::new(broker.session(), topics, tx, Arc::clone(&metrics));
        let manager = manager.with_backoff(TEST_BACKOFF);
        let processor = MessageProcessor::new(Arc::clone(&store), Arc::clone(&metrics));

        tokio::spawn(manager.run(cancel_token.child_token()));
        tokio::spawn(processor.run(rx, cancel_token.child_token()));

        Self::spawn_with_state(store, connection, metrics, cancel_token).await
    }

    async fn spawn_with_state(
        store: Arc<dyn SensorStore>,
        connection: ConnectionStateHandle,
        metrics: Arc<MetricsRegistry>,
        cancel_token: CancellationToken,
    ) -> Result<Self, anyhow::Error> {
        let state = Arc::new(AppState {
            query: QueryService::new(Arc::clone(&store)),
            health: HealthAggregator::new(connection.clone(), store),
            metrics: Arc::clone(&metrics),
        });

        // Build routes using the service's real route builder
        let app = routes::build_routes(state);

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        // Spawn server in background
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            metrics,
            connection,
            cancel_token,
            _handle: handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Registry shared by the server and its pipeline.
    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    /// Broker connection state as seen by the health endpoint.
    pub fn connection_state(&self) -> ConnectionStateHandle {
        self.connection.clone()
    }
}

impl Drop for TestTelemetryServer {
    fn drop(&mut self) {
        // Stop the pipeline and the HTTP server when the test completes
        self.cancel_token.cancel();
        self._handle.abort();
    }
}
