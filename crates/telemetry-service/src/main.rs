//! Telemetry Service
//!
//! Entry point for the sensor telemetry collector. Subscribes to device
//! telemetry on the MQTT broker, persists each reading, and serves the read API.

use common::secret::ExposeSecret;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use telemetry_service::broker::{ConnectionManager, MqttSession};
use telemetry_service::config::Config;
use telemetry_service::observability::MetricsRegistry;
use telemetry_service::processing::MessageProcessor;
use telemetry_service::repositories::{PgSensorStore, SensorStore};
use telemetry_service::routes::{self, AppState};
use telemetry_service::services::{HealthAggregator, QueryService};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Capacity of the broker -> processor delivery channel.
const DELIVERY_CHANNEL_CAPACITY: usize = 1024;

/// Maximum pooled database connections, shared by ingestion and queries.
const DB_MAX_CONNECTIONS: u32 = 10;

/// Server-side statement timeout in seconds.
const DB_STATEMENT_TIMEOUT_SECS: u32 = 5;

/// How long background tasks get to finish after shutdown is requested.
const TASK_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "telemetry_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Telemetry Service");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        broker_host = %config.broker_host,
        broker_port = config.broker_port,
        client_id = %config.client_id,
        bind_address = %config.bind_address,
        "Configuration loaded successfully"
    );

    // Connections open on first use; an unreachable database shows up in
    // /health instead of stopping startup.
    let db_url_with_timeout = add_query_timeout(
        config.database_url.expose_secret(),
        DB_STATEMENT_TIMEOUT_SECS,
    );
    let db_pool = db_pool_options()
        .connect_lazy(&db_url_with_timeout)
        .map_err(|e| {
            error!("Invalid database configuration: {}", e);
            e
        })?;

    info!("Database pool created");

    let store: Arc<dyn SensorStore> = Arc::new(PgSensorStore::new(db_pool));
    let metrics = Arc::new(MetricsRegistry::new());
    let cancel_token = CancellationToken::new();

    // Ingestion pipeline: broker -> bounded channel -> processor -> store
    let (delivery_tx, delivery_rx) = mpsc::channel(DELIVERY_CHANNEL_CAPACITY);
    let session = MqttSession::new(&config.broker_host, config.broker_port, &config.client_id);
    let (connection_manager, connection_state) = ConnectionManager::new(
        session,
        config.topics.clone(),
        delivery_tx,
        Arc::clone(&metrics),
    );
    let processor = MessageProcessor::new(Arc::clone(&store), Arc::clone(&metrics));

    let broker_task = tokio::spawn(connection_manager.run(cancel_token.child_token()));
    let processor_task = tokio::spawn(processor.run(delivery_rx, cancel_token.child_token()));

    // Read side
    let state = Arc::new(AppState {
        query: QueryService::new(Arc::clone(&store)),
        health: HealthAggregator::new(connection_state, store),
        metrics,
    });
    let app = routes::build_routes(state);

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    info!("Telemetry Service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, stopping ingestion");
    cancel_token.cancel();

    let background = async {
        if let Err(e) = broker_task.await {
            error!("Broker task failed: {}", e);
        }
        if let Err(e) = processor_task.await {
            error!("Processor task failed: {}", e);
        }
    };
    if tokio::time::timeout(TASK_SHUTDOWN_GRACE, background)
        .await
        .is_err()
    {
        warn!("Background tasks did not stop within {:?}", TASK_SHUTDOWN_GRACE);
    }

    info!("Telemetry Service shutdown complete");

    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Pool settings. Callers beyond the cap queue instead of failing.
fn db_pool_options() -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(DB_MAX_CONNECTIONS)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
}

/// Appends a server-side `statement_timeout` to the connection URL, keeping
/// any existing query parameters.
fn add_query_timeout(url: &str, timeout_secs: u32) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!(
        "{}{}options=-c%20statement_timeout%3D{}s",
        url, separator, timeout_secs
    )
}
