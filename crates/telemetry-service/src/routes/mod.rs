//! HTTP routes for the telemetry service.
//!
//! Defines the Axum router and application state.

use crate::handlers;
use crate::middleware::http_metrics_middleware;
use crate::observability::MetricsRegistry;
use crate::services::{HealthAggregator, QueryService};
use axum::{middleware, routing::get, Router};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Read operations over the store.
    pub query: QueryService,

    /// Composite broker/store health.
    pub health: HealthAggregator,

    /// Registry rendered by `/metrics` and fed by the HTTP middleware.
    pub metrics: Arc<MetricsRegistry>,
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/api/devices` - Distinct devices
/// - `/api/devices/:device_id/data` - Device history
/// - `/api/stats` - Aggregate statistics
/// - `/health` - Composite health (store ping + broker state)
/// - `/metrics` - Prometheus metrics endpoint
/// - TraceLayer for request logging
/// - HTTP metrics middleware
/// - 30 second request timeout
pub fn build_routes(state: Arc<AppState>) -> Router {
    let metrics = Arc::clone(&state.metrics);

    let api_routes = Router::new()
        .route("/api/devices", get(handlers::list_devices))
        .route("/api/devices/:device_id/data", get(handlers::device_history))
        .route("/api/stats", get(handlers::get_stats))
        .route("/health", get(handlers::health_check))
        .with_state(state);

    // Metrics route with its own state
    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(Arc::clone(&metrics));

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer - Timeout the request (innermost)
    // 2. TraceLayer - Log request details
    // 3. http_metrics_middleware - Record ALL responses (outermost)
    api_routes
        .merge(metrics_routes)
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn_with_state(
            metrics,
            http_metrics_middleware,
        ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::broker::ConnectionStateHandle;
    use crate::models::{ConnectionState, NewSensorRecord};
    use crate::repositories::{InMemorySensorStore, SensorStore};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use common::types::DeviceId;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }

    fn app(store: Arc<InMemorySensorStore>, broker: ConnectionState) -> Router {
        let state = Arc::new(AppState {
            query: QueryService::new(store.clone()),
            health: HealthAggregator::new(ConnectionStateHandle::fixed(broker), store),
            metrics: Arc::new(MetricsRegistry::new()),
        });
        build_routes(state)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_device_routes() {
        let store = Arc::new(InMemorySensorStore::new());
        store
            .append(NewSensorRecord {
                device_id: DeviceId::parse("sensor-1").unwrap(),
                topic: "sensors/sensor-1/data".to_string(),
                payload: serde_json::json!({"deviceId": "sensor-1", "temp": 21.5}),
                timestamp: Utc::now(),
            })
            .await
            .unwrap();
        let app = app(store, ConnectionState::Connected);

        let (status, body) = get_json(app.clone(), "/api/devices").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!([{"device_id": "sensor-1"}]));

        let (status, body) = get_json(app, "/api/devices/sensor-1/data?limit=1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["payload"]["temp"], 21.5);
        assert_eq!(body[0]["device_id"], "sensor-1");
    }

    #[tokio::test]
    async fn test_malformed_query_is_bad_request() {
        let app = app(Arc::new(InMemorySensorStore::new()), ConnectionState::Connected);

        let (status, body) = get_json(app.clone(), "/api/devices/sensor-1/data?limit=ten").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "BAD_REQUEST");

        let (status, _) = get_json(app, "/api/devices/sensor-1/data?from=yesterday").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_whitespace_device_id_is_an_ordinary_lookup() {
        let app = app(Arc::new(InMemorySensorStore::new()), ConnectionState::Connected);

        let (status, body) = get_json(app, "/api/devices/%20/data").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_store_outage_is_server_error() {
        let store = Arc::new(InMemorySensorStore::new());
        store.set_available(false);
        let app = app(store, ConnectionState::Connected);

        let (status, body) = get_json(app.clone(), "/api/stats").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["code"], "DATABASE_ERROR");

        let (status, body) = get_json(app, "/health").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["status"], "unhealthy");
        assert_eq!(body["services"]["database"], "disconnected");
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_metrics_endpoint_reports_http_requests() {
        let app = app(Arc::new(InMemorySensorStore::new()), ConnectionState::Connected);

        let (status, _) = get_json(app.clone(), "/api/stats").await;
        assert_eq!(status, StatusCode::OK);

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/plain"));
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("http_requests_total"));
        assert!(text.contains("route=\"/api/stats\""));
    }
}
