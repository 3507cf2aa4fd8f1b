//! HTTP metrics middleware.
//!
//! Records `http_requests_total` and `http_request_duration_seconds` for every
//! response, including framework-level rejections (404, 405, 400 from
//! extractors) that never reach a handler.

use crate::observability::MetricsRegistry;
use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use std::time::Instant;

/// Route label for requests that matched no route.
pub const UNMATCHED_ROUTE: &str = "/other";

/// Middleware that records request metrics into the injected registry.
///
/// The `route` label is the route template (`/api/devices/:device_id/data`),
/// never the concrete path, so device ids do not leak into HTTP labels.
pub async fn http_metrics_middleware(
    State(metrics): State<Arc<MetricsRegistry>>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| UNMATCHED_ROUTE.to_string(), |p| p.as_str().to_string());

    let response = next.run(request).await;

    metrics.record_http_request(&method, &route, response.status().as_u16(), start.elapsed());

    response
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::observability::metrics::HTTP_REQUESTS_TOTAL;
    use axum::{
        body::Body,
        http::{Request as HttpRequest, StatusCode},
        middleware,
        routing::get,
        Router,
    };
    use tower::ServiceExt;

    async fn handler_200() -> &'static str {
        "OK"
    }

    async fn handler_500() -> (StatusCode, &'static str) {
        (StatusCode::INTERNAL_SERVER_ERROR, "Error")
    }

    fn test_app(metrics: Arc<MetricsRegistry>) -> Router {
        Router::new()
            .route("/items/:id", get(handler_200))
            .route("/error", get(handler_500))
            .layer(middleware::from_fn_with_state(
                metrics,
                http_metrics_middleware,
            ))
    }

    async fn send(app: Router, uri: &str) -> StatusCode {
        let request = HttpRequest::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .expect("request builder should succeed");
        app.oneshot(request)
            .await
            .expect("request should succeed")
            .status()
    }

    #[tokio::test]
    async fn test_records_route_template_not_path() {
        let metrics = Arc::new(MetricsRegistry::new());

        assert_eq!(send(test_app(metrics.clone()), "/items/abc").await, StatusCode::OK);
        assert_eq!(send(test_app(metrics.clone()), "/items/xyz").await, StatusCode::OK);

        assert_eq!(
            metrics.counter_value(
                HTTP_REQUESTS_TOTAL,
                &[("method", "GET"), ("route", "/items/:id"), ("status", "200")]
            ),
            Some(2.0)
        );
    }

    #[tokio::test]
    async fn test_records_error_status() {
        let metrics = Arc::new(MetricsRegistry::new());

        let status = send(test_app(metrics.clone()), "/error").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        assert_eq!(
            metrics.counter_value(
                HTTP_REQUESTS_TOTAL,
                &[("method", "GET"), ("route", "/error"), ("status", "500")]
            ),
            Some(1.0)
        );
    }

    #[tokio::test]
    async fn test_unmatched_path_uses_other_label() {
        let metrics = Arc::new(MetricsRegistry::new());

        let status = send(test_app(metrics.clone()), "/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        assert_eq!(
            metrics.counter_value(
                HTTP_REQUESTS_TOTAL,
                &[("method", "GET"), ("route", UNMATCHED_ROUTE), ("status", "404")]
            ),
            Some(1.0)
        );
    }
}
