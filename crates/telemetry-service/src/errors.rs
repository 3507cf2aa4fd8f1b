//! Telemetry service error types.
//!
//! Read-path errors map to HTTP status codes via the `IntoResponse` impl.
//! Messages returned to clients are generic; the underlying error is logged
//! server-side. Ingestion errors never reach an API caller.

use crate::repositories::StoreError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Read path error type.
///
/// Maps to HTTP status codes:
/// - Database: 500 Internal Server Error
/// - Timeout: 504 Gateway Timeout
/// - BadRequest: 400 Bad Request
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Store query timed out after {0:?}")]
    Timeout(Duration),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for TelemetryError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            TelemetryError::Database(err) => {
                tracing::error!(target: "telemetry.query", error = %err, "Store query failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "An internal database error occurred".to_string(),
                )
            }
            TelemetryError::Timeout(after) => {
                tracing::warn!(
                    target: "telemetry.query",
                    timeout_ms = after.as_millis() as u64,
                    "Store query timed out"
                );
                (
                    StatusCode::GATEWAY_TIMEOUT,
                    "TIMEOUT",
                    "The data store did not respond in time".to_string(),
                )
            }
            TelemetryError::BadRequest(reason) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", reason.clone())
            }
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };

        (status, Json(error_response)).into_response()
    }
}

impl From<StoreError> for TelemetryError {
    fn from(err: StoreError) -> Self {
        TelemetryError::Database(err.to_string())
    }
}

/// Why an inbound message did not become a stored record.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Payload is not a JSON document: {0}")]
    Parse(String),

    #[error("Invalid payload: {0}")]
    Validation(String),

    #[error("Failed to persist record: {0}")]
    StoreWrite(#[from] StoreError),
}

impl IngestError {
    /// Bounded label used for drop metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            IngestError::Parse(_) => "parse_error",
            IngestError::Validation(_) => "validation_error",
            IngestError::StoreWrite(_) => "store_write_error",
        }
    }
}
