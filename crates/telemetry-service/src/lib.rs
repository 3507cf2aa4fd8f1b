//! Telemetry Service Library
//!
//! Core of the sensor telemetry collector:
//!
//! - Broker Connection Manager: one MQTT subscription session with
//!   reconnect-with-backoff and resubscription on every connect
//! - Message Processor: payload validation, metrics, persistence
//! - Query Service: device listing, time-ranged history, statistics
//! - Health Aggregator: composite broker + store readiness
//! - Metrics Registry: injected Prometheus recorder
//!
//! # Architecture
//!
//! ```text
//! broker -> (bounded channel) -> processing -> repositories
//! routes -> handlers -> services -> repositories
//! ```
//!
//! # Modules
//!
//! - `config` - Service configuration from environment
//! - `errors` - Error types with HTTP status code mapping
//! - `models` - Data models
//! - `broker` - Topic filters, broker session, Connection Manager
//! - `processing` - Message Processor
//! - `repositories` - Persistence Store interface and implementations
//! - `services` - Query Service and Health Aggregator
//! - `observability` - Metrics Registry
//! - `middleware` - HTTP metrics
//! - `handlers` - HTTP request handlers
//! - `routes` - Axum router setup

pub mod broker;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod processing;
pub mod repositories;
pub mod routes;
pub mod services;
