//! Telemetry service configuration.
//!
//! Configuration is loaded from environment variables. The database URL is
//! held as a [`SecretString`] and redacted in Debug output.

use crate::broker::topic::{TopicFilter, TopicFilterError};
use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use thiserror::Error;
use url::Url;

/// Default broker address.
pub const DEFAULT_BROKER_URL: &str = "mqtt://localhost:1883";

/// Default MQTT port when the broker URL omits one.
pub const DEFAULT_BROKER_PORT: u16 = 1883;

/// Default subscription filter.
pub const DEFAULT_TOPIC: &str = "sensors/+/data";

/// Default HTTP listen port.
pub const DEFAULT_PORT: u16 = 3000;

/// Prefix for generated broker client ids.
pub const DEFAULT_CLIENT_ID_PREFIX: &str = "telemetry";

/// Telemetry service configuration.
#[derive(Clone)]
pub struct Config {
    /// PostgreSQL connection URL.
    pub database_url: SecretString,

    /// Broker host parsed from `MQTT_BROKER_URL`.
    pub broker_host: String,

    /// Broker port parsed from `MQTT_BROKER_URL` (default: 1883).
    pub broker_port: u16,

    /// Client id presented to the broker.
    pub client_id: String,

    /// Topic filters to subscribe to (default: `sensors/+/data`).
    pub topics: Vec<TopicFilter>,

    /// HTTP server bind address (default: "0.0.0.0:3000").
    pub bind_address: String,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &"[REDACTED]")
            .field("broker_host", &self.broker_host)
            .field("broker_port", &self.broker_port)
            .field("client_id", &self.client_id)
            .field("topics", &self.topics)
            .field("bind_address", &self.bind_address)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),

    #[error("Invalid topic filter: {0}")]
    InvalidTopic(#[from] TopicFilterError),

    #[error("Invalid port configuration: {0}")]
    InvalidPort(String),

    #[error("Invalid client id: {0}")]
    InvalidClientId(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_url = vars
            .get("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))?;
        let database_url = SecretString::from(database_url.as_str());

        let broker_url = vars
            .get("MQTT_BROKER_URL")
            .map(String::as_str)
            .unwrap_or(DEFAULT_BROKER_URL);
        let (broker_host, broker_port) = parse_broker_url(broker_url)?;

        let client_id = match vars.get("MQTT_CLIENT_ID") {
            Some(value) if value.trim().is_empty() => {
                return Err(ConfigError::InvalidClientId(
                    "MQTT_CLIENT_ID must not be blank".to_string(),
                ));
            }
            Some(value) => value.clone(),
            None => {
                let uuid_suffix = uuid::Uuid::new_v4().simple().to_string();
                let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
                format!("{}-{}", DEFAULT_CLIENT_ID_PREFIX, short_suffix)
            }
        };

        // Comma-separated list of filters
        let topics = vars
            .get("MQTT_TOPIC")
            .map(String::as_str)
            .unwrap_or(DEFAULT_TOPIC)
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(TopicFilter::parse)
            .collect::<Result<Vec<_>, _>>()?;
        if topics.is_empty() {
            return Err(ConfigError::InvalidTopic(TopicFilterError::Empty));
        }

        let port = if let Some(value_str) = vars.get("PORT") {
            let value: u16 = value_str.parse().map_err(|e| {
                ConfigError::InvalidPort(format!(
                    "PORT must be a valid port number, got '{}': {}",
                    value_str, e
                ))
            })?;
            value
        } else {
            DEFAULT_PORT
        };

        Ok(Config {
            database_url,
            broker_host,
            broker_port,
            client_id,
            topics,
            bind_address: format!("0.0.0.0:{}", port),
        })
    }
}

/// Split an `mqtt://host:port` URL into host and port.
fn parse_broker_url(raw: &str) -> Result<(String, u16), ConfigError> {
    let url = Url::parse(raw).map_err(|e| {
        ConfigError::InvalidBrokerUrl(format!(
            "MQTT_BROKER_URL must be a URL like mqtt://host:1883, got '{}': {}",
            raw, e
        ))
    })?;

    match url.scheme() {
        "mqtt" | "tcp" => {}
        other => {
            return Err(ConfigError::InvalidBrokerUrl(format!(
                "unsupported scheme '{}', expected mqtt or tcp",
                other
            )));
        }
    }

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ConfigError::InvalidBrokerUrl(format!("'{}' has no host", raw)))?;

    Ok((host.to_string(), url.port().unwrap_or(DEFAULT_BROKER_PORT)))
}
