//! Broker side of the ingestion pipeline.
//!
//! - `topic` - Subscription filter validation and matching
//! - `session` - Session abstraction over the MQTT client
//! - `connection` - Connection Manager (connect, backoff, resubscribe, delivery)

pub mod connection;
pub mod session;
pub mod topic;

pub use connection::{BackoffPolicy, ConnectionManager, ConnectionStateHandle};
pub use session::{BrokerEvent, BrokerSession, MqttSession, TransportError};
pub use topic::{TopicFilter, TopicFilterError};

use bytes::Bytes;
use chrono::{DateTime, Utc};

/// A message as delivered by the broker, before any interpretation.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Concrete topic the message was published on.
    pub topic: String,
    /// Raw payload bytes.
    pub payload: Bytes,
    /// When the message was taken off the connection.
    pub received_at: DateTime<Utc>,
}
