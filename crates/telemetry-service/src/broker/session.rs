//! Broker session abstraction and its rumqttc implementation.
//!
//! The [`ConnectionManager`](super::ConnectionManager) drives a
//! [`BrokerSession`] and never talks to rumqttc directly, so reconnect and
//! resubscribe behaviour can be exercised against a scripted session in tests.

use super::topic::TopicFilter;
use super::InboundMessage;
use async_trait::async_trait;
use chrono::Utc;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, SubscribeReasonCode};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// MQTT keep-alive interval.
const KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Capacity of the rumqttc request queue (subscribe/disconnect requests).
const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// Largest inbound packet accepted from the broker (1 MiB).
const MAX_INBOUND_PACKET_SIZE: usize = 1024 * 1024;

/// Broker transport failure. Always recovered by reconnecting.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Connect attempt timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("Subscribe request failed: {0}")]
    Subscribe(String),
}

/// Event surfaced by a broker session.
#[derive(Debug)]
pub enum BrokerEvent {
    /// Broker accepted the connection (CONNACK).
    Connected { session_present: bool },
    /// Application message on a subscribed topic.
    Message(InboundMessage),
    /// Broker answered a SUBSCRIBE; `rejected` counts refused filters.
    SubscribeAck { rejected: usize },
    /// Keep-alive traffic and outgoing acknowledgements.
    Other,
}

/// One logical session with a publish/subscribe broker.
#[async_trait]
pub trait BrokerSession: Send {
    /// Drive the session until the next event.
    ///
    /// After an error the next call starts a fresh connection attempt.
    async fn poll(&mut self) -> Result<BrokerEvent, TransportError>;

    /// Queue a SUBSCRIBE for `filter` on the current connection.
    fn subscribe(&mut self, filter: &TopicFilter) -> Result<(), TransportError>;

    /// Request a clean DISCONNECT. Best effort.
    fn disconnect(&mut self);
}

/// rumqttc-backed session.
///
/// `EventLoop::poll` reconnects on the call following a connection error;
/// subscriptions are not carried across that boundary (clean session), which
/// is why the manager resubscribes on every CONNACK.
pub struct MqttSession {
    client: AsyncClient,
    eventloop: EventLoop,
}

impl MqttSession {
    /// Prepare a session for `host:port`. No I/O happens until the first poll.
    pub fn new(host: &str, port: u16, client_id: &str) -> Self {
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_clean_session(true);
        options.set_max_packet_size(MAX_INBOUND_PACKET_SIZE, MAX_INBOUND_PACKET_SIZE);

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        Self { client, eventloop }
    }
}

#[async_trait]
impl BrokerSession for MqttSession {
    async fn poll(&mut self) -> Result<BrokerEvent, TransportError> {
        let event = self
            .eventloop
            .poll()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        Ok(match event {
            Event::Incoming(Packet::ConnAck(ack)) => BrokerEvent::Connected {
                session_present: ack.session_present,
            },
            Event::Incoming(Packet::Publish(publish)) => BrokerEvent::Message(InboundMessage {
                topic: publish.topic,
                payload: publish.payload,
                received_at: Utc::now(),
            }),
            Event::Incoming(Packet::SubAck(ack)) => BrokerEvent::SubscribeAck {
                rejected: ack
                    .return_codes
                    .iter()
                    .filter(|code| matches!(code, SubscribeReasonCode::Failure))
                    .count(),
            },
            other => {
                debug!(target: "telemetry.broker", event = ?other, "Broker event");
                BrokerEvent::Other
            }
        })
    }

    fn subscribe(&mut self, filter: &TopicFilter) -> Result<(), TransportError> {
        // At-most-once: the broker drops the message once delivered to us.
        self.client
            .try_subscribe(filter.as_str(), QoS::AtMostOnce)
            .map_err(|e| TransportError::Subscribe(e.to_string()))
    }

    fn disconnect(&mut self) {
        if let Err(e) = self.client.try_disconnect() {
            debug!(target: "telemetry.broker", error = %e, "Disconnect request not queued");
        }
    }
}
