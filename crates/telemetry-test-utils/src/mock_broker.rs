//! In-process broker for exercising the Connection Manager.
//!
//! `MockBroker` is the test's handle; `MockSession` is the `BrokerSession` the
//! Connection Manager drives. Behaviour mirrors a clean-session MQTT broker
//! with QoS 0 delivery:
//!
//! - each connection starts with no subscriptions
//! - a publish reaches the session only if a current subscription matches it
//! - dropping the connection discards anything not yet delivered

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use telemetry_service::broker::{
    BrokerEvent, BrokerSession, InboundMessage, TopicFilter, TransportError,
};
use tokio::sync::Notify;

enum Queued {
    Message(InboundMessage),
    SubAck,
    Drop,
}

struct BrokerState {
    accepting: bool,
    connected: bool,
    connect_attempts: usize,
    subscriptions: Vec<TopicFilter>,
    subscribe_log: Vec<String>,
    queue: VecDeque<Queued>,
}

struct Shared {
    state: Mutex<BrokerState>,
    wake: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().expect("mock broker state poisoned")
    }
}

/// Test-side handle to the mock broker.
#[derive(Clone)]
pub struct MockBroker {
    shared: Arc<Shared>,
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBroker {
    /// A broker that accepts connections.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BrokerState {
                    accepting: true,
                    connected: false,
                    connect_attempts: 0,
                    subscriptions: Vec::new(),
                    subscribe_log: Vec::new(),
                    queue: VecDeque::new(),
                }),
                wake: Notify::new(),
            }),
        }
    }

    /// Session to hand to the Connection Manager.
    pub fn session(&self) -> MockSession {
        MockSession {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Whether new connection attempts succeed.
    pub fn set_accepting(&self, accepting: bool) {
        self.shared.lock().accepting = accepting;
        self.shared.wake.notify_one();
    }

    /// Publish on `topic`. Returns whether a subscription matched.
    pub fn publish(&self, topic: &str, payload: impl Into<Bytes>) -> bool {
        let mut state = self.shared.lock();
        let matched = state.connected && state.subscriptions.iter().any(|f| f.matches(topic));
        if matched {
            state.queue.push_back(Queued::Message(InboundMessage {
                topic: topic.to_string(),
                payload: payload.into(),
                received_at: Utc::now(),
            }));
            drop(state);
            self.shared.wake.notify_one();
        }
        matched
    }

    /// Sever the current connection. Undelivered messages are lost.
    pub fn drop_connection(&self) {
        let mut state = self.shared.lock();
        state.queue.clear();
        state.queue.push_back(Queued::Drop);
        drop(state);
        self.shared.wake.notify_one();
    }

    pub fn is_connected(&self) -> bool {
        self.shared.lock().connected
    }

    /// Filters active on the current connection.
    pub fn subscriptions(&self) -> Vec<String> {
        self.shared
            .lock()
            .subscriptions
            .iter()
            .map(|f| f.as_str().to_string())
            .collect()
    }

    /// Every SUBSCRIBE ever received, across connections.
    pub fn subscribe_log(&self) -> Vec<String> {
        self.shared.lock().subscribe_log.clone()
    }

    pub fn connect_attempts(&self) -> usize {
        self.shared.lock().connect_attempts
    }

    /// Wait until the current connection holds `filters`, all of them.
    pub async fn wait_for_subscriptions(&self, filters: &[&str], timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let current = self.subscriptions();
            if self.is_connected() && filters.iter().all(|f| current.iter().any(|c| c == f)) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

/// `BrokerSession` backed by a [`MockBroker`].
pub struct MockSession {
    shared: Arc<Shared>,
}

#[async_trait]
impl BrokerSession for MockSession {
    async fn poll(&mut self) -> Result<BrokerEvent, TransportError> {
        loop {
            {
                let mut state = self.shared.lock();
                if !state.connected {
                    state.connect_attempts += 1;
                    if !state.accepting {
                        return Err(TransportError::Connection("connection refused".to_string()));
                    }
                    state.connected = true;
                    state.subscriptions.clear();
                    state.queue.clear();
                    return Ok(BrokerEvent::Connected {
                        session_present: false,
                    });
                }

                match state.queue.pop_front() {
                    Some(Queued::Message(message)) => return Ok(BrokerEvent::Message(message)),
                    Some(Queued::SubAck) => return Ok(BrokerEvent::SubscribeAck { rejected: 0 }),
                    Some(Queued::Drop) => {
                        state.connected = false;
                        state.subscriptions.clear();
                        return Err(TransportError::Connection("connection reset".to_string()));
                    }
                    None => {}
                }
            }

            self.shared.wake.notified().await;
        }
    }

    fn subscribe(&mut self, filter: &TopicFilter) -> Result<(), TransportError> {
        let mut state = self.shared.lock();
        if !state.connected {
            return Err(TransportError::Subscribe("not connected".to_string()));
        }
        state.subscribe_log.push(filter.as_str().to_string());
        if !state.subscriptions.contains(filter) {
            state.subscriptions.push(filter.clone());
        }
        state.queue.push_back(Queued::SubAck);
        drop(state);
        self.shared.wake.notify_one();
        Ok(())
    }

    fn disconnect(&mut self) {
        let mut state = self.shared.lock();
        state.connected = false;
        state.subscriptions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(raw: &str) -> TopicFilter {
        TopicFilter::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_publish_requires_matching_subscription() {
        let broker = MockBroker::new();
        let mut session = broker.session();

        assert!(matches!(
            session.poll().await,
            Ok(BrokerEvent::Connected { .. })
        ));
        assert!(!broker.publish("sensors/a/data", "{}"));

        session.subscribe(&filter("sensors/+/data")).unwrap();
        assert!(matches!(
            session.poll().await,
            Ok(BrokerEvent::SubscribeAck { rejected: 0 })
        ));

        assert!(broker.publish("sensors/a/data", "{}"));
        assert!(!broker.publish("sensors/a/b/data", "{}"));

        match session.poll().await {
            Ok(BrokerEvent::Message(message)) => assert_eq!(message.topic, "sensors/a/data"),
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_drop_clears_subscriptions() {
        let broker = MockBroker::new();
        let mut session = broker.session();

        session.poll().await.unwrap();
        session.subscribe(&filter("sensors/+/data")).unwrap();
        broker.drop_connection();

        assert!(session.poll().await.is_err());
        assert!(!broker.is_connected());
        assert!(broker.subscriptions().is_empty());
        assert_eq!(broker.subscribe_log(), vec!["sensors/+/data"]);

        // Next poll reconnects with a fresh session
        assert!(matches!(
            session.poll().await,
            Ok(BrokerEvent::Connected {
                session_present: false
            })
        ));
        assert_eq!(broker.connect_attempts(), 2);
    }

    #[tokio::test]
    async fn test_refused_connection() {
        let broker = MockBroker::new();
        broker.set_accepting(false);
        let mut session = broker.session();

        assert!(session.poll().await.is_err());
        assert!(session.subscribe(&filter("a/b")).is_err());
    }
}
