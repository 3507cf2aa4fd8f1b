//! Broker Connection Manager.
//!
//! Owns the single subscription session of the process:
//!
//! ```text
//! Connecting --CONNACK--> Connected --error--> Reconnecting --CONNACK--> Connected
//!      \                                            ^   |
//!       `------------------error-------------------'   `--backoff sleep--'
//! ```
//!
//! Every CONNACK triggers a SUBSCRIBE for all configured filters. Inbound
//! messages are forwarded, in connection order, over a bounded channel to the
//! Message Processor; when that channel is full the manager waits, which in
//! turn stops it from reading the socket.
//!
//! Transport errors are logged and retried with capped exponential backoff.
//! They never terminate the task; only cancellation or a closed delivery
//! channel does.

use super::session::{BrokerEvent, BrokerSession, TransportError};
use super::topic::TopicFilter;
use super::InboundMessage;
use crate::models::ConnectionState;
use crate::observability::MetricsRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default base delay for exponential backoff.
pub const BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Default maximum backoff delay.
pub const BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Default bound on a single connect attempt.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Reconnect delay policy: doubles after each failure, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: BACKOFF_BASE,
            max: BACKOFF_MAX,
        }
    }
}

impl BackoffPolicy {
    /// Delay to use after `current` has been waited.
    pub fn next(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max)
    }
}

/// Read-only view of the manager's [`ConnectionState`].
#[derive(Debug, Clone)]
pub struct ConnectionStateHandle {
    rx: watch::Receiver<ConnectionState>,
}

impl ConnectionStateHandle {
    /// A handle frozen at `state`, for wiring components without a broker.
    pub fn fixed(state: ConnectionState) -> Self {
        let (_tx, rx) = watch::channel(state);
        Self { rx }
    }

    /// Current state.
    pub fn current(&self) -> ConnectionState {
        *self.rx.borrow()
    }

    /// Wait until the state satisfies `predicate`.
    ///
    /// Returns the matching state, or the last known state if the manager
    /// has gone away.
    pub async fn wait_for(
        &mut self,
        predicate: impl FnMut(&ConnectionState) -> bool,
    ) -> ConnectionState {
        let waited = self.rx.wait_for(predicate).await.map(|state| *state);
        match waited {
            Ok(state) => state,
            Err(_) => *self.rx.borrow(),
        }
    }
}

/// Maintains the broker session and feeds the delivery channel.
pub struct ConnectionManager<S> {
    session: S,
    topics: Vec<TopicFilter>,
    deliveries: mpsc::Sender<InboundMessage>,
    state_tx: watch::Sender<ConnectionState>,
    metrics: Arc<MetricsRegistry>,
    backoff: BackoffPolicy,
    connect_timeout: Duration,
}

impl<S: BrokerSession> ConnectionManager<S> {
    /// Create a manager for `session` that will subscribe to `topics`.
    ///
    /// Nothing happens until [`run`](Self::run) is awaited.
    pub fn new(
        session: S,
        topics: Vec<TopicFilter>,
        deliveries: mpsc::Sender<InboundMessage>,
        metrics: Arc<MetricsRegistry>,
    ) -> (Self, ConnectionStateHandle) {
        let (state_tx, rx) = watch::channel(ConnectionState::Disconnected);
        let manager = Self {
            session,
            topics,
            deliveries,
            state_tx,
            metrics,
            backoff: BackoffPolicy::default(),
            connect_timeout: CONNECT_TIMEOUT,
        };
        (manager, ConnectionStateHandle { rx })
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Run until cancelled or until the delivery channel is closed.
    pub async fn run(mut self, cancel_token: CancellationToken) {
        self.set_state(ConnectionState::Connecting);
        info!(
            target: "telemetry.broker",
            topics = ?self.topic_names(),
            "Connecting to broker"
        );

        let mut delay = self.backoff.initial;
        let mut connected = false;

        loop {
            let polled = tokio::select! {
                () = cancel_token.cancelled() => break,
                polled = self.poll_once(connected) => polled,
            };

            match polled {
                Ok(BrokerEvent::Connected { session_present }) => {
                    connected = true;
                    delay = self.backoff.initial;
                    self.set_state(ConnectionState::Connected);
                    info!(
                        target: "telemetry.broker",
                        session_present = session_present,
                        "Connected to broker"
                    );
                    self.subscribe_all();
                }
                Ok(BrokerEvent::Message(message)) => {
                    let delivered = tokio::select! {
                        () = cancel_token.cancelled() => break,
                        sent = self.deliveries.send(message) => sent.is_ok(),
                    };
                    if !delivered {
                        warn!(
                            target: "telemetry.broker",
                            "Message processor stopped, closing broker session"
                        );
                        break;
                    }
                }
                Ok(BrokerEvent::SubscribeAck { rejected }) => {
                    if rejected > 0 {
                        warn!(
                            target: "telemetry.broker",
                            rejected = rejected,
                            "Broker rejected subscription"
                        );
                    } else {
                        debug!(target: "telemetry.broker", "Subscription acknowledged");
                    }
                }
                Ok(BrokerEvent::Other) => {}
                Err(e) => {
                    connected = false;
                    self.set_state(ConnectionState::Reconnecting);
                    self.metrics.record_broker_reconnect();
                    warn!(
                        target: "telemetry.broker",
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Broker connection failed, retrying"
                    );

                    tokio::select! {
                        () = cancel_token.cancelled() => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                    delay = self.backoff.next(delay);
                }
            }
        }

        self.session.disconnect();
        self.set_state(ConnectionState::Disconnected);
        info!(target: "telemetry.broker", "Broker connection manager stopped");
    }

    /// Poll the session; while not connected the attempt is time-bounded.
    async fn poll_once(&mut self, connected: bool) -> Result<BrokerEvent, TransportError> {
        if connected {
            return self.session.poll().await;
        }

        let timeout = self.connect_timeout;
        match tokio::time::timeout(timeout, self.session.poll()).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::ConnectTimeout(timeout)),
        }
    }

    fn subscribe_all(&mut self) {
        for filter in &self.topics {
            match self.session.subscribe(filter) {
                Ok(()) => {
                    info!(target: "telemetry.broker", topic = %filter, "Subscribed to topic");
                }
                Err(e) => {
                    // Retried on the next reconnect
                    error!(
                        target: "telemetry.broker",
                        topic = %filter,
                        error = %e,
                        "Failed to subscribe"
                    );
                }
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    fn topic_names(&self) -> Vec<&str> {
        self.topics.iter().map(TopicFilter::as_str).collect()
    }
}
