//! Mock implementations for testing
//!
//! [`MockConnector`] stands in for both the protocol engine and the broker. It
//! records every frame in order, scripts CONNACK codes, and applies the
//! broker's will rule: a will registered on an established connection is
//! delivered when that connection closes without a DISCONNECT frame.

use crate::config::SessionConfig;
use crate::error::TransportError;
use crate::protocol::{
    ConnectAck, DeliveryResult, InboundMessage, LastWill, MessageId, OutboundMessage,
    Subscription,
};
use crate::session::dispatcher::{SessionEvent, SessionHandler};
use crate::session::publisher::MessageSink;
use crate::transport::{Connector, EventStream, Frame, Link, TransportEvent};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

type EventSender = mpsc::UnboundedSender<Result<TransportEvent, TransportError>>;
type EventReceiver = mpsc::UnboundedReceiver<Result<TransportEvent, TransportError>>;

/// Interaction observed by the mock broker
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    RegisterWill(LastWill),
    Connect {
        client_id: String,
        clean_session: bool,
    },
    Subscribe(Subscription),
    Publish(OutboundMessage),
    Disconnect,
}

#[derive(Debug, Default)]
struct BrokerState {
    calls: Vec<MockCall>,
    connack_codes: VecDeque<u8>,
    fail_open: bool,
    silent: bool,
    queue_full: bool,
    connections: usize,
    live: Option<(usize, EventSender)>,
    graceful: HashSet<usize>,
    delivered_wills: Vec<LastWill>,
    next_packet_id: u16,
}

fn lock(broker: &Mutex<BrokerState>) -> MutexGuard<'_, BrokerState> {
    broker.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scriptable in-memory connector; clones share one broker
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    broker: Arc<Mutex<BrokerState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// CONNACK codes for successive connections; 0 once exhausted
    pub fn with_connack_codes(self, codes: impl IntoIterator<Item = u8>) -> Self {
        lock(&self.broker).connack_codes.extend(codes);
        self
    }

    pub fn with_open_failure(self) -> Self {
        lock(&self.broker).fail_open = true;
        self
    }

    /// Broker accepts the socket but never answers the handshake
    pub fn with_silent_broker(self) -> Self {
        lock(&self.broker).silent = true;
        self
    }

    pub fn set_queue_full(&self, full: bool) {
        lock(&self.broker).queue_full = full;
    }

    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.broker).calls.clone()
    }

    pub fn published(&self) -> Vec<OutboundMessage> {
        lock(&self.broker)
            .calls
            .iter()
            .filter_map(|call| match call {
                MockCall::Publish(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        lock(&self.broker)
            .calls
            .iter()
            .filter_map(|call| match call {
                MockCall::Subscribe(subscription) => Some(subscription.clone()),
                _ => None,
            })
            .collect()
    }

    /// Wills the broker published on behalf of departed clients
    pub fn delivered_wills(&self) -> Vec<LastWill> {
        lock(&self.broker).delivered_wills.clone()
    }

    pub fn connection_count(&self) -> usize {
        lock(&self.broker).connections
    }

    /// Deliver a message on the live connection; false if there is none
    pub fn inject_message(&self, message: InboundMessage) -> bool {
        self.send_to_live(Ok(TransportEvent::Message(message)))
    }

    /// Simulate a network failure on the live connection
    pub fn drop_connection(&self) -> bool {
        let live = lock(&self.broker).live.take();
        match live {
            Some((_, tx)) => tx
                .send(Err(TransportError::Closed(
                    "connection reset by peer".to_string(),
                )))
                .is_ok(),
            None => false,
        }
    }

    /// Simulate the broker closing the session
    pub fn broker_disconnect(&self) -> bool {
        self.send_to_live(Ok(TransportEvent::BrokerDisconnect))
    }

    fn send_to_live(&self, event: Result<TransportEvent, TransportError>) -> bool {
        match &lock(&self.broker).live {
            Some((_, tx)) => tx.send(event).is_ok(),
            None => false,
        }
    }
}

impl Connector for MockConnector {
    type Link = MockLink;
    type Events = MockEvents;

    fn open(&self, config: &SessionConfig) -> Result<(MockLink, MockEvents), TransportError> {
        let mut broker = lock(&self.broker);
        broker.connections += 1;
        let connection_id = broker.connections;

        if broker.fail_open {
            return Err(TransportError::OpenFailed(
                "mock broker unreachable".to_string(),
            ));
        }

        let will = config.last_will.as_ref().map(|will| LastWill {
            payload: will.render_payload(&config.client_id),
            ..will.clone()
        });
        if let Some(will) = &will {
            broker.calls.push(MockCall::RegisterWill(will.clone()));
        }
        broker.calls.push(MockCall::Connect {
            client_id: config.client_id.clone(),
            clean_session: config.clean_session,
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let code = broker.connack_codes.pop_front().unwrap_or(0);
        let established = !broker.silent && code == 0;
        if !broker.silent {
            let _ = tx.send(Ok(TransportEvent::ConnAck(ConnectAck {
                session_present: false,
                code,
            })));
        }
        broker.live = Some((connection_id, tx.clone()));

        Ok((
            MockLink {
                broker: self.broker.clone(),
                connection_id,
                events: tx,
            },
            MockEvents {
                broker: self.broker.clone(),
                connection_id,
                rx,
                will: will.filter(|_| established),
            },
        ))
    }
}

/// Write half of a mock connection
pub struct MockLink {
    broker: Arc<Mutex<BrokerState>>,
    connection_id: usize,
    events: EventSender,
}

#[async_trait]
impl Link for MockLink {
    async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        if self.events.is_closed() {
            return Err(TransportError::Closed("connection closed".to_string()));
        }

        let mut broker = lock(&self.broker);
        match frame {
            Frame::Publish(message) => {
                if broker.queue_full {
                    return Err(TransportError::QueueFull);
                }
                broker.calls.push(MockCall::Publish(message));
            }
            Frame::Subscribe(subscription) => {
                broker.next_packet_id = broker.next_packet_id.wrapping_add(1);
                let _ = self.events.send(Ok(TransportEvent::SubAck {
                    packet_id: broker.next_packet_id,
                    granted: vec![Some(subscription.qos)],
                }));
                broker.calls.push(MockCall::Subscribe(subscription));
            }
            Frame::Disconnect => {
                broker.calls.push(MockCall::Disconnect);
                broker.graceful.insert(self.connection_id);
                let _ = self.events.send(Ok(TransportEvent::DisconnectSent));
            }
        }
        Ok(())
    }
}

/// Read half of a mock connection
pub struct MockEvents {
    broker: Arc<Mutex<BrokerState>>,
    connection_id: usize,
    rx: EventReceiver,
    will: Option<LastWill>,
}

#[async_trait]
impl EventStream for MockEvents {
    async fn next_event(&mut self) -> Result<TransportEvent, TransportError> {
        match self.rx.recv().await {
            Some(event) => event,
            None => Err(TransportError::Closed("mock broker gone".to_string())),
        }
    }
}

impl Drop for MockEvents {
    fn drop(&mut self) {
        let mut broker = lock(&self.broker);
        if matches!(broker.live, Some((id, _)) if id == self.connection_id) {
            broker.live = None;
        }
        if !broker.graceful.contains(&self.connection_id) {
            if let Some(will) = self.will.take() {
                broker.delivered_wills.push(will);
            }
        }
    }
}

/// Sink that records messages and accepts or rejects all of them
#[derive(Debug, Default)]
pub struct MockSink {
    accept: bool,
    published: Mutex<Vec<OutboundMessage>>,
}

impl MockSink {
    pub fn accepting() -> Self {
        Self {
            accept: true,
            ..Self::default()
        }
    }

    pub fn rejecting() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<OutboundMessage> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl MessageSink for MockSink {
    async fn publish(&self, message: OutboundMessage) -> DeliveryResult {
        let mut published = self.published.lock().unwrap_or_else(PoisonError::into_inner);
        published.push(message);
        if self.accept {
            DeliveryResult::accepted(MessageId(published.len() as u64 - 1))
        } else {
            DeliveryResult::rejected()
        }
    }
}

/// Handler that records every event it sees
#[derive(Debug, Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<SessionEvent>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, event: SessionEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl SessionHandler for RecordingHandler {
    fn on_connect(&self, result_code: u8) {
        self.record(SessionEvent::Connect { result_code });
    }

    fn on_message(&self, message: &InboundMessage) {
        self.record(SessionEvent::Message(message.clone()));
    }

    fn on_disconnect(&self, result_code: u8) {
        self.record(SessionEvent::Disconnect { result_code });
    }
}
