//! Connection manager
//!
//! Owns one logical session with the broker: the handshake, the background
//! read loop, the serialized write path and termination.
//!
//! # Concurrency
//!
//! - state lives in a [`StateCell`]; transitions are atomic and observable
//! - all outbound frames go through one `tokio::sync::Mutex`, so frames are
//!   handed to the transport one at a time and message ids are assigned in
//!   submission order
//! - the read loop owns the transport's event stream and never takes the
//!   write lock
//! - `connect` and `disconnect` are serialized against each other
//!
//! # Termination
//!
//! `disconnect(true)` sends DISCONNECT and waits (bounded) for the read loop to
//! see it go out; the broker discards the will. `disconnect(false)` stops the
//! read loop and drops the transport without DISCONNECT; the broker sees an
//! abnormal close and publishes the will.

use crate::config::SessionConfig;
use crate::error::{ConnectError, WriteError};
use crate::protocol::{
    connack_reason, validate_topic_name, ConnectAck, DeliveryResult, MessageId, OutboundMessage,
    CONNACK_ACCEPTED, DISCONNECT_CONNECTION_LOST, DISCONNECT_EXPECTED,
};
use crate::session::dispatcher::EventDispatcher;
use crate::session::publisher::MessageSink;
use crate::session::state::{ConnectionState, StateCell, StateEvent};
use crate::transport::mqtt::MessageHandler;
use crate::transport::{Connector, EventStream, Frame, Link, TransportEvent};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Upper bound on waiting for the read loop after a graceful DISCONNECT
pub const GRACEFUL_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

struct WriterSlot<L> {
    link: Option<L>,
    next_message_id: u64,
}

struct ReadLoop {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct ConnectionManager<C: Connector> {
    config: Arc<SessionConfig>,
    connector: C,
    dispatcher: Arc<EventDispatcher>,
    state: Arc<StateCell>,
    writer: Mutex<WriterSlot<C::Link>>,
    read_loop: Mutex<Option<ReadLoop>>,
    lifecycle: Mutex<()>,
}

impl<C: Connector> ConnectionManager<C> {
    /// Create a manager; the will (if any) in `config` is fixed from here on
    pub fn new(config: SessionConfig, connector: C, dispatcher: EventDispatcher) -> Self {
        Self {
            config: Arc::new(config),
            connector,
            dispatcher: Arc::new(dispatcher),
            state: Arc::new(StateCell::new()),
            writer: Mutex::new(WriterSlot {
                link: None,
                next_message_id: 0,
            }),
            read_loop: Mutex::new(None),
            lifecycle: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn client_id(&self) -> &str {
        &self.config.client_id
    }

    pub fn state(&self) -> ConnectionState {
        self.state.current()
    }

    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    /// Id the next accepted publish will receive
    pub async fn next_message_id(&self) -> MessageId {
        MessageId(self.writer.lock().await.next_message_id)
    }

    /// Open the transport and wait for the broker's CONNACK
    ///
    /// On acceptance the dispatcher is notified, the read loop starts and the
    /// configured subscriptions are issued. Only valid from `Disconnected`.
    /// The broker may drop the session again before this returns; callers
    /// that care check `state()` afterwards.
    pub async fn connect(&self) -> Result<ConnectAck, ConnectError> {
        let _guard = self.lifecycle.lock().await;

        self.state
            .apply(StateEvent::ConnectRequested)
            .map_err(|state| ConnectError::AlreadyActive { state })?;

        // A read loop from a lost connection has already exited; collect it
        self.reap_read_loop().await;

        info!(
            client_id = %self.config.client_id,
            broker = %self.config.broker_address,
            will = self.config.last_will.is_some(),
            "Connecting to MQTT broker"
        );

        let (ack, link, events) = match self.handshake().await {
            Ok(opened) => opened,
            Err(e) => {
                let _ = self.state.apply(StateEvent::ConnectFailed);
                if let Some(code) = e.refusal_code() {
                    self.dispatcher.on_connect(code);
                }
                error!(error = %e, "Failed to connect to MQTT broker");
                return Err(e);
            }
        };

        self.writer.lock().await.link = Some(link);
        let _ = self.state.apply(StateEvent::ConnAckAccepted);

        let subscriptions = self.dispatcher.on_connect(ack.code);
        self.spawn_read_loop(events).await;

        for subscription in subscriptions {
            match self.write(Frame::Subscribe(subscription.clone())).await {
                Ok(()) => info!(
                    topic = %subscription.topic,
                    qos = %subscription.qos,
                    "Subscribed to topic"
                ),
                Err(e) => error!(topic = %subscription.topic, error = %e, "Failed to subscribe"),
            }
        }

        Ok(ack)
    }

    async fn handshake(&self) -> Result<(ConnectAck, C::Link, C::Events), ConnectError> {
        let (link, mut events) = self
            .connector
            .open(&self.config)
            .map_err(ConnectError::Transport)?;

        let timeout = self.config.connect_timeout();
        let ack = tokio::time::timeout(timeout, Self::wait_for_connack(&mut events))
            .await
            .map_err(|_| ConnectError::Timeout(timeout))??;

        Ok((ack, link, events))
    }

    async fn wait_for_connack(events: &mut C::Events) -> Result<ConnectAck, ConnectError> {
        loop {
            match events.next_event().await.map_err(ConnectError::Transport)? {
                TransportEvent::ConnAck(ack) if ack.code == CONNACK_ACCEPTED => return Ok(ack),
                TransportEvent::ConnAck(ack) => {
                    return Err(ConnectError::Refused {
                        code: ack.code,
                        reason: connack_reason(ack.code),
                    })
                }
                other => debug!(target: "mqtt_session", ?other, "Ignoring event before ConnAck"),
            }
        }
    }

    async fn spawn_read_loop(&self, events: C::Events) {
        let (stop_tx, stop_rx) = watch::channel(false);
        let span = crate::session_span!(client_id = %self.config.client_id);
        let handle = tokio::spawn(
            Self::read_loop(
                events,
                stop_rx,
                self.dispatcher.clone(),
                self.state.clone(),
            )
            .instrument(span),
        );
        *self.read_loop.lock().await = Some(ReadLoop { stop_tx, handle });
    }

    async fn read_loop(
        mut events: C::Events,
        mut stop_rx: watch::Receiver<bool>,
        dispatcher: Arc<EventDispatcher>,
        state: Arc<StateCell>,
    ) {
        debug!(target: "mqtt_session", "Read loop started");

        loop {
            if *stop_rx.borrow() {
                break;
            }

            tokio::select! {
                biased;
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        info!("Stop signal received, stopping read loop");
                        break;
                    }
                }
                event = events.next_event() => match event {
                    Ok(TransportEvent::Message(message)) => dispatcher.on_message(message),
                    Ok(TransportEvent::SubAck { packet_id, granted }) => {
                        match MessageHandler::validate_subscription_success(&granted) {
                            Ok(()) => debug!(target: "mqtt_session", packet_id, ?granted, "Subscription confirmed"),
                            Err(e) => warn!(packet_id, "{}", e),
                        }
                    }
                    Ok(TransportEvent::DisconnectSent) => {
                        debug!(target: "mqtt_session", "DISCONNECT written, stopping read loop");
                        break;
                    }
                    Ok(TransportEvent::BrokerDisconnect) => {
                        Self::handle_transport_loss("broker closed the session", &dispatcher, &state);
                        break;
                    }
                    Ok(TransportEvent::ConnAck(ack)) => {
                        warn!(code = ack.code, "Unexpected ConnAck on established connection");
                    }
                    Ok(TransportEvent::Infrastructure(packet)) => {
                        tracing::trace!(target: "mqtt_session", %packet, "Infrastructure packet");
                    }
                    Err(e) => {
                        Self::handle_transport_loss(&e.to_string(), &dispatcher, &state);
                        break;
                    }
                },
            }
        }

        // Dropping the event stream here closes the connection
        drop(events);
        debug!(target: "mqtt_session", "Read loop stopped");
    }

    /// Report an unexpected loss; no-op while a local disconnect is in flight
    fn handle_transport_loss(reason: &str, dispatcher: &EventDispatcher, state: &StateCell) {
        if state.apply(StateEvent::TransportLost).is_ok() {
            error!(reason, "MQTT connection lost");
            dispatcher.on_disconnect(DISCONNECT_CONNECTION_LOST);
        } else {
            debug!(target: "mqtt_session", reason, "Transport closed during local disconnect");
        }
    }

    async fn reap_read_loop(&self) {
        if let Some(read_loop) = self.read_loop.lock().await.take() {
            let _ = read_loop.stop_tx.send(true);
            if let Err(e) = read_loop.handle.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "Previous read loop ended with error");
                }
            }
        }
    }

    /// Terminate the session
    ///
    /// Graceful sends DISCONNECT so the broker discards the will; abrupt drops
    /// the transport so the broker publishes it. Observers always get
    /// `on_disconnect(0)`. Returns an error only if a graceful DISCONNECT could
    /// not be handed to the transport; teardown completes either way.
    pub async fn disconnect(&self, graceful: bool) -> Result<(), WriteError> {
        let _guard = self.lifecycle.lock().await;

        let link = {
            let mut writer = self.writer.lock().await;
            if let Err(state) = self.state.apply(StateEvent::DisconnectRequested) {
                debug!(target: "mqtt_session", ?state, "Disconnect requested while not connected");
                writer.link = None;
                drop(writer);
                self.reap_read_loop().await;
                return Ok(());
            }
            writer.link.take()
        };

        let mut result = Ok(());
        if graceful {
            if let Some(link) = link.as_ref() {
                if let Err(e) = link.send(Frame::Disconnect).await {
                    warn!(error = %e, "Failed to send DISCONNECT");
                    result = Err(WriteError::from(e));
                }
            }
        }

        let read_loop = self.read_loop.lock().await.take();
        if let Some(mut read_loop) = read_loop {
            if graceful && result.is_ok() {
                match tokio::time::timeout(GRACEFUL_DISCONNECT_TIMEOUT, &mut read_loop.handle).await
                {
                    Ok(Ok(())) => debug!(target: "mqtt_session", "Read loop finished after DISCONNECT"),
                    Ok(Err(e)) => warn!(error = %e, "Read loop ended with error"),
                    Err(_) => {
                        warn!("Read loop did not observe DISCONNECT in time, forcing stop");
                        let _ = read_loop.stop_tx.send(true);
                        read_loop.handle.abort();
                        let _ = read_loop.handle.await;
                    }
                }
            } else {
                let _ = read_loop.stop_tx.send(true);
                read_loop.handle.abort();
                let _ = read_loop.handle.await;
            }
        }

        drop(link);
        let _ = self.state.apply(StateEvent::DisconnectCompleted);
        self.dispatcher.on_disconnect(DISCONNECT_EXPECTED);
        info!(graceful, client_id = %self.config.client_id, "MQTT session disconnected");
        result
    }

    /// Hand one frame to the transport under the write lock
    pub async fn write(&self, frame: Frame) -> Result<(), WriteError> {
        let writer = self.writer.lock().await;
        self.write_locked(&writer, frame).await
    }

    async fn write_locked(
        &self,
        writer: &WriterSlot<C::Link>,
        frame: Frame,
    ) -> Result<(), WriteError> {
        let state = self.state.current();
        match writer.link.as_ref() {
            Some(link) if state.can_write() => link.send(frame).await.map_err(WriteError::from),
            _ => Err(WriteError::NotConnected { state }),
        }
    }

    /// Submit a publish; accepted messages get the next message id
    pub async fn publish(&self, message: OutboundMessage) -> DeliveryResult {
        if let Err(e) = validate_topic_name(&message.topic) {
            warn!(topic = %message.topic, error = %e, "Refusing publish to invalid topic");
            return DeliveryResult::rejected();
        }

        let mut writer = self.writer.lock().await;
        match self.write_locked(&writer, Frame::Publish(message)).await {
            Ok(()) => {
                let message_id = MessageId(writer.next_message_id);
                writer.next_message_id += 1;
                DeliveryResult::accepted(message_id)
            }
            Err(e) => {
                debug!(target: "mqtt_session", error = %e, "Publish not accepted");
                DeliveryResult::rejected()
            }
        }
    }
}

#[async_trait]
impl<C: Connector> MessageSink for ConnectionManager<C> {
    async fn publish(&self, message: OutboundMessage) -> DeliveryResult {
        ConnectionManager::publish(self, message).await
    }
}

impl<C: Connector> Drop for ConnectionManager<C> {
    fn drop(&mut self) {
        // No async in Drop: an undisconnected session ends abruptly
        if let Ok(mut read_loop) = self.read_loop.try_lock() {
            if let Some(read_loop) = read_loop.take() {
                let _ = read_loop.stop_tx.send(true);
                read_loop.handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{LastWill, Qos, Subscription};
    use crate::session::dispatcher::SessionEvent;
    use crate::testing::{MockCall, MockConnector};

    fn config() -> SessionConfig {
        SessionConfig::new("localhost", "client-123").with_last_will(LastWill::new(
            "clients/client-123/status",
            "offline",
            Qos::ExactlyOnce,
            true,
        ))
    }

    fn manager(connector: MockConnector) -> ConnectionManager<MockConnector> {
        let dispatcher = EventDispatcher::new(vec![Subscription::new("test 10", Qos::AtLeastOnce)]);
        ConnectionManager::new(config(), connector, dispatcher)
    }

    fn message(payload: &str) -> OutboundMessage {
        OutboundMessage::new("test 10", payload.to_string(), Qos::AtLeastOnce, false)
    }

    #[tokio::test]
    async fn test_connect_registers_will_before_handshake() {
        let broker = MockConnector::new();
        let manager = manager(broker.clone());

        let ack = manager.connect().await.unwrap();
        assert_eq!(ack.code, 0);
        assert_eq!(manager.state(), ConnectionState::Connected);

        let calls = broker.calls();
        assert!(matches!(calls[0], MockCall::RegisterWill(ref will) if will.topic == "clients/client-123/status"));
        assert!(matches!(calls[1], MockCall::Connect { ref client_id, .. } if client_id == "client-123"));
        assert_eq!(
            calls[2],
            MockCall::Subscribe(Subscription::new("test 10", Qos::AtLeastOnce))
        );

        manager.disconnect(true).await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_twice_is_rejected() {
        let manager = manager(MockConnector::new());
        manager.connect().await.unwrap();

        let err = manager.connect().await.unwrap_err();
        assert!(matches!(
            err,
            ConnectError::AlreadyActive {
                state: ConnectionState::Connected
            }
        ));
        manager.disconnect(true).await.unwrap();
    }

    #[tokio::test]
    async fn test_refused_connect_notifies_observers() {
        let broker = MockConnector::new().with_connack_codes([5]);
        let mut dispatcher = EventDispatcher::new(vec![Subscription::new("test 10", Qos::AtLeastOnce)]);
        let mut events = dispatcher.events(8);
        let manager = ConnectionManager::new(config(), broker.clone(), dispatcher);

        let err = manager.connect().await.unwrap_err();
        assert_eq!(err.refusal_code(), Some(5));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(events.recv().await, Some(SessionEvent::Connect { result_code: 5 }));
        assert!(broker.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn test_open_failure_is_transport_error() {
        let manager = manager(MockConnector::new().with_open_failure());
        assert!(matches!(
            manager.connect().await,
            Err(ConnectError::Transport(_))
        ));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_broker_times_out() {
        let manager = manager(MockConnector::new().with_silent_broker());
        assert!(matches!(
            manager.connect().await,
            Err(ConnectError::Timeout(_))
        ));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_publish_while_disconnected_is_rejected() {
        let manager = manager(MockConnector::new());
        let result = manager.publish(message("early")).await;
        assert!(!result.accepted);
        assert_eq!(result.message_id, None);
        assert_eq!(manager.next_message_id().await, MessageId(0));
    }

    #[tokio::test]
    async fn test_message_ids_advance_only_on_acceptance() {
        let broker = MockConnector::new();
        let manager = manager(broker.clone());
        manager.connect().await.unwrap();

        let first = manager.publish(message("a")).await;
        broker.set_queue_full(true);
        let rejected = manager.publish(message("b")).await;
        broker.set_queue_full(false);
        let second = manager.publish(message("c")).await;

        assert_eq!(first.message_id, Some(MessageId(0)));
        assert!(!rejected.accepted);
        assert_eq!(second.message_id, Some(MessageId(1)));
        manager.disconnect(true).await.unwrap();
    }

    #[tokio::test]
    async fn test_publish_to_invalid_topic_is_rejected() {
        let manager = manager(MockConnector::new());
        manager.connect().await.unwrap();

        let result = manager
            .publish(OutboundMessage::new("bad/+", "x".to_string(), Qos::AtMostOnce, false))
            .await;
        assert!(!result.accepted);
        manager.disconnect(true).await.unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_when_never_connected_is_noop() {
        let broker = MockConnector::new();
        let manager = manager(broker.clone());
        manager.disconnect(true).await.unwrap();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(broker.calls().is_empty());
    }

    #[tokio::test]
    async fn test_reconnect_after_disconnect() {
        let broker = MockConnector::new();
        let manager = manager(broker.clone());

        manager.connect().await.unwrap();
        manager.disconnect(true).await.unwrap();
        manager.connect().await.unwrap();

        assert_eq!(broker.connection_count(), 2);
        assert_eq!(manager.state(), ConnectionState::Connected);
        manager.disconnect(true).await.unwrap();
    }
}
