//! Inbound event dispatch
//!
//! The dispatcher is the observer side of the session. Observers come in two
//! forms:
//!
//! - [`SessionHandler`] implementations, called synchronously from the read
//!   loop in registration order
//! - event channels from [`EventDispatcher::events`], fed with
//!   [`SessionEvent`]s for consumers that want to do async work
//!
//! Both see events in the order frames arrived on the transport. Ordering is
//! only guaranteed within one connection.

use crate::protocol::{InboundMessage, Subscription, CONNACK_ACCEPTED, DISCONNECT_EXPECTED};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Protocol-level event delivered to observers
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connect { result_code: u8 },
    Message(InboundMessage),
    /// 0 = initiated locally and expected; nonzero = unexpected drop
    Disconnect { result_code: u8 },
}

/// Observer for session events
///
/// Callbacks run on the read loop; long work belongs behind an event channel.
pub trait SessionHandler: Send + Sync {
    fn on_connect(&self, _result_code: u8) {}
    fn on_message(&self, _message: &InboundMessage) {}
    fn on_disconnect(&self, _result_code: u8) {}
}

/// Handler that reports every event through tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl SessionHandler for LoggingHandler {
    fn on_connect(&self, result_code: u8) {
        if result_code == CONNACK_ACCEPTED {
            info!("Connected to MQTT broker");
        } else {
            warn!(result_code, "Failed to connect");
        }
    }

    fn on_message(&self, message: &InboundMessage) {
        info!(
            topic = %message.topic,
            qos = %message.qos,
            retain = message.retain,
            payload = %message.payload_str(),
            "Received message"
        );
    }

    fn on_disconnect(&self, result_code: u8) {
        if result_code == DISCONNECT_EXPECTED {
            info!(result_code, "Disconnected");
        } else {
            warn!(result_code, "Unexpected disconnection");
        }
    }
}

/// Fans protocol events out to registered observers
#[derive(Default)]
pub struct EventDispatcher {
    subscriptions: Vec<Subscription>,
    handlers: Vec<Arc<dyn SessionHandler>>,
    channels: Vec<mpsc::Sender<SessionEvent>>,
}

impl EventDispatcher {
    /// Dispatcher that subscribes to `subscriptions` on every accepted connect
    pub fn new(subscriptions: Vec<Subscription>) -> Self {
        Self {
            subscriptions,
            ..Self::default()
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn SessionHandler>) -> Self {
        self.register(handler);
        self
    }

    pub fn register(&mut self, handler: Arc<dyn SessionHandler>) {
        self.handlers.push(handler);
    }

    /// Open an event channel; events are dropped for this channel while it is full
    pub fn events(&mut self, capacity: usize) -> mpsc::Receiver<SessionEvent> {
        let (tx, rx) = mpsc::channel(capacity);
        self.channels.push(tx);
        rx
    }

    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }

    /// Notify observers of a connect result and return the subscriptions to
    /// issue: all configured ones on code 0, none otherwise
    pub fn on_connect(&self, result_code: u8) -> Vec<Subscription> {
        for handler in &self.handlers {
            handler.on_connect(result_code);
        }
        self.forward(SessionEvent::Connect { result_code });

        if result_code == CONNACK_ACCEPTED {
            self.subscriptions.clone()
        } else {
            Vec::new()
        }
    }

    pub fn on_message(&self, message: InboundMessage) {
        for handler in &self.handlers {
            handler.on_message(&message);
        }
        self.forward(SessionEvent::Message(message));
    }

    pub fn on_disconnect(&self, result_code: u8) {
        for handler in &self.handlers {
            handler.on_disconnect(result_code);
        }
        self.forward(SessionEvent::Disconnect { result_code });
    }

    fn forward(&self, event: SessionEvent) {
        for channel in &self.channels {
            match channel.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(dropped)) => {
                    warn!(event = ?dropped, "Event channel full - event dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!("Event channel closed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Qos;
    use bytes::Bytes;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl SessionHandler for Recorder {
        fn on_connect(&self, result_code: u8) {
            self.seen.lock().unwrap().push(format!("connect:{result_code}"));
        }
        fn on_message(&self, message: &InboundMessage) {
            self.seen
                .lock()
                .unwrap()
                .push(format!("message:{}", message.payload_str()));
        }
        fn on_disconnect(&self, result_code: u8) {
            self.seen
                .lock()
                .unwrap()
                .push(format!("disconnect:{result_code}"));
        }
    }

    fn message(payload: &'static str) -> InboundMessage {
        InboundMessage {
            topic: "test 10".to_string(),
            payload: Bytes::from_static(payload.as_bytes()),
            qos: Qos::AtLeastOnce,
            retain: false,
        }
    }

    #[test]
    fn test_on_connect_success_returns_subscriptions() {
        let dispatcher = EventDispatcher::new(vec![Subscription::new("test 10", Qos::AtLeastOnce)]);
        assert_eq!(
            dispatcher.on_connect(0),
            vec![Subscription::new("test 10", Qos::AtLeastOnce)]
        );
    }

    #[test]
    fn test_on_connect_failure_returns_nothing() {
        let dispatcher = EventDispatcher::new(vec![Subscription::new("test 10", Qos::AtLeastOnce)]);
        assert!(dispatcher.on_connect(5).is_empty());
    }

    #[test]
    fn test_handlers_see_events_in_order() {
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        let dispatcher = EventDispatcher::new(Vec::new())
            .with_handler(first.clone())
            .with_handler(second.clone());

        dispatcher.on_connect(0);
        dispatcher.on_message(message("a"));
        dispatcher.on_message(message("b"));
        dispatcher.on_disconnect(7);

        let expected = vec!["connect:0", "message:a", "message:b", "disconnect:7"];
        assert_eq!(*first.seen.lock().unwrap(), expected);
        assert_eq!(*second.seen.lock().unwrap(), expected);
    }

    #[tokio::test]
    async fn test_event_channel_receives_events() {
        let mut dispatcher = EventDispatcher::new(Vec::new());
        let mut rx = dispatcher.events(8);

        dispatcher.on_connect(0);
        dispatcher.on_message(message("hello"));
        dispatcher.on_disconnect(0);

        assert_eq!(rx.recv().await, Some(SessionEvent::Connect { result_code: 0 }));
        assert_eq!(rx.recv().await, Some(SessionEvent::Message(message("hello"))));
        assert_eq!(
            rx.recv().await,
            Some(SessionEvent::Disconnect { result_code: 0 })
        );
    }

    #[tokio::test]
    async fn test_full_channel_drops_without_blocking() {
        let mut dispatcher = EventDispatcher::new(Vec::new());
        let mut rx = dispatcher.events(1);

        dispatcher.on_message(message("kept"));
        dispatcher.on_message(message("dropped"));

        assert_eq!(rx.recv().await, Some(SessionEvent::Message(message("kept"))));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_channel_is_ignored() {
        let mut dispatcher = EventDispatcher::new(Vec::new());
        drop(dispatcher.events(1));
        dispatcher.on_disconnect(0);
    }
}
