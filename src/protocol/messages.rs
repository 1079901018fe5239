//! Message and acknowledgment types exchanged with the broker
//!
//! These are the protocol-level values the session hands to and receives from
//! the transport. None of them carry wire encoding; that belongs to the
//! protocol engine behind [`crate::transport::Connector`].

use super::qos::Qos;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// CONNACK return code for an accepted connection
pub const CONNACK_ACCEPTED: u8 = 0;

/// Disconnect result code: initiated locally and expected
pub const DISCONNECT_EXPECTED: u8 = 0;

/// Disconnect result code: the connection dropped without a local request
pub const DISCONNECT_CONNECTION_LOST: u8 = 7;

/// Human-readable meaning of an MQTT 3.1.1 CONNACK return code
pub fn connack_reason(code: u8) -> &'static str {
    match code {
        0 => "connection accepted",
        1 => "unacceptable protocol version",
        2 => "identifier rejected",
        3 => "server unavailable",
        4 => "bad user name or password",
        5 => "not authorized",
        _ => "unknown return code",
    }
}

/// Message the broker publishes on the client's behalf after an abrupt disconnect
///
/// The payload may contain a `{client_id}` placeholder which is filled in
/// when the transport is opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastWill {
    pub topic: String,
    pub payload: String,
    pub qos: Qos,
    #[serde(default)]
    pub retain: bool,
}

impl LastWill {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>, qos: Qos, retain: bool) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
        }
    }

    /// Payload with `{client_id}` substituted
    pub fn render_payload(&self, client_id: &str) -> String {
        self.payload.replace("{client_id}", client_id)
    }
}

/// Topic filter and the QoS it is subscribed at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub topic: String,
    pub qos: Qos,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, qos: Qos) -> Self {
        Self {
            topic: topic.into(),
            qos,
        }
    }
}

/// Application message on its way to the broker
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: Qos,
    pub retain: bool,
}

impl OutboundMessage {
    pub fn new(
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        qos: Qos,
        retain: bool,
    ) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
        }
    }
}

/// Application message delivered by the broker on an active subscription
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: Qos,
    pub retain: bool,
}

impl InboundMessage {
    pub fn payload_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Session-scoped identifier assigned to each accepted outbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of a publish submission
///
/// `accepted` means the message was handed to the transport layer, not that
/// the broker acknowledged it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryResult {
    pub accepted: bool,
    pub message_id: Option<MessageId>,
}

impl DeliveryResult {
    pub fn accepted(message_id: MessageId) -> Self {
        Self {
            accepted: true,
            message_id: Some(message_id),
        }
    }

    pub fn rejected() -> Self {
        Self {
            accepted: false,
            message_id: None,
        }
    }
}

/// Successful connect handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectAck {
    pub session_present: bool,
    pub code: u8,
}
