//! Transport seam between the session and the protocol engine
//!
//! The session never encodes frames itself. A [`Connector`] opens a
//! connection from a [`SessionConfig`] and hands back two halves:
//!
//! - a [`Link`], the write half, shared behind the connection manager's
//!   single-writer lock
//! - an [`EventStream`], the read half, owned by the read loop task
//!
//! The will message is part of the config the connector opens with, so it is
//! registered before the handshake starts and cannot be changed afterwards.

use crate::config::SessionConfig;
use crate::error::TransportError;
use crate::protocol::{ConnectAck, InboundMessage, OutboundMessage, Qos, Subscription};
use async_trait::async_trait;

pub mod mqtt;

/// Outbound protocol frame submitted through the write path
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Publish(OutboundMessage),
    Subscribe(Subscription),
    /// Formal termination; suppresses will delivery
    Disconnect,
}

/// Decoded inbound (or locally completed) protocol event
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Handshake answered; nonzero codes are refusals
    ConnAck(ConnectAck),
    /// Publish on an active subscription
    Message(InboundMessage),
    /// Subscription confirmed; `None` marks a rejected filter
    SubAck {
        packet_id: u16,
        granted: Vec<Option<Qos>>,
    },
    /// The DISCONNECT frame has been written to the network
    DisconnectSent,
    /// Broker closed the session
    BrokerDisconnect,
    /// Keep-alive and acknowledgment traffic
    Infrastructure(String),
}

/// Opens connections to the broker
pub trait Connector: Send + Sync + 'static {
    type Link: Link;
    type Events: EventStream;

    /// Build the transport with the will (if any) registered; the handshake
    /// completes when the returned event stream yields [`TransportEvent::ConnAck`]
    fn open(&self, config: &SessionConfig) -> Result<(Self::Link, Self::Events), TransportError>;
}

/// Write half of an open connection
#[async_trait]
pub trait Link: Send + Sync + 'static {
    async fn send(&self, frame: Frame) -> Result<(), TransportError>;
}

/// Read half of an open connection
#[async_trait]
pub trait EventStream: Send + 'static {
    async fn next_event(&mut self) -> Result<TransportEvent, TransportError>;
}
