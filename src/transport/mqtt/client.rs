//! Impure I/O operations for the rumqttc transport
//!
//! [`RumqttConnector`] builds a rumqttc client/event-loop pair. The
//! [`AsyncClient`] becomes the write half and feeds rumqttc's bounded request
//! queue; the [`EventLoop`] becomes the read half and is the only place that
//! touches the socket.

use super::connection::{configure_mqtt_options, to_mqtt_qos};
use super::message_handler::MessageHandler;
use crate::config::SessionConfig;
use crate::error::TransportError;
use crate::transport::{Connector, EventStream, Frame, Link, TransportEvent};
use async_trait::async_trait;
use rumqttc::{AsyncClient, ClientError, EventLoop};
use tracing::debug;

/// Connector backed by rumqttc
#[derive(Debug, Default, Clone, Copy)]
pub struct RumqttConnector;

impl RumqttConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for RumqttConnector {
    type Link = RumqttLink;
    type Events = RumqttEvents;

    fn open(&self, config: &SessionConfig) -> Result<(RumqttLink, RumqttEvents), TransportError> {
        let mqtt_options = configure_mqtt_options(config)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, config.outbound_capacity);

        debug!(
            target: "mqtt_transport",
            client_id = %config.client_id,
            will = config.last_will.is_some(),
            "Opened rumqttc transport"
        );

        Ok((RumqttLink { client }, RumqttEvents { event_loop }))
    }
}

/// Write half: enqueues requests for the event loop
pub struct RumqttLink {
    client: AsyncClient,
}

#[async_trait]
impl Link for RumqttLink {
    async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        match frame {
            Frame::Publish(message) => self
                .client
                .try_publish(
                    message.topic,
                    to_mqtt_qos(message.qos),
                    message.retain,
                    message.payload.to_vec(),
                )
                .map_err(map_client_error),
            Frame::Subscribe(subscription) => self
                .client
                .subscribe(subscription.topic, to_mqtt_qos(subscription.qos))
                .await
                .map_err(map_client_error),
            Frame::Disconnect => self.client.disconnect().await.map_err(map_client_error),
        }
    }
}

fn map_client_error(error: ClientError) -> TransportError {
    match error {
        // Bounded request queue is full (or the event loop is gone)
        ClientError::TryRequest(_) => TransportError::QueueFull,
        ClientError::Request(_) => TransportError::Closed("event loop stopped".to_string()),
    }
}

/// Read half: drives the socket
pub struct RumqttEvents {
    event_loop: EventLoop,
}

#[async_trait]
impl EventStream for RumqttEvents {
    async fn next_event(&mut self) -> Result<TransportEvent, TransportError> {
        loop {
            match self.event_loop.poll().await {
                Ok(event) => {
                    if let Some(routed) = MessageHandler::route_mqtt_event(&event) {
                        return Ok(routed);
                    }
                }
                Err(error) => return MessageHandler::route_connection_error(error),
            }
        }
    }
}
