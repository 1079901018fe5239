//! Pure routing of rumqttc events into session transport events
//!
//! This module contains pure functions that translate rumqttc's
//! [`Event`]s and [`ConnectionError`]s into [`TransportEvent`]s, so the rest
//! of the crate never sees rumqttc types.

use super::connection::{connack_code, from_mqtt_qos};
use crate::error::TransportError;
use crate::protocol::{ConnectAck, InboundMessage, Qos};
use crate::transport::TransportEvent;
use rumqttc::{ConnectionError, Event, Outgoing, Packet, SubscribeReasonCode};

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to the matching transport event (pure routing decision)
    ///
    /// Returns `None` for outgoing traffic the session does not track.
    pub fn route_mqtt_event(event: &Event) -> Option<TransportEvent> {
        match event {
            Event::Incoming(incoming) => Some(match incoming {
                Packet::ConnAck(connack) => TransportEvent::ConnAck(ConnectAck {
                    session_present: connack.session_present,
                    code: connack_code(connack.code),
                }),
                Packet::Publish(publish) => TransportEvent::Message(InboundMessage {
                    topic: publish.topic.clone(),
                    payload: publish.payload.clone(),
                    qos: from_mqtt_qos(publish.qos),
                    retain: publish.retain,
                }),
                Packet::SubAck(suback) => TransportEvent::SubAck {
                    packet_id: suback.pkid,
                    granted: suback
                        .return_codes
                        .iter()
                        .map(|code| match code {
                            SubscribeReasonCode::Success(qos) => Some(from_mqtt_qos(*qos)),
                            SubscribeReasonCode::Failure => None,
                        })
                        .collect(),
                },
                Packet::Disconnect => TransportEvent::BrokerDisconnect,
                other => TransportEvent::Infrastructure(format!("{other:?}")),
            }),
            Event::Outgoing(Outgoing::Disconnect) => Some(TransportEvent::DisconnectSent),
            Event::Outgoing(_) => None,
        }
    }

    /// Route an event loop error (pure function)
    ///
    /// A refused handshake is reported as a CONNACK carrying the refusal code;
    /// everything else is a transport failure.
    pub fn route_connection_error(
        error: ConnectionError,
    ) -> Result<TransportEvent, TransportError> {
        match error {
            ConnectionError::ConnectionRefused(code) => Ok(TransportEvent::ConnAck(ConnectAck {
                session_present: false,
                code: connack_code(code),
            })),
            ConnectionError::Io(e) => Err(TransportError::Io(e.to_string())),
            other => Err(TransportError::Closed(other.to_string())),
        }
    }

    /// Validate subscription success from SubAck (pure function)
    pub fn validate_subscription_success(granted: &[Option<Qos>]) -> Result<(), String> {
        if granted.iter().any(Option::is_none) {
            Err(format!("Subscription rejected by broker: {granted:?}"))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rumqttc::{ConnAck, ConnectReturnCode, Publish, QoS, SubAck};

    #[test]
    fn test_route_connack() {
        let connack = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: true,
            code: ConnectReturnCode::Success,
        }));
        assert_eq!(
            MessageHandler::route_mqtt_event(&connack),
            Some(TransportEvent::ConnAck(ConnectAck {
                session_present: true,
                code: 0
            }))
        );
    }

    #[test]
    fn test_route_publish() {
        let publish = Event::Incoming(Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtLeastOnce,
            retain: true,
            topic: "test/topic".to_string(),
            pkid: 1,
            payload: Bytes::from("test payload"),
        }));

        match MessageHandler::route_mqtt_event(&publish) {
            Some(TransportEvent::Message(message)) => {
                assert_eq!(message.topic, "test/topic");
                assert_eq!(message.payload, Bytes::from("test payload"));
                assert_eq!(message.qos, Qos::AtLeastOnce);
                assert!(message.retain);
            }
            other => panic!("Expected Message route, got {other:?}"),
        }
    }

    #[test]
    fn test_route_disconnects() {
        assert_eq!(
            MessageHandler::route_mqtt_event(&Event::Incoming(Packet::Disconnect)),
            Some(TransportEvent::BrokerDisconnect)
        );
        assert_eq!(
            MessageHandler::route_mqtt_event(&Event::Outgoing(Outgoing::Disconnect)),
            Some(TransportEvent::DisconnectSent)
        );
        assert_eq!(
            MessageHandler::route_mqtt_event(&Event::Outgoing(Outgoing::PingReq)),
            None
        );
    }

    #[test]
    fn test_route_suback() {
        let suback = Event::Incoming(Packet::SubAck(SubAck {
            pkid: 7,
            return_codes: vec![
                SubscribeReasonCode::Success(QoS::AtLeastOnce),
                SubscribeReasonCode::Failure,
            ],
        }));
        assert_eq!(
            MessageHandler::route_mqtt_event(&suback),
            Some(TransportEvent::SubAck {
                packet_id: 7,
                granted: vec![Some(Qos::AtLeastOnce), None],
            })
        );
    }

    #[test]
    fn test_route_refused_connection() {
        let routed = MessageHandler::route_connection_error(ConnectionError::ConnectionRefused(
            ConnectReturnCode::NotAuthorized,
        ));
        assert_eq!(
            routed,
            Ok(TransportEvent::ConnAck(ConnectAck {
                session_present: false,
                code: 5
            }))
        );
    }

    #[test]
    fn test_route_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(
            MessageHandler::route_connection_error(ConnectionError::Io(io)),
            Err(TransportError::Io(_))
        ));
    }

    #[test]
    fn test_validate_subscription_success() {
        assert!(MessageHandler::validate_subscription_success(&[Some(Qos::AtLeastOnce)]).is_ok());
        assert!(
            MessageHandler::validate_subscription_success(&[Some(Qos::AtMostOnce), None]).is_err()
        );
    }
}
