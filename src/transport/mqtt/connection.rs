//! Pure option building for the rumqttc transport
//!
//! This module turns a [`SessionConfig`] into rumqttc [`MqttOptions`] and maps
//! QoS and return codes between the two type systems.

use crate::config::SessionConfig;
use crate::error::TransportError;
use crate::protocol::Qos;
use rumqttc::{ConnectReturnCode, LastWill, MqttOptions, QoS, Transport as RumqttcTransport};

/// Maximum incoming and outgoing packet size
const MAX_PACKET_SIZE: usize = 256 * 1024;

/// Pure function to configure MQTT options from config
///
/// The last will is set here, before the options are handed to the event
/// loop, so it always precedes the CONNECT frame.
pub fn configure_mqtt_options(config: &SessionConfig) -> Result<MqttOptions, TransportError> {
    let endpoint = config
        .endpoint()
        .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

    let mut mqtt_options = MqttOptions::new(&config.client_id, endpoint.host, endpoint.port);

    if endpoint.tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    let credentials = config
        .credentials()
        .map_err(|e| TransportError::OpenFailed(e.to_string()))?;
    if let Some((username, password)) = credentials {
        mqtt_options.set_credentials(username, password);
    }

    mqtt_options.set_keep_alive(config.keep_alive());
    mqtt_options.set_clean_session(config.clean_session);
    mqtt_options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);

    if let Some(will) = &config.last_will {
        let payload = will.render_payload(&config.client_id);
        mqtt_options.set_last_will(LastWill::new(
            &will.topic,
            payload,
            to_mqtt_qos(will.qos),
            will.retain,
        ));
    }

    Ok(mqtt_options)
}

pub fn to_mqtt_qos(qos: Qos) -> QoS {
    match qos {
        Qos::AtMostOnce => QoS::AtMostOnce,
        Qos::AtLeastOnce => QoS::AtLeastOnce,
        Qos::ExactlyOnce => QoS::ExactlyOnce,
    }
}

pub fn from_mqtt_qos(qos: QoS) -> Qos {
    match qos {
        QoS::AtMostOnce => Qos::AtMostOnce,
        QoS::AtLeastOnce => Qos::AtLeastOnce,
        QoS::ExactlyOnce => Qos::ExactlyOnce,
    }
}

/// MQTT 3.1.1 numeric CONNACK return code
pub fn connack_code(code: ConnectReturnCode) -> u8 {
    match code {
        ConnectReturnCode::Success => 0,
        ConnectReturnCode::RefusedProtocolVersion => 1,
        ConnectReturnCode::BadClientId => 2,
        ConnectReturnCode::ServiceUnavailable => 3,
        ConnectReturnCode::BadUserNamePassword => 4,
        ConnectReturnCode::NotAuthorized => 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::LastWill as SessionWill;
    use bytes::Bytes;
    use std::time::Duration;

    fn test_session_config() -> SessionConfig {
        SessionConfig::new("localhost", "client-123")
    }

    #[test]
    fn test_configure_mqtt_options() {
        let options = configure_mqtt_options(&test_session_config()).unwrap();
        assert_eq!(options.client_id(), "client-123");
        assert_eq!(options.broker_address(), ("localhost".to_string(), 1883));
        assert_eq!(options.keep_alive(), Duration::from_secs(60));
        assert!(options.clean_session());
        assert!(options.last_will().is_none());
    }

    #[test]
    fn test_last_will_is_registered_in_options() {
        let config = test_session_config().with_last_will(SessionWill::new(
            "clients/status",
            "Client '{client_id}' has disconnected unexpectedly.",
            Qos::ExactlyOnce,
            true,
        ));

        let options = configure_mqtt_options(&config).unwrap();
        let will = options.last_will().expect("will should be set");
        assert_eq!(will.topic, "clients/status");
        assert_eq!(
            will.message,
            Bytes::from_static(b"Client 'client-123' has disconnected unexpectedly.")
        );
        assert_eq!(will.qos, QoS::ExactlyOnce);
        assert!(will.retain);
    }

    #[test]
    fn test_keep_alive_can_be_disabled() {
        let mut config = test_session_config();
        config.keep_alive_secs = 0;
        let options = configure_mqtt_options(&config).unwrap();
        assert_eq!(options.keep_alive(), Duration::ZERO);
    }

    #[test]
    fn test_unset_username_variable_fails_open() {
        let mut config = test_session_config();
        config.username_env = Some("MQTT_SESSION_CONNECTION_UNSET_USER".to_string());
        assert!(matches!(
            configure_mqtt_options(&config),
            Err(TransportError::OpenFailed(_))
        ));
    }

    #[test]
    fn test_tls_port_default() {
        let mut config = test_session_config();
        config.tls = true;
        let options = configure_mqtt_options(&config).unwrap();
        assert_eq!(options.broker_address().1, 8883);
    }

    #[test]
    fn test_invalid_broker_address() {
        let config = SessionConfig::new("http://nope", "client-123");
        assert!(matches!(
            configure_mqtt_options(&config),
            Err(TransportError::OpenFailed(_))
        ));
    }

    #[test]
    fn test_qos_mapping_round_trips() {
        for qos in [Qos::AtMostOnce, Qos::AtLeastOnce, Qos::ExactlyOnce] {
            assert_eq!(from_mqtt_qos(to_mqtt_qos(qos)), qos);
        }
    }

    #[test]
    fn test_connack_codes() {
        assert_eq!(connack_code(ConnectReturnCode::Success), 0);
        assert_eq!(connack_code(ConnectReturnCode::NotAuthorized), 5);
        assert_eq!(connack_code(ConnectReturnCode::BadUserNamePassword), 4);
    }
}
