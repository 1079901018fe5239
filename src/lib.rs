//! mqtt-session - a long-lived MQTT client session
//!
//! One process, one broker connection, a last-will message registered before
//! the handshake, a background read loop dispatching inbound events, and a
//! periodic publisher sharing the connection's serialized write path.
//!
//! # Overview
//!
//! - [`config`] - TOML configuration and validation
//! - [`protocol`] - QoS, topics, will and message types
//! - [`transport`] - the seam to the protocol engine, with a rumqttc backend
//! - [`session`] - connection state machine, dispatcher, publisher, lifecycle
//! - [`observability`] - structured logging
//! - [`testing`] - in-memory broker for exercising sessions
//!
//! # Quick Start
//!
//! ```rust
//! use mqtt_session::config::ClientConfig;
//!
//! let config = ClientConfig::from_toml_str(r#"
//!     [session]
//!     broker_address = "test.mosquitto.org"
//!     client_id = "client-123"
//!
//!     [session.last_will]
//!     topic = "clients/client-123/status"
//!     payload = "Client '{client_id}' has disconnected unexpectedly."
//!     qos = 2
//!     retain = true
//!
//!     [subscribe]
//!     topic = "test 10"
//! "#).unwrap();
//!
//! let will = config.session.last_will.as_ref().unwrap();
//! assert_eq!(
//!     will.render_payload(&config.session.client_id),
//!     "Client 'client-123' has disconnected unexpectedly."
//! );
//! assert_eq!(config.publish_settings().render_payload(0), "Hello from mqtt-session! Message #0");
//! ```

pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod session;
pub mod testing;
pub mod transport;

pub use config::{ClientConfig, ConfigError, ReconnectPolicy, SessionConfig};
pub use error::{ConnectError, SessionError, SessionResult, TransportError, WriteError};
pub use protocol::*;
pub use session::{
    ConnectionManager, ConnectionState, EventDispatcher, LoggingHandler, SessionEvent,
    SessionHandler, SessionLifecycle,
};
pub use transport::mqtt::RumqttConnector;
