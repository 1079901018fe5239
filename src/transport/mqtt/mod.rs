//! rumqttc-backed implementation of the transport seam
//!
//! The module is split the same way as the rest of the transport layer:
//!
//! - [`connection`] - pure option building and type mapping
//! - [`message_handler`] - pure event routing
//! - [`client`] - impure I/O around rumqttc's client and event loop
//!
//! # Usage
//!
//! ```rust,no_run
//! use mqtt_session::config::SessionConfig;
//! use mqtt_session::session::{ConnectionManager, EventDispatcher};
//! use mqtt_session::transport::mqtt::RumqttConnector;
//!
//! # tokio_test::block_on(async {
//! let config = SessionConfig::new("test.mosquitto.org", "client-123");
//! let manager = ConnectionManager::new(config, RumqttConnector::new(), EventDispatcher::default());
//! manager.connect().await?;
//! manager.disconnect(true).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::{RumqttConnector, RumqttEvents, RumqttLink};
pub use connection::configure_mqtt_options;
pub use message_handler::MessageHandler;
