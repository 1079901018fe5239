//! Protocol-level types for the MQTT session
//!
//! QoS levels, message shapes and topic validation. Wire encoding is left to
//! the transport.

pub mod messages;
pub mod qos;
pub mod topics;

pub use messages::*;
pub use qos::{InvalidQos, Qos};
pub use topics::{validate_topic_filter, validate_topic_name, ValidationError};
