//! Error types for the MQTT session
//!
//! Every error here is locally recoverable: the process keeps running and the
//! caller decides what to do next. The only fatal failure is being unable to
//! construct the transport at all, which surfaces as
//! [`ConnectError::Transport`] from the first connect.

use crate::config::ConfigError;
use crate::session::state::ConnectionState;
use std::time::Duration;
use thiserror::Error;

/// Failures reported by the protocol engine behind the transport seam
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransportError {
    #[error("Failed to open transport: {0}")]
    OpenFailed(String),
    #[error("Transport closed: {0}")]
    Closed(String),
    #[error("Outbound queue is full")]
    QueueFull,
    #[error("Transport I/O error: {0}")]
    Io(String),
}

/// Connect handshake failures
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("Connect called while session is {state:?}")]
    AlreadyActive { state: ConnectionState },
    #[error("Transport unreachable")]
    Transport(#[source] TransportError),
    #[error("Connection refused by broker (code {code}: {reason})")]
    Refused { code: u8, reason: &'static str },
    #[error("ConnAck timeout - no connection confirmation within {0:?}")]
    Timeout(Duration),
}

impl ConnectError {
    /// Broker return code when the handshake itself was rejected
    pub fn refusal_code(&self) -> Option<u8> {
        match self {
            ConnectError::Refused { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Failures on the serialized write path
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
    #[error("Outbound queue is full")]
    QueueFull,
    #[error("Write failed")]
    Transport(#[source] TransportError),
}

impl From<TransportError> for WriteError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::QueueFull => WriteError::QueueFull,
            other => WriteError::Transport(other),
        }
    }
}

/// Top-level error for session lifecycle operations
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Connect error: {0}")]
    Connect(#[from] ConnectError),

    #[error("Write error: {0}")]
    Write(#[from] WriteError),

    #[error("Session task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Reconnection gave up after {0} attempts")]
    ReconnectExhausted(u32),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SessionResult<T> = Result<T, SessionError>;
