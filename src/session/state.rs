//! Connection state machine
//!
//! ```text
//! Disconnected --connect--> Connecting --ConnAck 0--> Connected
//!      ^                        |                        |      \
//!      +------ refused/error ---+                        |       transport lost
//!      |                                             disconnect  |
//!      +---------------- Disconnecting <-----------------+       |
//!      +<--------------------------------------------------------+
//! ```
//!
//! [`StateCell`] is the single owner of the current value. Transitions are
//! checked and applied atomically; everyone else observes through a
//! `watch::Receiver`.

use tokio::sync::watch;
use tracing::{info, warn};

/// Connection state for the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// Handshake in flight
    Connecting,
    Connected,
    /// Termination in flight
    Disconnecting,
}

/// Events that drive state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEvent {
    ConnectRequested,
    ConnAckAccepted,
    ConnectFailed,
    DisconnectRequested,
    DisconnectCompleted,
    TransportLost,
}

impl ConnectionState {
    /// Next state for an event, or `None` if the event is not valid here (pure function)
    pub fn next(self, event: StateEvent) -> Option<ConnectionState> {
        use ConnectionState::*;
        use StateEvent::*;

        match (self, event) {
            (Disconnected, ConnectRequested) => Some(Connecting),
            (Connecting, ConnAckAccepted) => Some(Connected),
            (Connecting, ConnectFailed) => Some(Disconnected),
            (Connected, DisconnectRequested) => Some(Disconnecting),
            (Disconnecting, DisconnectCompleted) => Some(Disconnected),
            // Losses during a local disconnect are absorbed by the disconnect itself
            (Connected, TransportLost) => Some(Disconnected),
            _ => None,
        }
    }

    /// Check if connection state allows publishing and subscribing (pure function)
    pub fn can_write(self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Log connection state transition (pure logging function)
pub fn log_state_transition(from: ConnectionState, to: ConnectionState) {
    match (from, to) {
        (ConnectionState::Connecting, ConnectionState::Connected) => {
            info!("MQTT connection established successfully");
        }
        (ConnectionState::Connected, ConnectionState::Disconnected) => {
            warn!("MQTT connection lost");
        }
        _ => {
            tracing::debug!(target: "mqtt_session", "MQTT connection state: {:?} -> {:?}", from, to);
        }
    }
}

/// Owner of the current [`ConnectionState`]
#[derive(Debug)]
pub struct StateCell {
    tx: watch::Sender<ConnectionState>,
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCell {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionState::Disconnected);
        Self { tx }
    }

    pub fn current(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    /// Apply a transition; returns the new state, or the unchanged current
    /// state if the event is invalid there
    pub fn apply(&self, event: StateEvent) -> Result<ConnectionState, ConnectionState> {
        let mut outcome = Err(ConnectionState::Disconnected);
        self.tx.send_if_modified(|state| match state.next(event) {
            Some(next) => {
                log_state_transition(*state, next);
                *state = next;
                outcome = Ok(next);
                true
            }
            None => {
                outcome = Err(*state);
                false
            }
        });
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let cell = StateCell::new();
        assert_eq!(cell.current(), ConnectionState::Disconnected);

        assert_eq!(
            cell.apply(StateEvent::ConnectRequested),
            Ok(ConnectionState::Connecting)
        );
        assert_eq!(
            cell.apply(StateEvent::ConnAckAccepted),
            Ok(ConnectionState::Connected)
        );
        assert_eq!(
            cell.apply(StateEvent::DisconnectRequested),
            Ok(ConnectionState::Disconnecting)
        );
        assert_eq!(
            cell.apply(StateEvent::DisconnectCompleted),
            Ok(ConnectionState::Disconnected)
        );
    }

    #[test]
    fn test_invalid_transitions_leave_state_unchanged() {
        let cell = StateCell::new();
        assert_eq!(
            cell.apply(StateEvent::ConnAckAccepted),
            Err(ConnectionState::Disconnected)
        );
        assert_eq!(
            cell.apply(StateEvent::DisconnectRequested),
            Err(ConnectionState::Disconnected)
        );

        cell.apply(StateEvent::ConnectRequested).unwrap();
        assert_eq!(
            cell.apply(StateEvent::ConnectRequested),
            Err(ConnectionState::Connecting)
        );
        assert_eq!(cell.current(), ConnectionState::Connecting);
    }

    #[test]
    fn test_transport_loss_only_from_connected() {
        assert_eq!(
            ConnectionState::Connected.next(StateEvent::TransportLost),
            Some(ConnectionState::Disconnected)
        );
        assert_eq!(
            ConnectionState::Disconnecting.next(StateEvent::TransportLost),
            None
        );
        assert_eq!(
            ConnectionState::Disconnected.next(StateEvent::TransportLost),
            None
        );
    }

    #[test]
    fn test_failed_connect_returns_to_disconnected() {
        assert_eq!(
            ConnectionState::Connecting.next(StateEvent::ConnectFailed),
            Some(ConnectionState::Disconnected)
        );
    }

    #[test]
    fn test_only_connected_can_write() {
        assert!(ConnectionState::Connected.can_write());
        assert!(!ConnectionState::Connecting.can_write());
        assert!(!ConnectionState::Disconnecting.can_write());
        assert!(!ConnectionState::Disconnected.can_write());
    }

    #[tokio::test]
    async fn test_watchers_observe_transitions() {
        let cell = StateCell::new();
        let mut rx = cell.subscribe();

        cell.apply(StateEvent::ConnectRequested).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), ConnectionState::Connecting);

        // Rejected transitions do not wake watchers
        cell.apply(StateEvent::DisconnectCompleted).unwrap_err();
        assert!(!rx.has_changed().unwrap());
    }
}
