//! Client session: connection state, event dispatch, periodic publishing
//!
//! [`ConnectionManager`] is the core. [`EventDispatcher`] carries inbound
//! events to observers, [`Publisher`] feeds outbound traffic through the
//! manager, and [`SessionLifecycle`] wires the three together for a
//! long-running process.

pub mod dispatcher;
pub mod lifecycle;
pub mod manager;
pub mod publisher;
pub mod state;

pub use dispatcher::{EventDispatcher, LoggingHandler, SessionEvent, SessionHandler};
pub use lifecycle::SessionLifecycle;
pub use manager::{ConnectionManager, GRACEFUL_DISCONNECT_TIMEOUT};
pub use publisher::{MessageSink, PublishSettings, Publisher};
pub use state::{ConnectionState, StateCell, StateEvent};
