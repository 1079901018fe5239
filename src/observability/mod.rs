//! Observability: structured logging and span helpers

pub mod logging;

pub use logging::{init_default_logging, init_logging, LogFormat, LoggingOptions};

// Span macros for structured logging
pub use logging::{publish_span, session_span};
