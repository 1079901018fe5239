//! Testing utilities and mock implementations
//!
//! Provides an in-memory connector/broker pair, a recording sink and a
//! recording handler so sessions can be exercised without a real broker.

pub mod mocks;

pub use mocks::*;
