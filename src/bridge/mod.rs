//! Stack-facing bridges.
//!
//! Each bridge implements one callback contract of the peripheral stack.
//! They share nothing but the deferred queue and the observer lists they
//! were handed; none of them holds a reference to the controller.

pub mod connection;
pub mod security;
pub mod writes;

pub use connection::ConnectionBridge;
pub use security::SecurityBridge;
pub use writes::InboundWrites;
