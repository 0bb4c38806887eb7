//! Testing utilities and mock implementations
//!
//! Lets the gateway run end to end against an in-memory broker instead of a
//! real MQTT endpoint.

pub mod mocks;

pub use mocks::*;
