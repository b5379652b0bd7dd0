//! Testing utilities and mock implementations
//!
//! Lets a whole `App` run in-process without an MQTT broker or a real clock.

pub mod mocks;

pub use mocks::*;
