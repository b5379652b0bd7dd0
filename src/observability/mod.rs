//! Observability for bridge daemons
//!
//! Structured logging only; operators watch the MQTT status and error topics
//! for everything else.

pub mod logging;

pub use logging::{init_default_logging, init_from_section, init_logging, parse_level, LogFormat};

pub use logging::{command_span, device_span, lifecycle_span};
