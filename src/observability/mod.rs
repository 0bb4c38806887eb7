//! Structured logging setup and span macros

pub mod logging;

pub use logging::{init_default_logging, init_logging, parse_level, LogFormat};

pub use logging::{lifecycle_span, mqtt_span, publish_span};
