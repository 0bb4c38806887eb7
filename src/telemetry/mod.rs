//! Telemetry message model and topic hierarchy

pub mod message;
pub mod topics;

pub use message::{
    payload_from_value, unix_timestamp, validate_payload_size, Payload, PayloadError, Qos,
    SourceKind, TelemetryMessage,
};
pub use topics::{validate_gateway_id, Channel, Metric, TopicBuilder, TopicError};
