//! Telemetry envelope carried from producers to the broker
//!
//! A [`TelemetryMessage`] is created once by the publish coordinator and never
//! mutated afterwards; the offline queue and the connection manager only ever
//! hold shared or cloned copies of it.

use super::topics::{Channel, TopicBuilder};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use rumqttc::v5::mqttbytes::QoS;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// Structured key-value telemetry body, serialized as a JSON object on the wire
pub type Payload = Map<String, Value>;

/// Delivery guarantee requested for a message. Exactly-once is not offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Qos {
    /// QoS 0: returned once the transport write completes
    AtMostOnce,
    /// QoS 1: returned once the broker sends PUBACK
    AtLeastOnce,
}

impl From<Qos> for QoS {
    fn from(qos: Qos) -> Self {
        match qos {
            Qos::AtMostOnce => QoS::AtMostOnce,
            Qos::AtLeastOnce => QoS::AtLeastOnce,
        }
    }
}

/// Which producer created a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Scheduled,
    Manual,
}

/// Immutable telemetry envelope
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryMessage {
    message_id: Uuid,
    topic: String,
    payload: Payload,
    qos: Qos,
    created_at: DateTime<Utc>,
    source: SourceKind,
}

impl TelemetryMessage {
    pub fn new(topic: String, payload: Payload, qos: Qos, source: SourceKind) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            topic,
            payload,
            qos,
            created_at: Utc::now(),
            source,
        }
    }

    /// Build a message addressed to `channel` of `gateway_id` with the channel's QoS
    pub fn for_channel(
        gateway_id: &str,
        channel: Channel,
        payload: Payload,
        source: SourceKind,
    ) -> Self {
        Self::new(
            TopicBuilder::topic_for(gateway_id, channel),
            payload,
            channel.default_qos(),
            source,
        )
    }

    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn qos(&self) -> Qos {
        self.qos
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn source(&self) -> SourceKind {
        self.source
    }

    /// Serialize the payload into the PUBLISH body
    pub fn encode_payload(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(&self.payload).map(Bytes::from)
    }
}

/// Payload validation failures
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PayloadError {
    #[error("Payload must be a JSON object, got {0}")]
    NotAnObject(&'static str),
    #[error("Payload is {size} bytes, limit is {max}")]
    TooLarge { size: usize, max: usize },
    #[error("Payload is not serializable: {0}")]
    Unserializable(String),
}

/// Accept an arbitrary JSON value as a payload only if it is an object
pub fn payload_from_value(value: Value) -> Result<Payload, PayloadError> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Err(PayloadError::NotAnObject("null")),
        Value::Bool(_) => Err(PayloadError::NotAnObject("boolean")),
        Value::Number(_) => Err(PayloadError::NotAnObject("number")),
        Value::String(_) => Err(PayloadError::NotAnObject("string")),
        Value::Array(_) => Err(PayloadError::NotAnObject("array")),
    }
}

/// Check the serialized size of a payload against the broker limit
pub fn validate_payload_size(payload: &Payload, max_bytes: usize) -> Result<usize, PayloadError> {
    let size = serde_json::to_vec(payload)
        .map_err(|e| PayloadError::Unserializable(e.to_string()))?
        .len();
    if size > max_bytes {
        return Err(PayloadError::TooLarge {
            size,
            max: max_bytes,
        });
    }
    Ok(size)
}

/// UNIX timestamp in fractional seconds, the format cloud consumers expect
pub fn unix_timestamp(at: DateTime<Utc>) -> f64 {
    at.timestamp_millis() as f64 / 1000.0
}
