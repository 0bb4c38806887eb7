//! Transport layer between the connection manager and the broker
//!
//! The connection manager owns the state machine; everything that touches a
//! socket sits behind these two traits so the state machine can be driven by
//! an in-memory broker in tests.

use crate::telemetry::Qos;
use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;

pub mod mqtt;

/// Establishes broker sessions
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    /// Perform the authenticated handshake (CONNECT → CONNACK) and return a live session
    async fn connect(&self) -> Result<Arc<dyn Session>, SessionError>;

    /// Broker address for logging
    fn endpoint(&self) -> String;
}

/// One live broker session
///
/// A session carries at most one outstanding publish at a time; the publish
/// coordinator's drain loop is its only caller.
#[async_trait::async_trait]
pub trait Session: Send + Sync {
    /// Publish one message.
    ///
    /// Resolves on PUBACK for QoS 1 and on transport write completion for
    /// QoS 0. Returning [`SessionError::ConnectionLost`] implies the session is
    /// closed and [`Session::closed`] resolves.
    async fn publish(&self, topic: &str, payload: Bytes, qos: Qos) -> Result<(), SessionError>;

    /// Resolves once the session is lost: transport error, missed keep-alive,
    /// broker DISCONNECT or a failed publish
    async fn closed(&self);

    fn is_open(&self) -> bool;

    /// Graceful close (MQTT DISCONNECT)
    async fn disconnect(&self);
}

/// Session-level failures
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SessionError {
    #[error("Broker handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("Connection lost: {0}")]
    ConnectionLost(String),
    #[error("Broker rejected publish: {0}")]
    Rejected(String),
}
