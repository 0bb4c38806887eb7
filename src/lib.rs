//! CAN telemetry gateway
//!
//! Delivers vehicle CAN-derived metrics to a cloud MQTT broker and keeps
//! delivering through network outages, broker rejects and bursts of manual
//! publish requests.
//!
//! # Overview
//!
//! - [`telemetry`] - Message envelope and topic hierarchy
//! - [`queue`] - Bounded, ordered offline queue
//! - [`connection`] - Connection state machine, reconnect supervisor and backoff
//! - [`transport`] - Broker session seam and its rumqttc implementation
//! - [`publish`] - Scheduled and manual producers and the drain loop
//! - [`health`] - Health snapshots aggregated from publish outcomes
//! - [`gateway`] - Assembly of the above with startup and graceful shutdown
//!
//! # Quick Start
//!
//! ```rust
//! use can_gateway::telemetry::{Channel, Metric, TopicBuilder};
//!
//! let topic = TopicBuilder::topic_for("truck-42", Channel::Metric(Metric::EngineRpm));
//! assert_eq!(topic, "vehicles/truck-42/engine/rpm");
//!
//! let (gateway_id, channel) = TopicBuilder::parse("vehicle/truck-42/telemetry").unwrap();
//! assert_eq!(gateway_id, "truck-42");
//! assert_eq!(channel, Channel::Telemetry);
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod gateway;
pub mod health;
pub mod observability;
pub mod publish;
pub mod queue;
pub mod telemetry;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, ConfigView, GatewayConfig};
pub use connection::{ConnectionManager, ConnectionState, SendError};
pub use error::{GatewayError, GatewayResult};
pub use gateway::Gateway;
pub use health::{HealthReporter, HealthSnapshot, HealthStatus};
pub use publish::{PublishCoordinator, PublishError, PublishReceipt};
pub use queue::{OfflineQueue, QueueEntry, QueueFull};
pub use telemetry::{Channel, Metric, Qos, SourceKind, TelemetryMessage};
