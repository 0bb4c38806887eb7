//! MQTT v5 transport built on rumqttc
//!
//! - [`connection`] - Pure option construction and TLS material loading
//! - [`message_handler`] - Pure routing of event-loop events
//! - [`client`] - Connector, session and event-loop task

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::{MqttConnector, MqttSession};
pub use connection::{configure_mqtt_options, TlsMaterial};
pub use message_handler::{EventRoute, MessageHandler};
