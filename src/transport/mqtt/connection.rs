//! Broker connection options and TLS material
//!
//! Pure construction of rumqttc options from gateway configuration, plus
//! loading of the mutual-TLS certificate set.

use crate::config::{BrokerEndpoint, ConfigError, GatewayConfig, MqttSection};
use rumqttc::v5::MqttOptions;
use rumqttc::{TlsConfiguration, Transport};
use std::path::Path;
use std::time::Duration;

/// Broker-side limit on a single packet
pub const MAX_PACKET_SIZE: u32 = 256 * 1024;

/// rumqttc refuses keep-alive intervals shorter than this
const MIN_KEEP_ALIVE_SECS: u64 = 5;

/// PEM-encoded certificate set for mutual TLS
#[derive(Clone, PartialEq)]
pub struct TlsMaterial {
    pub ca: Vec<u8>,
    pub cert: Vec<u8>,
    pub key: Vec<u8>,
}

impl std::fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("ca_bytes", &self.ca.len())
            .field("cert_bytes", &self.cert.len())
            .field("key", &"<redacted>")
            .finish()
    }
}

impl TlsMaterial {
    /// Read CA, client certificate and client key named in the configuration
    pub fn load(mqtt: &MqttSection) -> Result<Self, ConfigError> {
        Ok(Self {
            ca: read_pem(mqtt.ca_path.as_deref(), "ca_path")?,
            cert: read_pem(mqtt.cert_path.as_deref(), "cert_path")?,
            key: read_pem(mqtt.key_path.as_deref(), "key_path")?,
        })
    }

    fn into_transport(self) -> Transport {
        Transport::tls_with_config(TlsConfiguration::Simple {
            ca: self.ca,
            alpn: None,
            client_auth: Some((self.cert, self.key)),
        })
    }
}

/// Read a PEM file, rejecting files without a PEM block
pub fn read_pem(path: Option<&Path>, setting: &str) -> Result<Vec<u8>, ConfigError> {
    let path = path.ok_or_else(|| ConfigError::Certificate {
        path: format!("mqtt.{setting}"),
        reason: "required for mqtts:// endpoints".to_string(),
    })?;

    let bytes = std::fs::read(path).map_err(|e| ConfigError::Certificate {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    if !contains_pem_block(&bytes) {
        return Err(ConfigError::Certificate {
            path: path.display().to_string(),
            reason: "no PEM block found".to_string(),
        });
    }

    Ok(bytes)
}

fn contains_pem_block(bytes: &[u8]) -> bool {
    const MARKER: &[u8] = b"-----BEGIN ";
    bytes.windows(MARKER.len()).any(|window| window == MARKER)
}

/// Pure function to configure MQTT options from config
pub fn configure_mqtt_options(
    config: &GatewayConfig,
    endpoint: &BrokerEndpoint,
    tls: Option<TlsMaterial>,
) -> MqttOptions {
    let mut mqtt_options =
        MqttOptions::new(config.client_id(), endpoint.host.clone(), endpoint.port);

    let keep_alive = config.mqtt.keep_alive_secs.max(MIN_KEEP_ALIVE_SECS);
    mqtt_options.set_keep_alive(Duration::from_secs(keep_alive));
    // Queue state lives in the gateway, not in the broker session
    mqtt_options.set_clean_start(true);
    mqtt_options.set_max_packet_size(Some(MAX_PACKET_SIZE));

    if let Some(material) = tls {
        mqtt_options.set_transport(material.into_transport());
    }

    mqtt_options
}
