//! Gateway configuration
//!
//! Loaded from a TOML file. Every section except `[gateway]` and `[mqtt]` may
//! be omitted and falls back to defaults. Relative certificate paths are
//! resolved against the directory of the configuration file.

use crate::connection::backoff::BackoffPolicy;
use crate::telemetry::validate_gateway_id;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Main gateway configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayConfig {
    pub gateway: GatewaySection,
    pub mqtt: MqttSection,
    #[serde(default)]
    pub publish: PublishSection,
    #[serde(default)]
    pub backoff: BackoffPolicy,
    #[serde(default)]
    pub shutdown: ShutdownSection,
}

/// Gateway identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewaySection {
    /// Gateway identifier (must match [a-zA-Z0-9._-]+)
    pub id: String,
}

/// Broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// Broker URL, `mqtts://host:port` or `mqtt://host:port`; a bare host
    /// means `mqtts://host:8883`
    pub endpoint: String,
    /// MQTT client identifier (defaults to the gateway id)
    pub client_id: Option<String>,
    /// Client certificate (PEM)
    pub cert_path: Option<PathBuf>,
    /// Client private key (PEM)
    pub key_path: Option<PathBuf>,
    /// Root CA (PEM)
    pub ca_path: Option<PathBuf>,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_ack_timeout_ms() -> u64 {
    10_000
}

/// Publishing and queueing settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishSection {
    /// Scheduled telemetry period in seconds
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_max_queue_depth")]
    pub max_queue_depth: usize,
    /// Pause after a send lost its connection
    #[serde(default = "default_retry_pause_ms")]
    pub retry_pause_ms: u64,
    /// Serialized payload limit
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
}

fn default_interval_secs() -> u64 {
    300
}

fn default_max_queue_depth() -> usize {
    1000
}

fn default_retry_pause_ms() -> u64 {
    2000
}

fn default_max_payload_bytes() -> usize {
    128 * 1024
}

impl Default for PublishSection {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            max_queue_depth: default_max_queue_depth(),
            retry_pause_ms: default_retry_pause_ms(),
            max_payload_bytes: default_max_payload_bytes(),
        }
    }
}

/// Shutdown settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShutdownSection {
    /// How long shutdown waits for an in-flight send
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
}

fn default_grace_secs() -> u64 {
    5
}

impl Default for ShutdownSection {
    fn default() -> Self {
        Self {
            grace_secs: default_grace_secs(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid gateway ID format: {0}")]
    InvalidGatewayId(String),
    #[error("Invalid broker endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("Certificate error for {path}: {reason}")]
    Certificate { path: String, reason: String },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Broker address derived from the endpoint setting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl std::fmt::Display for BrokerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scheme = if self.tls { "mqtts" } else { "mqtt" };
        write!(f, "{scheme}://{}:{}", self.host, self.port)
    }
}

/// Parse the broker endpoint setting (pure function)
pub fn parse_endpoint(endpoint: &str) -> Result<BrokerEndpoint, ConfigError> {
    let normalized = if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("mqtts://{endpoint}")
    };

    let url =
        Url::parse(&normalized).map_err(|_| ConfigError::InvalidEndpoint(endpoint.to_string()))?;

    let tls = match url.scheme() {
        "mqtts" => true,
        "mqtt" => false,
        other => {
            return Err(ConfigError::InvalidEndpoint(format!(
                "unsupported scheme '{other}' in {endpoint}"
            )))
        }
    };

    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| ConfigError::InvalidEndpoint(endpoint.to_string()))?;
    let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

    Ok(BrokerEndpoint {
        host: host.to_string(),
        port,
        tls,
    })
}

/// Serializable view of the active configuration
///
/// Safe to expose: holds no key material and no certificate paths.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ConfigView {
    pub gateway_id: String,
    pub endpoint: String,
    pub client_id: String,
    pub publish_interval_secs: u64,
    pub max_queue_depth: usize,
    pub backoff: BackoffPolicy,
}

impl GatewayConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&content)?;

        if let Some(base_dir) = path.parent() {
            config.resolve_paths(base_dir);
        }

        Ok(config)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: GatewayConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Format-level validation; certificate contents are checked by the connector
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_gateway_id(&self.gateway.id).map_err(|e| {
            ConfigError::InvalidGatewayId(format!(
                "Gateway ID '{}' must match pattern [a-zA-Z0-9._-]+ ({e})",
                self.gateway.id
            ))
        })?;

        parse_endpoint(&self.mqtt.endpoint)?;

        if self.client_id().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "mqtt.client_id must not be empty".to_string(),
            ));
        }
        if self.publish.interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "publish.interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.publish.max_queue_depth == 0 {
            return Err(ConfigError::InvalidConfig(
                "publish.max_queue_depth must be greater than 0".to_string(),
            ));
        }
        if self.publish.max_payload_bytes == 0 {
            return Err(ConfigError::InvalidConfig(
                "publish.max_payload_bytes must be greater than 0".to_string(),
            ));
        }
        if self.mqtt.ack_timeout_ms == 0 || self.mqtt.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt timeouts must be greater than 0".to_string(),
            ));
        }
        self.backoff
            .validate()
            .map_err(|reason| ConfigError::InvalidConfig(format!("backoff: {reason}")))?;

        Ok(())
    }

    /// Make relative certificate paths relative to `base_dir`
    fn resolve_paths(&mut self, base_dir: &Path) {
        for path in [
            &mut self.mqtt.cert_path,
            &mut self.mqtt.key_path,
            &mut self.mqtt.ca_path,
        ]
        .into_iter()
        .flatten()
        {
            if path.is_relative() {
                *path = base_dir.join(&*path);
            }
        }
    }

    /// MQTT client id, falling back to the gateway id
    pub fn client_id(&self) -> &str {
        self.mqtt.client_id.as_deref().unwrap_or(&self.gateway.id)
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_secs(self.publish.interval_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown.grace_secs)
    }

    pub fn view(&self) -> ConfigView {
        ConfigView {
            gateway_id: self.gateway.id.clone(),
            endpoint: self.mqtt.endpoint.clone(),
            client_id: self.client_id().to_string(),
            publish_interval_secs: self.publish.interval_secs,
            max_queue_depth: self.publish.max_queue_depth,
            backoff: self.backoff.clone(),
        }
    }

    /// Plaintext configuration pointing at a local broker, for tests
    pub fn for_testing(gateway_id: &str) -> Self {
        Self {
            gateway: GatewaySection {
                id: gateway_id.to_string(),
            },
            mqtt: MqttSection {
                endpoint: "mqtt://localhost:1883".to_string(),
                client_id: None,
                cert_path: None,
                key_path: None,
                ca_path: None,
                keep_alive_secs: default_keep_alive_secs(),
                connect_timeout_secs: default_connect_timeout_secs(),
                ack_timeout_ms: default_ack_timeout_ms(),
            },
            publish: PublishSection::default(),
            backoff: BackoffPolicy::default(),
            shutdown: ShutdownSection::default(),
        }
    }
}
