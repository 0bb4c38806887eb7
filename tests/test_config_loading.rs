//! Configuration loading and validation tests
//!
//! Tests focus on observable outcomes of loading a gateway configuration
//! file: defaults, path resolution and refusal of malformed settings.

use can_gateway::config::{ConfigError, GatewayConfig};
use std::io::Write;
use tempfile::{NamedTempFile, TempDir};

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
[gateway]
id = "truck-042"

[mqtt]
endpoint = "mqtts://example-ats.iot.eu-north-1.amazonaws.com:8883"
cert_path = "/etc/gateway/certs/certificate.pem.crt"
key_path = "/etc/gateway/certs/private.pem.key"
ca_path = "/etc/gateway/certs/AmazonRootCA1.pem"

[publish]
interval_secs = 60
max_queue_depth = 250
"#
    )
    .unwrap();

    let config = GatewayConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.gateway.id, "truck-042");
    assert_eq!(config.client_id(), "truck-042");
    assert_eq!(config.publish.interval_secs, 60);
    assert_eq!(config.publish.max_queue_depth, 250);
    assert_eq!(config.publish.retry_pause_ms, 2000);
    assert_eq!(config.mqtt.keep_alive_secs, 30);
    assert_eq!(config.shutdown.grace_secs, 5);
    assert_eq!(config.backoff.base_delay_ms, 1000);
    assert_eq!(config.backoff.max_delay_ms, 32_000);
}

#[test]
fn test_relative_certificate_paths_resolve_against_config_dir() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("gateway.toml");
    std::fs::write(
        &path,
        r#"
[gateway]
id = "truck-7"

[mqtt]
endpoint = "mqtts://broker.example.com"
cert_path = "certs/certificate.pem.crt"
key_path = "certs/private.pem.key"
ca_path = "/opt/ca/root.pem"
"#,
    )
    .unwrap();

    let config = GatewayConfig::load_from_file(&path).unwrap();

    assert_eq!(
        config.mqtt.cert_path.unwrap(),
        dir.path().join("certs/certificate.pem.crt")
    );
    assert_eq!(
        config.mqtt.ca_path.unwrap(),
        std::path::PathBuf::from("/opt/ca/root.pem")
    );
}

#[test]
fn test_missing_file_is_a_read_error() {
    let result = GatewayConfig::load_from_file(std::path::Path::new("/nonexistent/gateway.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_malformed_toml_is_a_parse_error() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "[gateway\nid = ").unwrap();

    let result = GatewayConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_gateway_id_with_topic_wildcard_is_rejected() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
[gateway]
id = "truck/+"

[mqtt]
endpoint = "mqtt://localhost:1883"
"#
    )
    .unwrap();

    let result = GatewayConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidGatewayId(_))));
}

#[test]
fn test_unsupported_endpoint_scheme_is_rejected() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
[gateway]
id = "truck-1"

[mqtt]
endpoint = "https://broker.example.com"
"#
    )
    .unwrap();

    let result = GatewayConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidEndpoint(_))));
}

#[test]
fn test_jitter_ratio_of_one_is_rejected() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
[gateway]
id = "truck-1"

[mqtt]
endpoint = "mqtt://localhost:1883"

[backoff]
jitter_ratio = 1.0
"#
    )
    .unwrap();

    let result = GatewayConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
fn test_config_view_serializes_without_certificate_paths() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
[gateway]
id = "truck-9"

[mqtt]
endpoint = "mqtts://broker.example.com:8883"
client_id = "truck-9-client"
key_path = "/etc/gateway/certs/private.pem.key"
"#
    )
    .unwrap();

    let config = GatewayConfig::load_from_file(temp_file.path()).unwrap();
    let json = serde_json::to_string(&config.view()).unwrap();

    assert!(json.contains("truck-9-client"));
    assert!(!json.contains("private.pem.key"));
}
