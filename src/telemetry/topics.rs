//! Topic hierarchy and gateway ID validation
//!
//! Every topic the gateway publishes on is derived here. The layout is a
//! caller-visible contract shared with cloud-side subscribers:
//!
//! ```text
//! vehicles/<gateway-id>/engine/{rpm|coolant_temp|load}
//! vehicles/<gateway-id>/vehicle/{speed|odometer|gear_status}
//! vehicles/<gateway-id>/diagnostics/{dtc|error_count|health}
//! vehicles/<gateway-id>/security/{auth_failures|timestamp_drift|policy_violations}
//! vehicles/<gateway-id>/gateway/{connection_state|uptime|message_rate}
//! vehicle/<gateway-id>/telemetry
//! ```

use super::message::Qos;
use std::fmt;
use thiserror::Error;

/// Root segment of the per-metric hierarchy
pub const METRIC_ROOT: &str = "vehicles";
/// Root segment of the generic telemetry path
pub const TELEMETRY_ROOT: &str = "vehicle";
/// Leaf segment of the generic telemetry path
pub const TELEMETRY_LEAF: &str = "telemetry";

/// A single leaf of the per-metric topic hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    EngineRpm,
    EngineCoolantTemp,
    EngineLoad,
    VehicleSpeed,
    VehicleOdometer,
    VehicleGearStatus,
    DiagnosticsDtc,
    DiagnosticsErrorCount,
    DiagnosticsHealth,
    SecurityAuthFailures,
    SecurityTimestampDrift,
    SecurityPolicyViolations,
    GatewayConnectionState,
    GatewayUptime,
    GatewayMessageRate,
}

impl Metric {
    pub const ALL: [Metric; 15] = [
        Metric::EngineRpm,
        Metric::EngineCoolantTemp,
        Metric::EngineLoad,
        Metric::VehicleSpeed,
        Metric::VehicleOdometer,
        Metric::VehicleGearStatus,
        Metric::DiagnosticsDtc,
        Metric::DiagnosticsErrorCount,
        Metric::DiagnosticsHealth,
        Metric::SecurityAuthFailures,
        Metric::SecurityTimestampDrift,
        Metric::SecurityPolicyViolations,
        Metric::GatewayConnectionState,
        Metric::GatewayUptime,
        Metric::GatewayMessageRate,
    ];

    /// Category segment (`engine`, `vehicle`, `diagnostics`, `security`, `gateway`)
    pub fn group(self) -> &'static str {
        match self {
            Metric::EngineRpm | Metric::EngineCoolantTemp | Metric::EngineLoad => "engine",
            Metric::VehicleSpeed | Metric::VehicleOdometer | Metric::VehicleGearStatus => {
                "vehicle"
            }
            Metric::DiagnosticsDtc | Metric::DiagnosticsErrorCount | Metric::DiagnosticsHealth => {
                "diagnostics"
            }
            Metric::SecurityAuthFailures
            | Metric::SecurityTimestampDrift
            | Metric::SecurityPolicyViolations => "security",
            Metric::GatewayConnectionState | Metric::GatewayUptime | Metric::GatewayMessageRate => {
                "gateway"
            }
        }
    }

    /// Leaf segment within the category
    pub fn leaf(self) -> &'static str {
        match self {
            Metric::EngineRpm => "rpm",
            Metric::EngineCoolantTemp => "coolant_temp",
            Metric::EngineLoad => "load",
            Metric::VehicleSpeed => "speed",
            Metric::VehicleOdometer => "odometer",
            Metric::VehicleGearStatus => "gear_status",
            Metric::DiagnosticsDtc => "dtc",
            Metric::DiagnosticsErrorCount => "error_count",
            Metric::DiagnosticsHealth => "health",
            Metric::SecurityAuthFailures => "auth_failures",
            Metric::SecurityTimestampDrift => "timestamp_drift",
            Metric::SecurityPolicyViolations => "policy_violations",
            Metric::GatewayConnectionState => "connection_state",
            Metric::GatewayUptime => "uptime",
            Metric::GatewayMessageRate => "message_rate",
        }
    }

    fn from_segments(group: &str, leaf: &str) -> Option<Metric> {
        Metric::ALL
            .into_iter()
            .find(|m| m.group() == group && m.leaf() == leaf)
    }
}

/// Where a message is addressed: a specific metric leaf or the generic telemetry path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Metric(Metric),
    Telemetry,
}

impl Channel {
    /// QoS used for this channel.
    ///
    /// Alerts, security events and reconnection notices need a PUBACK;
    /// high-rate signal samples are fire-and-forget.
    pub fn default_qos(self) -> Qos {
        match self {
            Channel::Telemetry => Qos::AtLeastOnce,
            Channel::Metric(metric) => match metric {
                Metric::DiagnosticsDtc
                | Metric::DiagnosticsErrorCount
                | Metric::SecurityAuthFailures
                | Metric::SecurityTimestampDrift
                | Metric::SecurityPolicyViolations
                | Metric::GatewayConnectionState => Qos::AtLeastOnce,
                _ => Qos::AtMostOnce,
            },
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Metric(metric) => write!(f, "{}/{}", metric.group(), metric.leaf()),
            Channel::Telemetry => f.write_str(TELEMETRY_LEAF),
        }
    }
}

/// Topic construction and parsing for the gateway hierarchy
pub struct TopicBuilder;

impl TopicBuilder {
    /// Build the topic for `channel` under `gateway_id`
    pub fn topic_for(gateway_id: &str, channel: Channel) -> String {
        match channel {
            Channel::Metric(metric) => format!(
                "{METRIC_ROOT}/{gateway_id}/{}/{}",
                metric.group(),
                metric.leaf()
            ),
            Channel::Telemetry => format!("{TELEMETRY_ROOT}/{gateway_id}/{TELEMETRY_LEAF}"),
        }
    }

    /// Parse a topic back into its gateway ID and channel, rejecting anything
    /// outside the hierarchy
    pub fn parse(topic: &str) -> Result<(String, Channel), TopicError> {
        let segments: Vec<&str> = topic.split('/').collect();
        match segments.as_slice() {
            [root, gateway_id, leaf] if *root == TELEMETRY_ROOT && *leaf == TELEMETRY_LEAF => {
                validate_gateway_id(gateway_id)?;
                Ok((gateway_id.to_string(), Channel::Telemetry))
            }
            [root, gateway_id, group, leaf] if *root == METRIC_ROOT => {
                validate_gateway_id(gateway_id)?;
                let metric = Metric::from_segments(group, leaf)
                    .ok_or_else(|| TopicError::UnknownMetric(format!("{group}/{leaf}")))?;
                Ok((gateway_id.to_string(), Channel::Metric(metric)))
            }
            _ => Err(TopicError::OutsideHierarchy(topic.to_string())),
        }
    }

    /// Validate that `topic` is exactly the topic `gateway_id` should use for `channel`
    pub fn validate(topic: &str, gateway_id: &str) -> Result<Channel, TopicError> {
        let (owner, channel) = Self::parse(topic)?;
        if owner != gateway_id {
            return Err(TopicError::ForeignGateway {
                expected: gateway_id.to_string(),
                found: owner,
            });
        }
        Ok(channel)
    }
}

/// Validate a gateway ID against `[a-zA-Z0-9._-]+`
///
/// MQTT separators and wildcards (`/`, `+`, `#`) are rejected along with
/// everything else outside the class.
pub fn validate_gateway_id(gateway_id: &str) -> Result<(), TopicError> {
    if gateway_id.is_empty() {
        return Err(TopicError::EmptyGatewayId);
    }

    for ch in gateway_id.chars() {
        if !ch.is_ascii_alphanumeric() && ch != '.' && ch != '_' && ch != '-' {
            return Err(TopicError::InvalidGatewayIdChar(ch));
        }
    }

    Ok(())
}

/// Topic validation errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TopicError {
    #[error("Gateway ID cannot be empty")]
    EmptyGatewayId,
    #[error("Gateway ID contains invalid character: '{0}'")]
    InvalidGatewayIdChar(char),
    #[error("Unknown metric: {0}")]
    UnknownMetric(String),
    #[error("Topic is outside the gateway hierarchy: {0}")]
    OutsideHierarchy(String),
    #[error("Topic belongs to gateway '{found}', expected '{expected}'")]
    ForeignGateway { expected: String, found: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_metric_topics_match_hierarchy() {
        let cases = [
            (Metric::EngineRpm, "vehicles/gw-1/engine/rpm"),
            (Metric::EngineCoolantTemp, "vehicles/gw-1/engine/coolant_temp"),
            (Metric::EngineLoad, "vehicles/gw-1/engine/load"),
            (Metric::VehicleSpeed, "vehicles/gw-1/vehicle/speed"),
            (Metric::VehicleOdometer, "vehicles/gw-1/vehicle/odometer"),
            (Metric::VehicleGearStatus, "vehicles/gw-1/vehicle/gear_status"),
            (Metric::DiagnosticsDtc, "vehicles/gw-1/diagnostics/dtc"),
            (Metric::DiagnosticsErrorCount, "vehicles/gw-1/diagnostics/error_count"),
            (Metric::DiagnosticsHealth, "vehicles/gw-1/diagnostics/health"),
            (Metric::SecurityAuthFailures, "vehicles/gw-1/security/auth_failures"),
            (Metric::SecurityTimestampDrift, "vehicles/gw-1/security/timestamp_drift"),
            (Metric::SecurityPolicyViolations, "vehicles/gw-1/security/policy_violations"),
            (Metric::GatewayConnectionState, "vehicles/gw-1/gateway/connection_state"),
            (Metric::GatewayUptime, "vehicles/gw-1/gateway/uptime"),
            (Metric::GatewayMessageRate, "vehicles/gw-1/gateway/message_rate"),
        ];

        for (metric, expected) in cases {
            assert_eq!(
                TopicBuilder::topic_for("gw-1", Channel::Metric(metric)),
                expected
            );
        }
    }

    #[test]
    fn test_generic_telemetry_topic() {
        assert_eq!(
            TopicBuilder::topic_for("can-gateway", Channel::Telemetry),
            "vehicle/can-gateway/telemetry"
        );
    }

    #[test]
    fn test_qos_selection() {
        assert_eq!(
            Channel::Metric(Metric::EngineRpm).default_qos(),
            Qos::AtMostOnce
        );
        assert_eq!(
            Channel::Metric(Metric::DiagnosticsDtc).default_qos(),
            Qos::AtLeastOnce
        );
        assert_eq!(
            Channel::Metric(Metric::GatewayConnectionState).default_qos(),
            Qos::AtLeastOnce
        );
        assert_eq!(Channel::Telemetry.default_qos(), Qos::AtLeastOnce);
    }

    #[test]
    fn test_parse_rejects_topics_outside_hierarchy() {
        assert!(matches!(
            TopicBuilder::parse("vehicles/gw/engine/torque"),
            Err(TopicError::UnknownMetric(_))
        ));
        assert!(matches!(
            TopicBuilder::parse("vehicles/gw/engine"),
            Err(TopicError::OutsideHierarchy(_))
        ));
        assert!(matches!(
            TopicBuilder::parse("vehicle/gw/engine/rpm"),
            Err(TopicError::OutsideHierarchy(_))
        ));
        assert!(matches!(
            TopicBuilder::parse("vehicles/gw/engine/rpm/"),
            Err(TopicError::OutsideHierarchy(_))
        ));
        assert!(matches!(
            TopicBuilder::parse("vehicles/+/engine/rpm"),
            Err(TopicError::InvalidGatewayIdChar('+'))
        ));
        assert!(matches!(
            TopicBuilder::parse("vehicle//telemetry"),
            Err(TopicError::EmptyGatewayId)
        ));
    }

    #[test]
    fn test_validate_rejects_foreign_gateway() {
        let result = TopicBuilder::validate("vehicle/other/telemetry", "mine");
        assert_eq!(
            result,
            Err(TopicError::ForeignGateway {
                expected: "mine".to_string(),
                found: "other".to_string()
            })
        );
        assert_eq!(
            TopicBuilder::validate("vehicle/mine/telemetry", "mine"),
            Ok(Channel::Telemetry)
        );
    }

    #[test]
    fn test_validate_gateway_id() {
        assert!(validate_gateway_id("can-gateway_01.eu").is_ok());
        assert_eq!(validate_gateway_id(""), Err(TopicError::EmptyGatewayId));
        assert_eq!(
            validate_gateway_id("gw/1"),
            Err(TopicError::InvalidGatewayIdChar('/'))
        );
        assert_eq!(
            validate_gateway_id("gw#"),
            Err(TopicError::InvalidGatewayIdChar('#'))
        );
    }

    fn any_channel() -> impl Strategy<Value = Channel> {
        prop_oneof![
            Just(Channel::Telemetry),
            (0..Metric::ALL.len()).prop_map(|i| Channel::Metric(Metric::ALL[i])),
        ]
    }

    proptest! {
        #[test]
        fn built_topics_parse_back(gateway_id in "[a-zA-Z0-9._-]{1,24}", channel in any_channel()) {
            let topic = TopicBuilder::topic_for(&gateway_id, channel);
            let (parsed_id, parsed_channel) = TopicBuilder::parse(&topic).unwrap();
            prop_assert_eq!(parsed_id, gateway_id);
            prop_assert_eq!(parsed_channel, channel);
        }

        #[test]
        fn gateway_ids_with_separators_are_rejected(prefix in "[a-z]{0,5}", sep in "[/+# ]", suffix in "[a-z]{0,5}") {
            let id = format!("{prefix}{sep}{suffix}");
            prop_assert!(validate_gateway_id(&id).is_err());
        }
    }
}
