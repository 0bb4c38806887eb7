//! Pure routing of MQTT event-loop events
//!
//! The session task only cares about a handful of packets: the CONNACK that
//! opens the session, the outgoing PUBLISH write, the PUBACK that confirms
//! it, and anything that ends the session.

use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode, Packet, PubAckReason};
use rumqttc::v5::Event;
use rumqttc::Outgoing;
use tracing::trace;

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to the session's handling (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(ack) if ack.code == ConnectReturnCode::Success => {
                    EventRoute::ConnectionAcknowledged
                }
                Packet::ConnAck(ack) => EventRoute::ConnectionRefused(format!("{:?}", ack.code)),
                Packet::PubAck(ack) => EventRoute::PublishAcknowledged {
                    pkid: ack.pkid,
                    accepted: Self::is_accepting_reason(&ack.reason),
                    reason: format!("{:?}", ack.reason),
                },
                Packet::Disconnect(disconnect) => {
                    EventRoute::Disconnected(format!("{:?}", disconnect.reason_code))
                }
                other => {
                    trace!("Ignoring incoming packet: {:?}", other);
                    EventRoute::Other
                }
            },
            Event::Outgoing(Outgoing::Publish(pkid)) => EventRoute::PublishWritten(*pkid),
            Event::Outgoing(_) => EventRoute::Other,
        }
    }

    /// PUBACK reasons that mean the broker took ownership of the message
    pub fn is_accepting_reason(reason: &PubAckReason) -> bool {
        matches!(
            reason,
            PubAckReason::Success | PubAckReason::NoMatchingSubscribers
        )
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// CONNACK with success code
    ConnectionAcknowledged,
    /// CONNACK with a refusal code
    ConnectionRefused(String),
    /// PUBLISH written to the socket
    PublishWritten(u16),
    /// PUBACK received
    PublishAcknowledged {
        pkid: u16,
        accepted: bool,
        reason: String,
    },
    /// Broker-initiated DISCONNECT
    Disconnected(String),
    /// Pings, acks for other packet types and outgoing bookkeeping
    Other,
}
