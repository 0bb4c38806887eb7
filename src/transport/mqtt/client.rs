//! Impure I/O for the MQTT transport
//!
//! [`MqttConnector`] performs the CONNECT/CONNACK handshake and hands the
//! rumqttc event loop to a per-session task. The task routes events through
//! [`MessageHandler`] and resolves the single in-flight publish when its
//! write completes (QoS 0) or its PUBACK arrives (QoS 1).

use super::connection::{configure_mqtt_options, TlsMaterial};
use super::message_handler::{EventRoute, MessageHandler};
use crate::config::{parse_endpoint, BrokerEndpoint, ConfigError, GatewayConfig};
use crate::telemetry::Qos;
use crate::transport::{Connector, Session, SessionError};
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::v5::{AsyncClient, EventLoop, MqttOptions};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

/// Capacity of the request channel between client handle and event loop
const REQUEST_CHANNEL_CAPACITY: usize = 16;

/// Establishes mutual-TLS MQTT v5 sessions
pub struct MqttConnector {
    options: MqttOptions,
    endpoint: BrokerEndpoint,
}

impl MqttConnector {
    /// Build a connector, reading certificate material for `mqtts://`
    pub fn from_config(config: &GatewayConfig) -> Result<Self, ConfigError> {
        let endpoint = parse_endpoint(&config.mqtt.endpoint)?;

        let tls = if endpoint.tls {
            Some(TlsMaterial::load(&config.mqtt)?)
        } else {
            warn!(
                endpoint = %endpoint,
                "Plaintext MQTT endpoint configured; use only for local development"
            );
            None
        };

        Ok(Self {
            options: configure_mqtt_options(config, &endpoint, tls),
            endpoint,
        })
    }

    async fn handshake(&self) -> Result<Arc<dyn Session>, SessionError> {
        let (client, mut event_loop) =
            AsyncClient::new(self.options.clone(), REQUEST_CHANNEL_CAPACITY);

        loop {
            let event = event_loop
                .poll()
                .await
                .map_err(|e| SessionError::HandshakeFailed(e.to_string()))?;

            match MessageHandler::route_mqtt_event(&event) {
                EventRoute::ConnectionAcknowledged => break,
                EventRoute::ConnectionRefused(code) => {
                    return Err(SessionError::HandshakeFailed(format!(
                        "broker refused connection: {code}"
                    )));
                }
                other => debug!("Event before CONNACK: {:?}", other),
            }
        }

        info!("CONNACK received");
        Ok(Arc::new(MqttSession::start(client, event_loop)))
    }
}

#[async_trait]
impl Connector for MqttConnector {
    async fn connect(&self) -> Result<Arc<dyn Session>, SessionError> {
        let span = crate::mqtt_span!(endpoint = %self.endpoint, phase = "connect");
        self.handshake().instrument(span).await
    }

    fn endpoint(&self) -> String {
        self.endpoint.to_string()
    }
}

/// The one publish awaiting confirmation on a session
#[derive(Debug)]
pub struct InFlight {
    pub qos: Qos,
    /// Packet id, known once the PUBLISH has been written
    pub pkid: Option<u16>,
    pub done: oneshot::Sender<Result<(), SessionError>>,
}

type InFlightSlot = Arc<Mutex<Option<InFlight>>>;

fn lock_slot(slot: &InFlightSlot) -> MutexGuard<'_, Option<InFlight>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Record a PUBLISH write; QoS 0 publishes complete here
pub fn on_publish_written(slot: &mut Option<InFlight>, pkid: u16) {
    let Some(in_flight) = slot.as_mut() else {
        return;
    };
    if in_flight.pkid.is_some() {
        return;
    }

    match in_flight.qos {
        Qos::AtMostOnce => {
            if let Some(done) = slot.take() {
                let _ = done.done.send(Ok(()));
            }
        }
        Qos::AtLeastOnce => in_flight.pkid = Some(pkid),
    }
}

/// Resolve a QoS 1 publish on its PUBACK
pub fn on_publish_acknowledged(
    slot: &mut Option<InFlight>,
    pkid: u16,
    accepted: bool,
    reason: &str,
) {
    let matches = slot
        .as_ref()
        .is_some_and(|in_flight| in_flight.pkid == Some(pkid));
    if !matches {
        debug!(pkid, "PUBACK for a publish that is no longer in flight");
        return;
    }

    if let Some(in_flight) = slot.take() {
        let result = if accepted {
            Ok(())
        } else {
            Err(SessionError::Rejected(reason.to_string()))
        };
        let _ = in_flight.done.send(result);
    }
}

/// One live rumqttc session
pub struct MqttSession {
    client: AsyncClient,
    in_flight: InFlightSlot,
    open: Arc<watch::Sender<bool>>,
    closing: Arc<AtomicBool>,
    event_task: Mutex<Option<JoinHandle<()>>>,
}

impl MqttSession {
    fn start(client: AsyncClient, event_loop: EventLoop) -> Self {
        let in_flight: InFlightSlot = Arc::new(Mutex::new(None));
        let (open, _) = watch::channel(true);
        let open = Arc::new(open);
        let closing = Arc::new(AtomicBool::new(false));

        let handle = tokio::spawn(
            run_event_loop(event_loop, in_flight.clone(), open.clone(), closing.clone())
                .instrument(crate::mqtt_span!(phase = "session")),
        );

        Self {
            client,
            in_flight,
            open,
            closing,
            event_task: Mutex::new(Some(handle)),
        }
    }
}

async fn run_event_loop(
    mut event_loop: EventLoop,
    in_flight: InFlightSlot,
    open: Arc<watch::Sender<bool>>,
    closing: Arc<AtomicBool>,
) {
    let reason = loop {
        match event_loop.poll().await {
            Ok(event) => match MessageHandler::route_mqtt_event(&event) {
                EventRoute::PublishWritten(pkid) => {
                    on_publish_written(&mut lock_slot(&in_flight), pkid);
                }
                EventRoute::PublishAcknowledged {
                    pkid,
                    accepted,
                    reason,
                } => {
                    on_publish_acknowledged(&mut lock_slot(&in_flight), pkid, accepted, &reason);
                }
                EventRoute::Disconnected(reason) => {
                    break format!("broker sent DISCONNECT: {reason}");
                }
                EventRoute::ConnectionRefused(code) => {
                    break format!("broker refused session: {code}");
                }
                EventRoute::ConnectionAcknowledged | EventRoute::Other => {}
            },
            Err(e) => break e.to_string(),
        }
    };

    if closing.load(Ordering::Acquire) {
        debug!("MQTT session closed: {}", reason);
    } else {
        warn!("MQTT session lost: {}", reason);
    }

    open.send_replace(false);
    let pending = lock_slot(&in_flight).take();
    if let Some(pending) = pending {
        let _ = pending
            .done
            .send(Err(SessionError::ConnectionLost(reason)));
    }
}

#[async_trait]
impl Session for MqttSession {
    async fn publish(&self, topic: &str, payload: Bytes, qos: Qos) -> Result<(), SessionError> {
        if !self.is_open() {
            return Err(SessionError::ConnectionLost("session closed".to_string()));
        }

        let (done_tx, done_rx) = oneshot::channel();
        let replaced = lock_slot(&self.in_flight).replace(InFlight {
            qos,
            pkid: None,
            done: done_tx,
        });
        if replaced.is_some() {
            debug!("Abandoning stale in-flight publish");
        }

        if let Err(e) = self.client.publish(topic, qos.into(), false, payload).await {
            lock_slot(&self.in_flight).take();
            return Err(SessionError::ConnectionLost(e.to_string()));
        }

        done_rx.await.unwrap_or_else(|_| {
            Err(SessionError::ConnectionLost(
                "session closed before confirmation".to_string(),
            ))
        })
    }

    async fn closed(&self) {
        let mut open = self.open.subscribe();
        let _ = open.wait_for(|open| !*open).await;
    }

    fn is_open(&self) -> bool {
        *self.open.borrow()
    }

    async fn disconnect(&self) {
        self.closing.store(true, Ordering::Release);
        if self.is_open() {
            if let Err(e) = self.client.disconnect().await {
                debug!("DISCONNECT not sent: {}", e);
            }
        }

        let handle = self
            .event_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(Duration::from_secs(1), &mut handle)
                .await
                .is_err()
            {
                debug!("MQTT event loop did not stop after DISCONNECT, aborting");
                handle.abort();
            }
        }
        self.open.send_replace(false);
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        // No async in Drop; disconnect() is the graceful path
        if let Some(handle) = self
            .event_task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn in_flight(qos: Qos) -> (Option<InFlight>, oneshot::Receiver<Result<(), SessionError>>) {
        let (done, rx) = oneshot::channel();
        (
            Some(InFlight {
                qos,
                pkid: None,
                done,
            }),
            rx,
        )
    }

    #[test]
    fn test_qos0_completes_on_write() {
        let (mut slot, mut rx) = in_flight(Qos::AtMostOnce);

        on_publish_written(&mut slot, 0);

        assert!(slot.is_none());
        assert_eq!(rx.try_recv().unwrap(), Ok(()));
    }

    #[test]
    fn test_qos1_waits_for_matching_puback() {
        let (mut slot, mut rx) = in_flight(Qos::AtLeastOnce);

        on_publish_written(&mut slot, 5);
        assert_eq!(slot.as_ref().unwrap().pkid, Some(5));
        assert!(rx.try_recv().is_err());

        on_publish_acknowledged(&mut slot, 4, true, "Success");
        assert!(slot.is_some());

        on_publish_acknowledged(&mut slot, 5, true, "Success");
        assert!(slot.is_none());
        assert_eq!(rx.try_recv().unwrap(), Ok(()));
    }

    #[test]
    fn test_puback_before_write_is_ignored() {
        let (mut slot, _rx) = in_flight(Qos::AtLeastOnce);

        on_publish_acknowledged(&mut slot, 1, true, "Success");

        assert!(slot.is_some());
    }

    #[test]
    fn test_refused_puback_rejects() {
        let (mut slot, mut rx) = in_flight(Qos::AtLeastOnce);
        on_publish_written(&mut slot, 9);

        on_publish_acknowledged(&mut slot, 9, false, "QuotaExceeded");

        assert_eq!(
            rx.try_recv().unwrap(),
            Err(SessionError::Rejected("QuotaExceeded".to_string()))
        );
    }

    #[test]
    fn test_second_write_does_not_rebind_pkid() {
        let (mut slot, _rx) = in_flight(Qos::AtLeastOnce);

        on_publish_written(&mut slot, 2);
        on_publish_written(&mut slot, 3);

        assert_eq!(slot.as_ref().unwrap().pkid, Some(2));
    }

    #[test]
    fn test_connector_requires_certificates_for_tls() {
        let mut config = GatewayConfig::for_testing("gw");
        config.mqtt.endpoint = "mqtts://broker.example.com".to_string();

        let result = MqttConnector::from_config(&config);

        assert!(matches!(result, Err(ConfigError::Certificate { .. })));
    }

    #[test]
    fn test_plaintext_connector_builds() {
        let config = GatewayConfig::for_testing("gw");
        let connector = MqttConnector::from_config(&config).unwrap();
        assert_eq!(connector.endpoint(), "mqtt://localhost:1883");
    }
}
