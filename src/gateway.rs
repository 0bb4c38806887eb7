//! Gateway assembly and lifecycle
//!
//! [`Gateway`] wires the offline queue, connection manager, publish
//! coordinator and health reporter together, owns their background tasks,
//! and exposes the caller-facing operations: health, manual publish and a
//! read-only configuration view.

use crate::config::{ConfigView, GatewayConfig};
use crate::connection::{shutdown_requested, ConnectionManager, ConnectionSettings};
use crate::error::GatewayResult;
use crate::health::{HealthReporter, HealthSnapshot};
use crate::publish::{scheduler, PublishCoordinator, PublishError, PublishReceipt, PublishSettings};
use crate::queue::OfflineQueue;
use crate::telemetry::{unix_timestamp, Channel, Metric, Payload};
use crate::transport::mqtt::MqttConnector;
use crate::transport::Connector;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Body of the notice queued after the broker connection recovers
pub fn connection_notice(reconnects: u32, at: DateTime<Utc>) -> Payload {
    let mut payload = Payload::new();
    payload.insert("state".to_string(), Value::from("connected"));
    payload.insert("reconnects".to_string(), Value::from(reconnects));
    payload.insert("timestamp".to_string(), Value::from(unix_timestamp(at)));
    payload
}

/// A running telemetry gateway
pub struct Gateway {
    config: GatewayConfig,
    queue: Arc<OfflineQueue>,
    connection: Arc<ConnectionManager>,
    coordinator: Arc<PublishCoordinator>,
    reporter: HealthReporter,
    producers_tx: watch::Sender<bool>,
    drain_tx: watch::Sender<bool>,
    scheduler_handle: Option<JoinHandle<()>>,
    notice_handle: Option<JoinHandle<()>>,
    drain_handle: Option<JoinHandle<()>>,
}

impl Gateway {
    /// Start a gateway speaking MQTT over mutual TLS.
    ///
    /// Unreadable certificate material does not fail startup: the connection
    /// stays in `Failed("configuration")` while submissions are still queued.
    pub async fn start(config: GatewayConfig) -> GatewayResult<Self> {
        config.validate()?;
        let settings = ConnectionSettings::from_config(&config);

        let connection = match MqttConnector::from_config(&config) {
            Ok(connector) => ConnectionManager::new(Arc::new(connector), settings),
            Err(e) => {
                error!(error = %e, "Broker connection disabled by configuration error");
                ConnectionManager::misconfigured(e.to_string(), settings)
            }
        };

        Ok(Self::launch(config, Arc::new(connection)))
    }

    /// Start a gateway over an arbitrary transport
    pub async fn with_connector(
        config: GatewayConfig,
        connector: Arc<dyn Connector>,
    ) -> GatewayResult<Self> {
        config.validate()?;
        let settings = ConnectionSettings::from_config(&config);
        let connection = Arc::new(ConnectionManager::new(connector, settings));
        Ok(Self::launch(config, connection))
    }

    fn launch(config: GatewayConfig, connection: Arc<ConnectionManager>) -> Self {
        let span = crate::lifecycle_span!(gateway_id = %config.gateway.id, phase = "start");
        let _entered = span.enter();

        let queue = Arc::new(OfflineQueue::new(config.publish.max_queue_depth));
        let (reporter, recorder) = HealthReporter::new(connection.clone(), queue.clone());
        let coordinator = Arc::new(PublishCoordinator::new(
            config.gateway.id.clone(),
            queue.clone(),
            connection.clone(),
            recorder,
            PublishSettings::from_config(&config),
        ));

        let (producers_tx, producers_rx) = watch::channel(false);
        let (drain_tx, drain_rx) = watch::channel(false);

        let drain_handle = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.run_drain_loop(drain_rx).await })
        };
        let scheduler_handle = tokio::spawn(scheduler::run(
            coordinator.clone(),
            config.publish_interval(),
            producers_rx.clone(),
        ));
        let notice_handle = tokio::spawn(announce_reconnections(
            coordinator.clone(),
            connection.clone(),
            producers_rx,
        ));

        match connection.connect() {
            Ok(()) => info!(gateway_id = %config.gateway.id, "Gateway started"),
            Err(e) => error!(
                gateway_id = %config.gateway.id,
                error = %e,
                "Gateway started without broker connection"
            ),
        }

        Self {
            config,
            queue,
            connection,
            coordinator,
            reporter,
            producers_tx,
            drain_tx,
            scheduler_handle: Some(scheduler_handle),
            notice_handle: Some(notice_handle),
            drain_handle: Some(drain_handle),
        }
    }

    /// Current health snapshot
    pub fn health(&self) -> HealthSnapshot {
        self.reporter.snapshot()
    }

    /// Manual publish on the generic telemetry path
    pub fn publish(&self, payload: Value) -> Result<PublishReceipt, PublishError> {
        self.coordinator.submit_manual(payload)
    }

    /// Manual publish on an explicit topic of this gateway
    pub fn publish_to(&self, topic: &str, payload: Value) -> Result<PublishReceipt, PublishError> {
        self.coordinator.submit_manual_to(topic, payload)
    }

    /// Read-only view of the active configuration
    pub fn current_config(&self) -> ConfigView {
        self.config.view()
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub fn queue(&self) -> &Arc<OfflineQueue> {
        &self.queue
    }

    pub fn coordinator(&self) -> &Arc<PublishCoordinator> {
        &self.coordinator
    }

    /// Stop producers, give the in-flight send up to the configured grace
    /// period, then close the broker session. Entries still queued are
    /// discarded.
    pub async fn shutdown(&mut self) {
        let span = crate::lifecycle_span!(gateway_id = %self.config.gateway.id, phase = "shutdown");
        async {
            info!("Shutting down gateway");

            self.producers_tx.send_replace(true);
            for handle in [self.scheduler_handle.take(), self.notice_handle.take()]
                .into_iter()
                .flatten()
            {
                if let Err(e) = handle.await {
                    if !e.is_cancelled() {
                        error!("Producer task ended with error: {}", e);
                    }
                }
            }

            self.drain_tx.send_replace(true);
            if let Some(mut handle) = self.drain_handle.take() {
                let grace = self.config.shutdown_grace();
                match tokio::time::timeout(grace, &mut handle).await {
                    Ok(Ok(())) => debug!("Drain loop finished"),
                    Ok(Err(e)) => error!("Drain loop ended with error: {}", e),
                    Err(_) => {
                        warn!(grace_secs = grace.as_secs(), "In-flight send exceeded grace period, aborting");
                        handle.abort();
                    }
                }
            }

            self.connection.disconnect().await;

            let remaining = self.queue.len();
            if remaining > 0 {
                warn!(remaining, "Discarding undelivered telemetry");
            }
            info!("Gateway shutdown complete");
        }
        .instrument(span)
        .await;
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        for handle in [
            self.scheduler_handle.take(),
            self.notice_handle.take(),
            self.drain_handle.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
    }
}

/// Queue a `gateway/connection_state` notice each time the connection
/// comes back after a loss
async fn announce_reconnections(
    coordinator: Arc<PublishCoordinator>,
    connection: Arc<ConnectionManager>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut state_rx = connection.subscribe();
    let mut announced = connection.reconnects();

    loop {
        tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown_rx) => break,
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        if !state_rx.borrow_and_update().is_connected() {
            continue;
        }
        let reconnects = connection.reconnects();
        if reconnects > announced {
            announced = reconnects;
            coordinator.submit_scheduled(
                Channel::Metric(Metric::GatewayConnectionState),
                connection_notice(reconnects, Utc::now()),
            );
            info!(reconnects, "Reconnection notice queued");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionState, CONFIGURATION_FAILURE};

    #[test]
    fn test_connection_notice_fields() {
        let at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let notice = connection_notice(3, at);

        assert_eq!(notice["state"], "connected");
        assert_eq!(notice["reconnects"], 3);
        assert_eq!(notice["timestamp"].as_f64(), Some(1_700_000_000.0));
    }

    #[tokio::test]
    async fn test_start_with_missing_certificates_degrades() {
        let mut config = GatewayConfig::for_testing("gw-cfg");
        config.mqtt.endpoint = "mqtts://broker.example.com:8883".to_string();
        config.mqtt.cert_path = Some("/nonexistent/cert.pem".into());
        config.mqtt.key_path = Some("/nonexistent/key.pem".into());
        config.mqtt.ca_path = Some("/nonexistent/ca.pem".into());

        let mut gateway = Gateway::start(config).await.unwrap();

        let health = gateway.health();
        assert!(!health.connected);
        assert_eq!(
            health.state,
            ConnectionState::Failed(CONFIGURATION_FAILURE.to_string())
        );

        let receipt = gateway.publish(serde_json::json!({"speed": 12})).unwrap();
        assert_eq!(receipt.topic, "vehicle/gw-cfg/telemetry");

        gateway.shutdown().await;
        assert_eq!(
            gateway.health().state,
            ConnectionState::Failed(CONFIGURATION_FAILURE.to_string())
        );
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let mut config = GatewayConfig::for_testing("gw");
        config.publish.max_queue_depth = 0;

        assert!(Gateway::start(config).await.is_err());
    }
}
