//! Publish coordination
//!
//! [`PublishCoordinator`] is the single entry point for telemetry. Scheduled
//! and manual producers validate and enqueue into the [`OfflineQueue`]; one
//! drain loop takes the queue head, sends it through the
//! [`ConnectionManager`] and removes it only once the broker confirmed it.
//! Every outcome is reported to the health reporter.

pub mod scheduler;

use crate::config::GatewayConfig;
use crate::connection::{interruptible_sleep, shutdown_requested, ConnectionManager, SendError};
use crate::health::HealthRecorder;
use crate::queue::{OfflineQueue, QueueFull};
use crate::telemetry::{
    payload_from_value, unix_timestamp, validate_payload_size, Channel, Payload, PayloadError,
    Qos, SourceKind, TelemetryMessage, TopicBuilder, TopicError,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

/// Proof that a manual submission was queued.
///
/// Issued at enqueue time; it says nothing about broker delivery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishReceipt {
    pub topic: String,
    /// Queue sequence, strictly increasing across all submissions
    pub sequence: u64,
    pub message_id: Uuid,
    pub qos: Qos,
    pub queued_at: DateTime<Utc>,
}

/// Why a submission was refused before entering the queue
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PublishError {
    #[error("Invalid topic: {0}")]
    InvalidTopic(#[from] TopicError),
    #[error("Invalid payload: {0}")]
    InvalidPayload(#[from] PayloadError),
    #[error(transparent)]
    QueueFull(#[from] QueueFull),
}

/// Tunables for submission and draining
#[derive(Debug, Clone, PartialEq)]
pub struct PublishSettings {
    pub max_payload_bytes: usize,
    /// Pause after a lost connection or broker rejection
    pub retry_pause: Duration,
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            max_payload_bytes: 128 * 1024,
            retry_pause: Duration::from_secs(2),
        }
    }
}

impl PublishSettings {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            max_payload_bytes: config.publish.max_payload_bytes,
            retry_pause: Duration::from_millis(config.publish.retry_pause_ms),
        }
    }
}

pub struct PublishCoordinator {
    gateway_id: String,
    queue: Arc<OfflineQueue>,
    connection: Arc<ConnectionManager>,
    recorder: HealthRecorder,
    settings: PublishSettings,
}

impl PublishCoordinator {
    pub fn new(
        gateway_id: impl Into<String>,
        queue: Arc<OfflineQueue>,
        connection: Arc<ConnectionManager>,
        recorder: HealthRecorder,
        settings: PublishSettings,
    ) -> Self {
        Self {
            gateway_id: gateway_id.into(),
            queue,
            connection,
            recorder,
            settings,
        }
    }

    pub fn gateway_id(&self) -> &str {
        &self.gateway_id
    }

    /// Queue telemetry from the periodic producer.
    ///
    /// Never fails towards the caller: a full queue evicts its oldest entry,
    /// and an invalid payload is logged and recorded as the last error.
    pub fn submit_scheduled(&self, channel: Channel, payload: Payload) {
        if let Err(e) = validate_payload_size(&payload, self.settings.max_payload_bytes) {
            warn!(channel = %channel, error = %e, "Scheduled telemetry rejected");
            self.recorder.rejected(PublishError::from(e));
            return;
        }

        let message =
            TelemetryMessage::for_channel(&self.gateway_id, channel, payload, SourceKind::Scheduled);
        let topic = message.topic().to_string();

        match self.queue.enqueue(message) {
            Ok(enqueued) => {
                if let Some(evicted) = enqueued.evicted {
                    self.recorder.rejected(format!(
                        "Offline queue full, dropped oldest entry {} on {}",
                        evicted.sequence,
                        evicted.message.topic()
                    ));
                }
                debug!(sequence = enqueued.sequence, topic = %topic, "Scheduled telemetry queued");
            }
            // Scheduled submissions evict rather than fail
            Err(e) => self.recorder.rejected(PublishError::from(e)),
        }
    }

    /// Queue a manual publish on the generic telemetry path
    pub fn submit_manual(&self, payload: Value) -> Result<PublishReceipt, PublishError> {
        self.submit_manual_on(Channel::Telemetry, payload)
    }

    /// Queue a manual publish on an explicit topic of this gateway's hierarchy
    pub fn submit_manual_to(&self, topic: &str, payload: Value) -> Result<PublishReceipt, PublishError> {
        let channel = TopicBuilder::validate(topic, &self.gateway_id).inspect_err(|e| {
            self.recorder.rejected(format!("Invalid topic: {e}"));
        })?;
        self.submit_manual_on(channel, payload)
    }

    /// Queue a manual publish on `channel`.
    ///
    /// The payload gets a `timestamp` (UNIX seconds) stamped at submission.
    /// Returns once the message is queued; a full queue fails with
    /// [`PublishError::QueueFull`] and leaves the queue untouched.
    pub fn submit_manual_on(
        &self,
        channel: Channel,
        payload: Value,
    ) -> Result<PublishReceipt, PublishError> {
        let result = self.enqueue_manual(channel, payload);
        match &result {
            Ok(receipt) => {
                info!(
                    sequence = receipt.sequence,
                    topic = %receipt.topic,
                    "Manual publish accepted"
                );
                self.recorder.accepted(receipt.sequence);
            }
            Err(e) => {
                warn!(channel = %channel, error = %e, "Manual publish refused");
                self.recorder.rejected(e);
            }
        }
        result
    }

    fn enqueue_manual(&self, channel: Channel, payload: Value) -> Result<PublishReceipt, PublishError> {
        let mut payload = payload_from_value(payload)?;
        payload.insert("timestamp".to_string(), Value::from(unix_timestamp(Utc::now())));
        validate_payload_size(&payload, self.settings.max_payload_bytes)?;

        let message =
            TelemetryMessage::for_channel(&self.gateway_id, channel, payload, SourceKind::Manual);
        let topic = message.topic().to_string();
        let message_id = message.message_id();
        let qos = message.qos();

        let enqueued = self.queue.enqueue(message)?;
        Ok(PublishReceipt {
            topic,
            sequence: enqueued.sequence,
            message_id,
            qos,
            queued_at: Utc::now(),
        })
    }

    /// Deliver queued entries in order until shutdown is signalled.
    ///
    /// The head entry stays queued until the broker confirms it; no later
    /// entry is attempted first. An in-flight send is not interrupted by
    /// shutdown; it completes or times out.
    pub async fn run_drain_loop(&self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut state_rx = self.connection.subscribe();
        info!(gateway_id = %self.gateway_id, "Drain loop started");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown_rx) => break,
                _ = self.queue.wait_non_empty() => {}
            }

            let connected = tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown_rx) => break,
                connected = async { state_rx.wait_for(|s| s.is_connected()).await.is_ok() } => connected,
            };
            if !connected {
                debug!("Connection manager gone, stopping drain loop");
                break;
            }

            let Some(entry) = self.queue.peek_front() else {
                continue;
            };
            let Some(attempts) = self.queue.record_attempt(entry.sequence) else {
                // Evicted between peek and attempt
                continue;
            };

            let span = crate::publish_span!(
                sequence = entry.sequence,
                topic = %entry.message.topic(),
                attempt = attempts
            );
            let sent = self.connection.send(&entry.message).instrument(span).await;

            match sent {
                Ok(ack) => {
                    if self.queue.remove_delivered(entry.sequence).is_none() {
                        debug!(sequence = entry.sequence, "Delivered entry was already evicted");
                    }
                    debug!(
                        sequence = entry.sequence,
                        attempts,
                        latency_ms = ack.latency.as_millis() as u64,
                        "Telemetry delivered"
                    );
                    self.recorder.delivered(entry.sequence, attempts);
                }
                Err(SendError::NotConnected { state }) => {
                    debug!(state = %state, "Connection dropped before send, waiting");
                }
                Err(e @ SendError::AckTimeout(_)) => {
                    warn!(sequence = entry.sequence, attempts, error = %e, "Retrying unacknowledged entry");
                    self.recorder.failed(entry.sequence, &e);
                }
                Err(e @ (SendError::ConnectionLost(_) | SendError::Rejected(_))) => {
                    warn!(sequence = entry.sequence, attempts, error = %e, "Send failed, entry kept at queue head");
                    self.recorder.failed(entry.sequence, &e);
                    if !interruptible_sleep(shutdown_rx.clone(), self.settings.retry_pause).await {
                        break;
                    }
                }
            }
        }

        info!(remaining = self.queue.len(), "Drain loop stopped");
    }
}
