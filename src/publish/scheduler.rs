//! Periodic telemetry producer

use super::PublishCoordinator;
use crate::connection::shutdown_requested;
use crate::telemetry::{unix_timestamp, Channel, Payload};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Body of the periodic heartbeat on the generic telemetry path
pub fn heartbeat_payload(gateway_id: &str, at: DateTime<Utc>) -> Payload {
    let mut payload = Payload::new();
    payload.insert("timestamp".to_string(), Value::from(unix_timestamp(at)));
    payload.insert("gateway_id".to_string(), Value::from(gateway_id));
    payload.insert("status".to_string(), Value::from("online"));
    payload.insert("message".to_string(), Value::from("Scheduled telemetry data"));
    payload
}

/// Submit a heartbeat every `interval` until shutdown.
///
/// The first heartbeat goes out immediately. Ticks missed while the runtime
/// was busy are delayed rather than fired in a burst.
pub async fn run(
    coordinator: Arc<PublishCoordinator>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(interval_secs = interval.as_secs(), "Telemetry scheduler started");

    loop {
        tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown_rx) => break,
            _ = ticker.tick() => {
                let payload = heartbeat_payload(coordinator.gateway_id(), Utc::now());
                coordinator.submit_scheduled(Channel::Telemetry, payload);
                debug!("Scheduled telemetry submitted");
            }
        }
    }

    info!("Telemetry scheduler stopped");
}
