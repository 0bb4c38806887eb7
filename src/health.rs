//! Gateway health reporting
//!
//! The publish path reports every outcome through a [`HealthRecorder`],
//! which folds it into running statistics at once, so memory stays constant
//! however rarely health is polled. The [`HealthReporter`] combines those
//! statistics with live connection and queue state on demand. It only reads
//! other components; it never changes them.

use crate::connection::{ConnectionManager, ConnectionState};
use crate::error::sanitize_error_message;
use crate::queue::OfflineQueue;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One publish-path event
#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    /// Manual submission queued and receipted
    Accepted { sequence: u64, at: DateTime<Utc> },
    /// Broker confirmed delivery
    Delivered {
        sequence: u64,
        attempts: u32,
        at: DateTime<Utc>,
    },
    /// A send attempt failed; the entry stays queued
    Failed {
        sequence: u64,
        error: String,
        at: DateTime<Utc>,
    },
    /// Submission refused (invalid topic or payload, full queue)
    Rejected { error: String, at: DateTime<Utc> },
}

type SharedStats = Arc<Mutex<PublishStats>>;

fn lock_stats(stats: &SharedStats) -> MutexGuard<'_, PublishStats> {
    stats.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cloneable handle the publish path reports outcomes through
#[derive(Debug, Clone)]
pub struct HealthRecorder {
    stats: SharedStats,
}

impl HealthRecorder {
    pub fn record(&self, outcome: PublishOutcome) {
        lock_stats(&self.stats).apply(outcome);
    }

    pub fn accepted(&self, sequence: u64) {
        self.record(PublishOutcome::Accepted {
            sequence,
            at: Utc::now(),
        });
    }

    pub fn delivered(&self, sequence: u64, attempts: u32) {
        self.record(PublishOutcome::Delivered {
            sequence,
            attempts,
            at: Utc::now(),
        });
    }

    pub fn failed(&self, sequence: u64, error: impl ToString) {
        self.record(PublishOutcome::Failed {
            sequence,
            error: error.to_string(),
            at: Utc::now(),
        });
    }

    pub fn rejected(&self, error: impl ToString) {
        self.record(PublishOutcome::Rejected {
            error: error.to_string(),
            at: Utc::now(),
        });
    }
}

/// Overall health verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Connected to the broker
    Healthy,
    /// Buffering offline or reconnecting
    Degraded,
}

/// Point-in-time view of gateway health
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub connected: bool,
    /// Serialized inline as `state` plus `reason` for `failed`
    #[serde(flatten)]
    pub state: ConnectionState,
    pub queue_depth: usize,
    pub queue_capacity: usize,
    /// Most recent manual acceptance or confirmed delivery
    pub last_publish_at: Option<DateTime<Utc>>,
    /// Most recent broker-confirmed delivery
    pub last_delivery_at: Option<DateTime<Utc>>,
    /// Sanitized text of the most recent failure
    pub last_error: Option<String>,
    pub reconnects: u32,
    pub delivered_total: u64,
    pub failed_attempts_total: u64,
    pub rejected_total: u64,
    pub dropped_total: u64,
}

#[derive(Debug, Default)]
struct PublishStats {
    last_publish_at: Option<DateTime<Utc>>,
    last_delivery_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    delivered_total: u64,
    failed_attempts_total: u64,
    rejected_total: u64,
}

impl PublishStats {
    fn apply(&mut self, outcome: PublishOutcome) {
        match outcome {
            PublishOutcome::Accepted { at, .. } => {
                self.last_publish_at = Some(at);
            }
            PublishOutcome::Delivered { at, .. } => {
                self.last_publish_at = Some(at);
                self.last_delivery_at = Some(at);
                self.delivered_total += 1;
            }
            PublishOutcome::Failed { error, .. } => {
                self.last_error = Some(sanitize_error_message(&error));
                self.failed_attempts_total += 1;
            }
            PublishOutcome::Rejected { error, .. } => {
                self.last_error = Some(sanitize_error_message(&error));
                self.rejected_total += 1;
            }
        }
    }
}

/// Aggregates connection, queue and publish statistics
pub struct HealthReporter {
    connection: Arc<ConnectionManager>,
    queue: Arc<OfflineQueue>,
    stats: SharedStats,
}

impl HealthReporter {
    /// Create a reporter and the recorder that feeds it
    pub fn new(connection: Arc<ConnectionManager>, queue: Arc<OfflineQueue>) -> (Self, HealthRecorder) {
        let stats = SharedStats::default();
        let reporter = Self {
            connection,
            queue,
            stats: stats.clone(),
        };
        (reporter, HealthRecorder { stats })
    }

    /// Current health.
    ///
    /// Outcomes recorded before this call are always reflected.
    pub fn snapshot(&self) -> HealthSnapshot {
        let stats = lock_stats(&self.stats);

        let state = self.connection.current_state();
        let connected = state.is_connected();

        HealthSnapshot {
            status: if connected {
                HealthStatus::Healthy
            } else {
                HealthStatus::Degraded
            },
            connected,
            state,
            queue_depth: self.queue.len(),
            queue_capacity: self.queue.capacity(),
            last_publish_at: stats.last_publish_at,
            last_delivery_at: stats.last_delivery_at,
            last_error: stats.last_error.clone(),
            reconnects: self.connection.reconnects(),
            delivered_total: stats.delivered_total,
            failed_attempts_total: stats.failed_attempts_total,
            rejected_total: stats.rejected_total,
            dropped_total: self.queue.dropped_total(),
        }
    }
}
