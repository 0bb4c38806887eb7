//! Bounded, ordered offline queue
//!
//! Holds every message that has been accepted but not yet confirmed by the
//! broker. Entries leave the queue in exactly two ways: confirmed delivery of
//! the front entry, or drop-oldest eviction when a scheduled message arrives
//! at a full queue. Manual messages never evict; they are refused with
//! [`QueueFull`] so the caller sees the backpressure.
//!
//! Producers (scheduler, manual requests) and the single consumer (drain loop)
//! share one mutex around the deque. The lock is never held across an await.

use crate::telemetry::{SourceKind, TelemetryMessage};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, warn};

/// A queued message plus its delivery bookkeeping
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    /// Queue-assigned, strictly increasing position
    pub sequence: u64,
    pub message: Arc<TelemetryMessage>,
    /// Number of dequeue-and-send cycles attempted so far
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

/// Manual submission refused because the queue is at capacity
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("Offline queue is full ({capacity} entries)")]
pub struct QueueFull {
    pub capacity: usize,
}

/// Result of a successful enqueue
#[derive(Debug, Clone, PartialEq)]
pub struct Enqueued {
    pub sequence: u64,
    /// Entry evicted to make room (scheduled submissions only)
    pub evicted: Option<QueueEntry>,
}

#[derive(Debug)]
struct QueueInner {
    entries: VecDeque<QueueEntry>,
    next_sequence: u64,
    dropped_total: u64,
}

/// Bounded FIFO of undelivered telemetry
#[derive(Debug)]
pub struct OfflineQueue {
    inner: Mutex<QueueInner>,
    capacity: usize,
    non_empty: Notify,
}

impl OfflineQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(QueueInner {
                entries: VecDeque::with_capacity(capacity.min(4096)),
                next_sequence: 1,
                dropped_total: 0,
            }),
            capacity,
            non_empty: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        // The queue state stays consistent even if a holder panicked mid-call,
        // since every mutation is a single VecDeque operation.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a message, applying the overflow policy for its source
    pub fn enqueue(&self, message: TelemetryMessage) -> Result<Enqueued, QueueFull> {
        let mut inner = self.lock();

        let mut evicted = None;
        if inner.entries.len() >= self.capacity {
            match message.source() {
                SourceKind::Manual => {
                    return Err(QueueFull {
                        capacity: self.capacity,
                    });
                }
                SourceKind::Scheduled => {
                    evicted = inner.entries.pop_front();
                    inner.dropped_total += 1;
                }
            }
        }

        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner.entries.push_back(QueueEntry {
            sequence,
            message: Arc::new(message),
            attempts: 0,
            enqueued_at: Utc::now(),
        });
        let depth = inner.entries.len();
        drop(inner);

        if let Some(ref dropped) = evicted {
            warn!(
                sequence = dropped.sequence,
                topic = %dropped.message.topic(),
                attempts = dropped.attempts,
                "Offline queue full, dropped oldest entry"
            );
        }
        debug!(sequence, depth, "Enqueued telemetry");

        self.non_empty.notify_one();
        Ok(Enqueued { sequence, evicted })
    }

    /// Copy of the front entry, if any
    pub fn peek_front(&self) -> Option<QueueEntry> {
        self.lock().entries.front().cloned()
    }

    /// Unconditionally remove the front entry
    pub fn remove_front(&self) -> Option<QueueEntry> {
        self.lock().entries.pop_front()
    }

    /// Remove the front entry only if it is still `sequence`.
    ///
    /// The drain loop uses this after a confirmed send: if the in-flight head
    /// was evicted meanwhile, nothing else may be removed in its place.
    pub fn remove_delivered(&self, sequence: u64) -> Option<QueueEntry> {
        let mut inner = self.lock();
        match inner.entries.front() {
            Some(front) if front.sequence == sequence => inner.entries.pop_front(),
            _ => None,
        }
    }

    /// Count a delivery attempt against the front entry, returning the new
    /// attempt count if `sequence` is still at the front
    pub fn record_attempt(&self, sequence: u64) -> Option<u32> {
        let mut inner = self.lock();
        match inner.entries.front_mut() {
            Some(front) if front.sequence == sequence => {
                front.attempts += 1;
                Some(front.attempts)
            }
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total entries evicted by the drop-oldest policy
    pub fn dropped_total(&self) -> u64 {
        self.lock().dropped_total
    }

    /// Suspend until at least one entry is queued.
    ///
    /// Intended for the single consumer; `notify_one` stores a permit when
    /// nobody is waiting, so an enqueue racing with this call is not lost.
    pub async fn wait_non_empty(&self) {
        loop {
            if !self.is_empty() {
                return;
            }
            self.non_empty.notified().await;
        }
    }
}
