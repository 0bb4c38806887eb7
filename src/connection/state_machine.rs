//! Pure connection state transitions and reconnection decisions
//!
//! ```text
//! Disconnected ──connect()──▶ Connecting ──CONNACK──▶ Connected
//!                               │   ▲                     │
//!                     handshake │   │ retry after         │ session loss
//!                        failed ▼   │ backoff             ▼
//!                            Failed(reason) ◀──failed── Reconnecting
//! ```
//!
//! `disconnect()` moves any state to `Disconnected`, except the permanent
//! `Failed("configuration")` which only a restart clears.

use super::backoff::BackoffPolicy;
use super::{ConnectionState, CONFIGURATION_FAILURE};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Inputs that drive the connection state machine
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// `connect()` called
    ConnectRequested,
    /// CONNACK received
    HandshakeSucceeded,
    /// Handshake refused, timed out or transport failed
    HandshakeFailed(String),
    /// Backoff elapsed, next attempt starting
    RetryStarted,
    /// Transport error, keep-alive miss or broker DISCONNECT on a live session
    SessionLost(String),
    /// `disconnect()` called
    DisconnectRequested,
}

/// Determine the next state for an event (pure function)
///
/// Returns `None` when the event is not valid in the current state.
pub fn determine_next_state(
    current: &ConnectionState,
    event: ConnectionEvent,
) -> Option<ConnectionState> {
    use ConnectionState::*;

    if is_permanent_failure(current) {
        return None;
    }

    match (current, event) {
        (Disconnected, ConnectionEvent::ConnectRequested) => Some(Connecting),
        (Connecting | Reconnecting, ConnectionEvent::HandshakeSucceeded) => Some(Connected),
        (Connecting | Reconnecting, ConnectionEvent::HandshakeFailed(reason)) => {
            Some(Failed(reason))
        }
        (Failed(_), ConnectionEvent::RetryStarted) => Some(Connecting),
        (Connected | Reconnecting, ConnectionEvent::SessionLost(_)) => Some(Reconnecting),
        (_, ConnectionEvent::DisconnectRequested) => Some(Disconnected),
        _ => None,
    }
}

/// `Failed("configuration")` is never left while the process runs
pub fn is_permanent_failure(state: &ConnectionState) -> bool {
    matches!(state, ConnectionState::Failed(reason) if reason == CONFIGURATION_FAILURE)
}

/// Check if connection state allows publishing (pure function)
pub fn can_publish(state: &ConnectionState) -> bool {
    matches!(state, ConnectionState::Connected)
}

/// Decision result for reconnection attempts
#[derive(Debug, Clone, PartialEq)]
pub enum ReconnectionDecision {
    /// Wait `delay`, then start attempt `attempt`
    Proceed { attempt: u32, delay: Duration },
    /// Shutdown requested, stop retrying
    AbortShutdownRequested,
}

/// Decide whether and when to retry after `failures` consecutive failures
/// (pure function; retries are unbounded while the process runs)
pub fn should_attempt_reconnection(
    failures: u32,
    policy: &BackoffPolicy,
    shutdown_requested: bool,
    jitter_unit: f64,
) -> ReconnectionDecision {
    if shutdown_requested {
        return ReconnectionDecision::AbortShutdownRequested;
    }

    ReconnectionDecision::Proceed {
        attempt: failures + 1,
        delay: policy.delay_with_jitter(failures.max(1), jitter_unit),
    }
}

/// Failure count to carry into the reconnect cycle after a session loss.
///
/// A session that stayed up for the stable period resets the backoff. A
/// session that dropped quickly counts as one more failure.
pub fn failures_after_loss(connected_for: Duration, policy: &BackoffPolicy, failures: u32) -> u32 {
    if connected_for >= policy.stable_connection() {
        0
    } else {
        failures.saturating_add(1)
    }
}

/// Log connection state transition (pure logging function)
pub fn log_state_transition(from: &ConnectionState, to: &ConnectionState) {
    match (from, to) {
        (ConnectionState::Connecting, ConnectionState::Connected) => {
            info!("MQTT connection established");
        }
        (ConnectionState::Reconnecting, ConnectionState::Connected) => {
            info!("Reconnection successful");
        }
        (ConnectionState::Connected, ConnectionState::Reconnecting) => {
            warn!("MQTT session lost, reconnecting");
        }
        (_, ConnectionState::Failed(reason)) if reason == CONFIGURATION_FAILURE => {
            error!("Connection disabled by invalid configuration");
        }
        (_, ConnectionState::Failed(reason)) => {
            warn!("MQTT connection attempt failed: {}", reason);
        }
        _ => {
            debug!("MQTT connection state: {:?} -> {:?}", from, to);
        }
    }
}
