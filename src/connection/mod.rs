//! Broker connection manager
//!
//! Owns the single logical broker session and its lifecycle. A supervisor
//! task drives `Connecting → Connected`, watches the live session, and runs
//! the reconnect cycle with exponential backoff after failures. The current
//! state is published on a `watch` channel so the drain loop and health
//! reporter can observe it without locking.

pub mod backoff;
pub mod state_machine;

use crate::config::GatewayConfig;
use crate::telemetry::{Qos, TelemetryMessage};
use crate::transport::{Connector, Session, SessionError};
use backoff::BackoffPolicy;
use serde::Serialize;
use state_machine::{
    can_publish, determine_next_state, failures_after_loss, log_state_transition,
    should_attempt_reconnection, ConnectionEvent, ReconnectionDecision,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Reason carried by the permanent failure state for unusable configuration
pub const CONFIGURATION_FAILURE: &str = "configuration";

/// Observable connection lifecycle state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed(String),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Short label for logs and health output
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed(_) => "failed",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Failed(reason) => write!(f, "failed ({reason})"),
            other => f.write_str(other.label()),
        }
    }
}

/// Broker confirmation for one send
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ack {
    pub qos: Qos,
    pub latency: Duration,
}

/// Why a send did not complete
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SendError {
    #[error("Not connected - current state: {state}")]
    NotConnected { state: ConnectionState },
    #[error("Connection lost during send: {0}")]
    ConnectionLost(String),
    #[error("No broker acknowledgment within {0:?}")]
    AckTimeout(Duration),
    #[error("Broker rejected message: {0}")]
    Rejected(String),
}

/// Why the manager could not start or reach the broker
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConnectError {
    #[error("Connection disabled by invalid configuration: {0}")]
    Configuration(String),
    #[error("Not connected within {0:?} - current state: {1}")]
    Timeout(Duration, ConnectionState),
    #[error("Connection manager stopped")]
    Stopped,
}

/// Timing parameters for the connection lifecycle
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSettings {
    pub backoff: BackoffPolicy,
    /// Bound on one handshake attempt
    pub connect_timeout: Duration,
    /// Bound on a single send waiting for its acknowledgment
    pub ack_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            connect_timeout: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(10),
        }
    }
}

impl ConnectionSettings {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            backoff: config.backoff.clone(),
            connect_timeout: Duration::from_secs(config.mqtt.connect_timeout_secs),
            ack_timeout: Duration::from_millis(config.mqtt.ack_timeout_ms),
        }
    }
}

/// Owns the broker session and its reconnect supervisor
pub struct ConnectionManager {
    connector: Option<Arc<dyn Connector>>,
    misconfiguration: Option<String>,
    settings: ConnectionSettings,
    state_tx: watch::Sender<ConnectionState>,
    session: RwLock<Option<Arc<dyn Session>>>,
    shutdown_tx: watch::Sender<bool>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    reconnects: AtomicU32,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, settings: ConnectionSettings) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            connector: Some(connector),
            misconfiguration: None,
            settings,
            state_tx,
            session: RwLock::new(None),
            shutdown_tx,
            supervisor: Mutex::new(None),
            reconnects: AtomicU32::new(0),
        }
    }

    /// Manager for a gateway whose broker configuration is unusable.
    ///
    /// Starts and stays in `Failed("configuration")`; `connect()` refuses.
    pub fn misconfigured(reason: impl Into<String>, settings: ConnectionSettings) -> Self {
        let reason = reason.into();
        error!("Broker configuration rejected: {}", reason);
        let (state_tx, _) =
            watch::channel(ConnectionState::Failed(CONFIGURATION_FAILURE.to_string()));
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            connector: None,
            misconfiguration: Some(reason),
            settings,
            state_tx,
            session: RwLock::new(None),
            shutdown_tx,
            supervisor: Mutex::new(None),
            reconnects: AtomicU32::new(0),
        }
    }

    pub fn current_state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    /// Receiver that observes every state change
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state_tx.borrow().is_connected()
    }

    /// Completed `Reconnecting → Connected` cycles
    pub fn reconnects(&self) -> u32 {
        self.reconnects.load(Ordering::Relaxed)
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Start the connection supervisor.
    ///
    /// Returns once the manager has entered `Connecting`; the handshake and
    /// any retries proceed in the background. Calling it while the
    /// supervisor is already running is a no-op.
    pub fn connect(self: &Arc<Self>) -> Result<(), ConnectError> {
        let Some(connector) = self.connector.clone() else {
            let reason = self
                .misconfiguration
                .clone()
                .unwrap_or_else(|| CONFIGURATION_FAILURE.to_string());
            return Err(ConnectError::Configuration(reason));
        };

        let mut supervisor = self.supervisor.lock().unwrap_or_else(PoisonError::into_inner);
        if supervisor.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("Connection supervisor already running");
            return Ok(());
        }

        self.shutdown_tx.send_replace(false);
        self.transition(ConnectionEvent::ConnectRequested);
        info!(endpoint = %connector.endpoint(), "Connecting to broker");

        let manager = Arc::clone(self);
        let shutdown_rx = self.shutdown_tx.subscribe();
        *supervisor = Some(tokio::spawn(async move {
            manager.run_supervisor(connector, shutdown_rx).await;
        }));
        Ok(())
    }

    /// Wait until the manager reports `Connected`
    pub async fn wait_until_connected(&self, timeout: Duration) -> Result<(), ConnectError> {
        let mut state_rx = self.subscribe();
        let waited = tokio::time::timeout(timeout, state_rx.wait_for(|s| s.is_connected())).await;
        match waited {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(ConnectError::Stopped),
            Err(_) => Err(ConnectError::Timeout(timeout, self.current_state())),
        }
    }

    /// Send one message over the live session.
    ///
    /// Never blocks waiting for a connection: outside `Connected` it fails
    /// fast with [`SendError::NotConnected`]. A transport failure moves the
    /// manager to `Reconnecting` before the error is returned.
    pub async fn send(&self, message: &TelemetryMessage) -> Result<Ack, SendError> {
        let state = self.current_state();
        if !can_publish(&state) {
            return Err(SendError::NotConnected { state });
        }
        let session = self
            .session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(session) = session else {
            return Err(SendError::NotConnected { state });
        };

        let payload = message
            .encode_payload()
            .map_err(|e| SendError::Rejected(format!("payload encoding failed: {e}")))?;

        let started = Instant::now();
        let published = tokio::time::timeout(
            self.settings.ack_timeout,
            session.publish(message.topic(), payload, message.qos()),
        )
        .await;

        match published {
            Ok(Ok(())) => Ok(Ack {
                qos: message.qos(),
                latency: started.elapsed(),
            }),
            Ok(Err(SessionError::Rejected(reason))) => Err(SendError::Rejected(reason)),
            Ok(Err(SessionError::ConnectionLost(reason) | SessionError::HandshakeFailed(reason))) => {
                self.mark_session_lost(&reason);
                Err(SendError::ConnectionLost(reason))
            }
            Err(_) => Err(SendError::AckTimeout(self.settings.ack_timeout)),
        }
    }

    /// Stop the supervisor, close the session and enter `Disconnected`
    pub async fn disconnect(&self) {
        self.shutdown_tx.send_replace(true);

        let handle = self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut handle) = handle {
            match tokio::time::timeout(Duration::from_secs(2), &mut handle).await {
                Ok(Ok(())) => debug!("Connection supervisor stopped"),
                Ok(Err(e)) if !e.is_cancelled() => {
                    warn!("Connection supervisor ended with error: {}", e);
                }
                Ok(Err(_)) => {}
                Err(_) => {
                    warn!("Connection supervisor did not stop in time, aborting");
                    handle.abort();
                }
            }
        }

        let session = self
            .session
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(session) = session {
            session.disconnect().await;
        }

        self.transition(ConnectionEvent::DisconnectRequested);
        info!("Broker connection closed");
    }

    /// Apply an event through the state machine; returns whether state changed
    fn transition(&self, event: ConnectionEvent) -> bool {
        self.state_tx.send_if_modified(|state| {
            match determine_next_state(state, event) {
                Some(next) if next != *state => {
                    log_state_transition(state, &next);
                    *state = next;
                    true
                }
                _ => false,
            }
        })
    }

    fn mark_session_lost(&self, reason: &str) {
        self.transition(ConnectionEvent::SessionLost(reason.to_string()));
    }

    fn install_session(&self, session: Option<Arc<dyn Session>>) {
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = session;
    }

    async fn run_supervisor(
        self: Arc<Self>,
        connector: Arc<dyn Connector>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let policy = self.settings.backoff.clone();
        let mut failures = 0u32;
        let mut had_session = false;

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let attempt = tokio::time::timeout(self.settings.connect_timeout, connector.connect());
            let outcome = tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown_rx) => break,
                outcome = attempt => outcome,
            };

            let failure = match outcome {
                Ok(Ok(session)) => {
                    self.install_session(Some(Arc::clone(&session)));
                    if had_session {
                        self.reconnects.fetch_add(1, Ordering::Relaxed);
                    }
                    had_session = true;
                    self.transition(ConnectionEvent::HandshakeSucceeded);
                    let connected_at = Instant::now();

                    tokio::select! {
                        biased;
                        _ = shutdown_requested(&mut shutdown_rx) => break,
                        _ = session.closed() => {}
                    }

                    self.install_session(None);
                    self.mark_session_lost("session closed");
                    failures = failures_after_loss(connected_at.elapsed(), &policy, failures);
                    if failures == 0 {
                        info!("Session was stable, reconnecting immediately");
                        continue;
                    }

                    let decision = should_attempt_reconnection(
                        failures,
                        &policy,
                        *shutdown_rx.borrow(),
                        rand::random::<f64>(),
                    );
                    match decision {
                        ReconnectionDecision::Proceed { attempt, delay } => {
                            info!(
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                "Session dropped quickly, backing off"
                            );
                            if !interruptible_sleep(shutdown_rx.clone(), delay).await {
                                break;
                            }
                        }
                        ReconnectionDecision::AbortShutdownRequested => break,
                    }
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!(
                    "handshake timed out after {:?}",
                    self.settings.connect_timeout
                ),
            };

            failures = failures.saturating_add(1);
            self.transition(ConnectionEvent::HandshakeFailed(failure));

            let decision = should_attempt_reconnection(
                failures,
                &policy,
                *shutdown_rx.borrow(),
                rand::random::<f64>(),
            );
            match decision {
                ReconnectionDecision::Proceed { attempt, delay } => {
                    info!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying broker connection"
                    );
                    if !interruptible_sleep(shutdown_rx.clone(), delay).await {
                        break;
                    }
                    self.transition(ConnectionEvent::RetryStarted);
                }
                ReconnectionDecision::AbortShutdownRequested => break,
            }
        }

        info!("Connection supervisor stopped");
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
        if let Some(handle) = self
            .supervisor
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

/// Resolve once shutdown is signalled (or the signal sender is gone)
pub(crate) async fn shutdown_requested(shutdown_rx: &mut watch::Receiver<bool>) {
    let _ = shutdown_rx.wait_for(|stop| *stop).await;
}

/// Sleep unless shutdown is signalled first.
/// Returns true if the sleep completed, false if shutdown was requested.
pub(crate) async fn interruptible_sleep(
    mut shutdown_rx: watch::Receiver<bool>,
    delay: Duration,
) -> bool {
    tokio::select! {
        _ = shutdown_requested(&mut shutdown_rx) => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{Payload, SourceKind};
    use crate::testing::mocks::{ConnectBehavior, MockConnector, PublishBehavior};

    fn fast_settings() -> ConnectionSettings {
        ConnectionSettings {
            backoff: BackoffPolicy {
                base_delay_ms: 10,
                max_delay_ms: 40,
                jitter_ratio: 0.0,
                stable_connection_secs: 20,
            },
            connect_timeout: Duration::from_millis(200),
            ack_timeout: Duration::from_millis(100),
        }
    }

    fn message() -> TelemetryMessage {
        TelemetryMessage::new(
            "vehicle/gw-1/telemetry".to_string(),
            Payload::new(),
            Qos::AtLeastOnce,
            SourceKind::Manual,
        )
    }

    fn manager(connector: &Arc<MockConnector>) -> Arc<ConnectionManager> {
        Arc::new(ConnectionManager::new(connector.clone(), fast_settings()))
    }

    #[test]
    fn test_initial_state_is_disconnected() {
        let connector = Arc::new(MockConnector::new());
        let manager = manager(&connector);
        assert_eq!(manager.current_state(), ConnectionState::Disconnected);
        assert_eq!(manager.reconnects(), 0);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(
            ConnectionState::Failed("refused".to_string()).to_string(),
            "failed (refused)"
        );
    }

    #[tokio::test]
    async fn test_connect_reaches_connected() {
        let connector = Arc::new(MockConnector::new());
        let manager = manager(&connector);

        manager.connect().unwrap();
        manager
            .wait_until_connected(Duration::from_secs(1))
            .await
            .unwrap();

        assert!(manager.is_connected());
        assert_eq!(connector.connect_attempts(), 1);
        manager.disconnect().await;
        assert_eq!(manager.current_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_send_while_disconnected_fails_fast() {
        let connector = Arc::new(MockConnector::new());
        let manager = manager(&connector);

        let result = manager.send(&message()).await;

        assert_eq!(
            result,
            Err(SendError::NotConnected {
                state: ConnectionState::Disconnected
            })
        );
        assert!(connector.delivered().is_empty());
    }

    #[tokio::test]
    async fn test_refused_handshake_retries_until_accepted() {
        let connector = Arc::new(MockConnector::new());
        connector.script_connect(ConnectBehavior::Refuse("not authorized".to_string()));
        connector.script_connect(ConnectBehavior::Refuse("not authorized".to_string()));
        let manager = manager(&connector);

        manager.connect().unwrap();
        manager
            .wait_until_connected(Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(connector.connect_attempts(), 3);
        manager.disconnect().await;
    }

    #[tokio::test]
    async fn test_unreachable_broker_reports_failed() {
        let connector = Arc::new(MockConnector::new());
        connector.refuse_connections(true);
        let manager = manager(&connector);
        let mut states = manager.subscribe();

        manager.connect().unwrap();
        let reached = tokio::time::timeout(
            Duration::from_secs(1),
            states.wait_for(|s| matches!(s, ConnectionState::Failed(_))),
        )
        .await
        .map(|observed| observed.is_ok());

        assert!(matches!(reached, Ok(true)));
        manager.disconnect().await;
        assert_eq!(manager.current_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_session_loss_moves_to_reconnecting_and_recovers() {
        let connector = Arc::new(MockConnector::new());
        let manager = manager(&connector);
        manager.connect().unwrap();
        manager
            .wait_until_connected(Duration::from_secs(1))
            .await
            .unwrap();

        connector.drop_session();

        let recovered = tokio::time::timeout(Duration::from_secs(1), async {
            while manager.reconnects() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(recovered.is_ok(), "manager should reconnect after session loss");
        assert!(manager.is_connected());
        assert_eq!(manager.reconnects(), 1);
        assert_eq!(connector.connect_attempts(), 2);
        manager.disconnect().await;
    }

    fn second_scale_settings() -> ConnectionSettings {
        ConnectionSettings {
            backoff: BackoffPolicy {
                base_delay_ms: 1000,
                max_delay_ms: 32_000,
                jitter_ratio: 0.0,
                stable_connection_secs: 20,
            },
            connect_timeout: Duration::from_secs(5),
            ack_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sessions_dropping_quickly_escalate_reconnect_delay() {
        let connector = Arc::new(MockConnector::new());
        let manager = Arc::new(ConnectionManager::new(connector.clone(), second_scale_settings()));
        let mut states = manager.subscribe();

        manager.connect().unwrap();
        let mut connected_at = Vec::new();
        for _ in 0..7 {
            states.wait_for(|s| s.is_connected()).await.unwrap();
            connected_at.push(tokio::time::Instant::now());
            connector.drop_session();
            states.wait_for(|s| !s.is_connected()).await.unwrap();
        }

        let gaps: Vec<u128> = connected_at
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).as_millis())
            .collect();
        assert_eq!(gaps, vec![1000, 2000, 4000, 8000, 16_000, 32_000]);
        assert_eq!(manager.reconnects(), 6);
        manager.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stable_session_loss_reconnects_without_delay() {
        let connector = Arc::new(MockConnector::new());
        let manager = Arc::new(ConnectionManager::new(connector.clone(), second_scale_settings()));
        let mut states = manager.subscribe();

        manager.connect().unwrap();
        states.wait_for(|s| s.is_connected()).await.unwrap();
        connector.drop_session();
        states.wait_for(|s| !s.is_connected()).await.unwrap();
        states.wait_for(|s| s.is_connected()).await.unwrap();

        tokio::time::sleep(Duration::from_secs(21)).await;
        let dropped_at = tokio::time::Instant::now();
        connector.drop_session();
        states.wait_for(|s| !s.is_connected()).await.unwrap();
        states.wait_for(|s| s.is_connected()).await.unwrap();

        assert!(dropped_at.elapsed() < Duration::from_millis(100));
        assert_eq!(manager.reconnects(), 2);
        manager.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_handshake_times_out_and_retries() {
        let connector = Arc::new(MockConnector::new());
        connector.script_connect(ConnectBehavior::Hang);
        let manager = manager(&connector);
        let mut states = manager.subscribe();

        manager.connect().unwrap();
        let failed = states
            .wait_for(|s| matches!(s, ConnectionState::Failed(_)))
            .await
            .unwrap()
            .clone();

        match failed {
            ConnectionState::Failed(reason) => {
                assert!(reason.starts_with("handshake timed out"), "unexpected reason: {reason}");
            }
            other => panic!("expected a failed state, got {other:?}"),
        }

        manager
            .wait_until_connected(Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(connector.connect_attempts(), 2);
        manager.disconnect().await;
    }

    #[tokio::test]
    async fn test_send_confirms_delivery() {
        let connector = Arc::new(MockConnector::new());
        let manager = manager(&connector);
        manager.connect().unwrap();
        manager
            .wait_until_connected(Duration::from_secs(1))
            .await
            .unwrap();

        let ack = manager.send(&message()).await.unwrap();

        assert_eq!(ack.qos, Qos::AtLeastOnce);
        assert_eq!(connector.delivered().len(), 1);
        manager.disconnect().await;
    }

    #[tokio::test]
    async fn test_connection_lost_mid_send_flips_state() {
        let connector = Arc::new(MockConnector::new());
        connector.script_publish(PublishBehavior::LoseConnection);
        let manager = manager(&connector);
        manager.connect().unwrap();
        manager
            .wait_until_connected(Duration::from_secs(1))
            .await
            .unwrap();

        let result = manager.send(&message()).await;

        assert!(matches!(result, Err(SendError::ConnectionLost(_))));
        assert!(!manager.is_connected());
        assert!(connector.delivered().is_empty());
        manager.disconnect().await;
    }

    #[tokio::test]
    async fn test_withheld_ack_times_out() {
        let connector = Arc::new(MockConnector::new());
        connector.script_publish(PublishBehavior::WithholdAck);
        let manager = manager(&connector);
        manager.connect().unwrap();
        manager
            .wait_until_connected(Duration::from_secs(1))
            .await
            .unwrap();

        let result = manager.send(&message()).await;

        assert_eq!(result, Err(SendError::AckTimeout(Duration::from_millis(100))));
        assert!(manager.is_connected());
        manager.disconnect().await;
    }

    #[tokio::test]
    async fn test_misconfigured_manager_never_connects() {
        let manager = Arc::new(ConnectionManager::misconfigured(
            "certificate missing",
            ConnectionSettings::default(),
        ));

        let result = manager.connect();

        assert!(matches!(result, Err(ConnectError::Configuration(_))));
        assert_eq!(
            manager.current_state(),
            ConnectionState::Failed(CONFIGURATION_FAILURE.to_string())
        );

        manager.disconnect().await;
        assert_eq!(
            manager.current_state(),
            ConnectionState::Failed(CONFIGURATION_FAILURE.to_string())
        );
    }

    #[tokio::test]
    async fn test_connect_is_idempotent_while_running() {
        let connector = Arc::new(MockConnector::new());
        let manager = manager(&connector);
        manager.connect().unwrap();
        manager.connect().unwrap();
        manager
            .wait_until_connected(Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(connector.connect_attempts(), 1);
        manager.disconnect().await;
    }

    #[tokio::test]
    async fn test_interruptible_sleep_completes() {
        let (_tx, rx) = watch::channel(false);
        assert!(interruptible_sleep(rx, Duration::from_millis(5)).await);
    }

    #[tokio::test]
    async fn test_interruptible_sleep_interrupted() {
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let _ = tx.send(true);
        });
        assert!(!interruptible_sleep(rx, Duration::from_secs(5)).await);
    }
}
