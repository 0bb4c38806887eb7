//! In-memory broker for testing
//!
//! [`MockConnector`] hands out [`MockSession`]s backed by a shared broker
//! record. Connect and publish outcomes can be scripted one call at a time,
//! and the live session can be dropped to simulate a lost network.

use crate::telemetry::Qos;
use crate::transport::{Connector, Session, SessionError};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;

/// Outcome of the next handshake
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectBehavior {
    Accept,
    Refuse(String),
    /// Never answer; the manager's connect timeout fires
    Hang,
}

/// Outcome of the next publish
#[derive(Debug, Clone, PartialEq)]
pub enum PublishBehavior {
    Ack,
    /// Network drops before the broker sees the message
    LoseConnection,
    /// Broker keeps the message unacknowledged until the session ends
    WithholdAck,
    Reject(String),
}

/// A message the mock broker acknowledged
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveredMessage {
    pub topic: String,
    pub payload: Value,
    pub qos: Qos,
}

#[derive(Default)]
struct BrokerState {
    delivered: Vec<DeliveredMessage>,
    connect_script: VecDeque<ConnectBehavior>,
    publish_script: VecDeque<PublishBehavior>,
    refuse_all: bool,
    connect_attempts: u32,
    publish_attempts: u32,
    current: Option<Arc<MockSession>>,
}

type SharedBroker = Arc<Mutex<BrokerState>>;

fn lock(broker: &SharedBroker) -> MutexGuard<'_, BrokerState> {
    broker.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scriptable connector backed by an in-memory broker
#[derive(Default)]
pub struct MockConnector {
    broker: SharedBroker,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refuse_connections(&self, refuse: bool) {
        lock(&self.broker).refuse_all = refuse;
    }

    /// Queue the outcome of the next unscripted handshake
    pub fn script_connect(&self, behavior: ConnectBehavior) {
        lock(&self.broker).connect_script.push_back(behavior);
    }

    /// Queue the outcome of the next unscripted publish
    pub fn script_publish(&self, behavior: PublishBehavior) {
        lock(&self.broker).publish_script.push_back(behavior);
    }

    /// Close the live session as if the network went away
    pub fn drop_session(&self) {
        let session = lock(&self.broker).current.take();
        if let Some(session) = session {
            session.close();
        }
    }

    pub fn has_live_session(&self) -> bool {
        lock(&self.broker)
            .current
            .as_ref()
            .is_some_and(|session| session.is_open())
    }

    pub fn delivered(&self) -> Vec<DeliveredMessage> {
        lock(&self.broker).delivered.clone()
    }

    pub fn delivered_payloads(&self) -> Vec<Value> {
        lock(&self.broker)
            .delivered
            .iter()
            .map(|m| m.payload.clone())
            .collect()
    }

    pub fn connect_attempts(&self) -> u32 {
        lock(&self.broker).connect_attempts
    }

    pub fn publish_attempts(&self) -> u32 {
        lock(&self.broker).publish_attempts
    }

    /// Poll until at least `count` messages were acknowledged
    pub async fn wait_for_deliveries(&self, count: usize, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            while lock(&self.broker).delivered.len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .is_ok()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Arc<dyn Session>, SessionError> {
        let behavior = {
            let mut broker = lock(&self.broker);
            broker.connect_attempts += 1;
            match broker.connect_script.pop_front() {
                Some(behavior) => behavior,
                None if broker.refuse_all => ConnectBehavior::Refuse("broker unavailable".to_string()),
                None => ConnectBehavior::Accept,
            }
        };

        match behavior {
            ConnectBehavior::Accept => {
                let session = Arc::new(MockSession::new(self.broker.clone()));
                lock(&self.broker).current = Some(session.clone());
                Ok(session)
            }
            ConnectBehavior::Refuse(reason) => Err(SessionError::HandshakeFailed(reason)),
            ConnectBehavior::Hang => {
                std::future::pending::<()>().await;
                Err(SessionError::HandshakeFailed("unreachable".to_string()))
            }
        }
    }

    fn endpoint(&self) -> String {
        "mock://broker".to_string()
    }
}

/// Session on the in-memory broker
pub struct MockSession {
    broker: SharedBroker,
    open: watch::Sender<bool>,
}

impl MockSession {
    fn new(broker: SharedBroker) -> Self {
        let (open, _) = watch::channel(true);
        Self { broker, open }
    }

    fn close(&self) {
        self.open.send_replace(false);
    }
}

#[async_trait]
impl Session for MockSession {
    async fn publish(&self, topic: &str, payload: Bytes, qos: Qos) -> Result<(), SessionError> {
        if !self.is_open() {
            return Err(SessionError::ConnectionLost("session closed".to_string()));
        }

        let behavior = {
            let mut broker = lock(&self.broker);
            broker.publish_attempts += 1;
            broker
                .publish_script
                .pop_front()
                .unwrap_or(PublishBehavior::Ack)
        };

        match behavior {
            PublishBehavior::Ack => {
                let payload = serde_json::from_slice(&payload)
                    .map_err(|e| SessionError::Rejected(e.to_string()))?;
                lock(&self.broker).delivered.push(DeliveredMessage {
                    topic: topic.to_string(),
                    payload,
                    qos,
                });
                Ok(())
            }
            PublishBehavior::LoseConnection => {
                self.close();
                Err(SessionError::ConnectionLost("connection reset".to_string()))
            }
            PublishBehavior::WithholdAck => {
                self.closed().await;
                Err(SessionError::ConnectionLost("session closed".to_string()))
            }
            PublishBehavior::Reject(reason) => Err(SessionError::Rejected(reason)),
        }
    }

    async fn closed(&self) {
        let mut open = self.open.subscribe();
        let _ = open.wait_for(|open| !*open).await;
    }

    fn is_open(&self) -> bool {
        *self.open.borrow()
    }

    async fn disconnect(&self) {
        self.close();
    }
}
