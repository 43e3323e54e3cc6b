//! In-process event bus for observers of bot activity.
//!
//! Events go to whoever is subscribed at publish time. There is no backlog:
//! a subscriber that connects mid-pipeline only sees what comes after, and a
//! subscriber that falls too far behind loses the oldest events.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use openapi_server::models::{DeploymentStatusPayload, LogEventPayload};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::deploy::status::DeploymentStatus;
use crate::deploy::store::DeploymentStore;
use crate::sandbox::BotIdentity;

/// Default number of events buffered per subscriber
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Kind of a log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Info,
    Output,
    Error,
    Success,
}

impl LogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogKind::Info => "info",
            LogKind::Output => "output",
            LogKind::Error => "error",
            LogKind::Success => "success",
        }
    }
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A log line about one bot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub identity: BotIdentity,
    pub message: String,
    pub kind: LogKind,
    pub timestamp: DateTime<Utc>,
}

/// A status change of one bot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub identity: BotIdentity,
    pub status: DeploymentStatus,
    pub progress: u8,
}

/// Everything observers can receive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotEvent {
    Log(LogEvent),
    DeploymentStatus(StatusEvent),
}

impl BotEvent {
    /// Event name on the wire
    pub fn name(&self) -> &'static str {
        match self {
            BotEvent::Log(_) => "log",
            BotEvent::DeploymentStatus(_) => "deploymentStatus",
        }
    }

    pub fn identity(&self) -> &BotIdentity {
        match self {
            BotEvent::Log(e) => &e.identity,
            BotEvent::DeploymentStatus(e) => &e.identity,
        }
    }

    /// JSON body of the event
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            BotEvent::Log(e) => serde_json::to_string(&LogEventPayload {
                bot_name: e.identity.to_string(),
                message: e.message.clone(),
                kind: e.kind.to_string(),
                timestamp: e.timestamp,
            }),
            BotEvent::DeploymentStatus(e) => serde_json::to_string(&DeploymentStatusPayload {
                bot_name: e.identity.to_string(),
                status: e.status.to_string(),
                progress: e.progress,
            }),
        }
    }
}

/// Fans log and status events out to all subscribers
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BotEvent>,
    store: Arc<DeploymentStore>,
}

impl EventBus {
    pub fn new(store: Arc<DeploymentStore>, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, store }
    }

    /// Store the bus writes status through to
    pub fn store(&self) -> &Arc<DeploymentStore> {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BotEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn publish_log(&self, identity: &BotIdentity, message: impl Into<String>, kind: LogKind) {
        let message = message.into();
        debug!(bot = %identity, kind = %kind, "{}", message);
        self.send(BotEvent::Log(LogEvent {
            identity: identity.clone(),
            message,
            kind,
            timestamp: Utc::now(),
        }));
    }

    /// Write the status to the store, then broadcast it
    pub fn publish_status(&self, identity: &BotIdentity, status: DeploymentStatus, progress: u8) {
        let progress = progress.min(100);
        self.store.set_status(identity, status, progress);
        debug!(bot = %identity, status = %status, progress, "Deployment status changed");
        self.send(BotEvent::DeploymentStatus(StatusEvent {
            identity: identity.clone(),
            status,
            progress,
        }));
    }

    /// Drop a bot's store entry and tell observers it is no longer deployed
    pub fn publish_removed(&self, identity: &BotIdentity) {
        self.store.remove(identity);
        self.send(BotEvent::DeploymentStatus(StatusEvent {
            identity: identity.clone(),
            status: DeploymentStatus::NotDeployed,
            progress: 0,
        }));
    }

    fn send(&self, event: BotEvent) {
        // Err only means nobody is listening
        let _ = self.tx.send(event);
    }
}
