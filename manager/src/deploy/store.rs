//! In-memory deployment state store

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;

use crate::deploy::status::{DeploymentStatus, StatusEntry};
use crate::sandbox::BotIdentity;

/// One entry per bot; absent means `not-deployed`.
///
/// Writes overwrite unconditionally (last writer wins). The orchestrator is
/// the only writer, through the event bus.
#[derive(Debug, Default)]
pub struct DeploymentStore {
    entries: RwLock<HashMap<BotIdentity, StatusEntry>>,
}

impl DeploymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the status of a bot, creating the entry if needed
    pub fn set_status(&self, identity: &BotIdentity, status: DeploymentStatus, progress: u8) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let entry = entries
            .entry(identity.clone())
            .or_insert_with(StatusEntry::not_deployed);
        entry.status = status;
        entry.progress = progress.min(100);
        entry.updated_at = Utc::now();
    }

    /// Record the build submitted for a bot
    pub fn set_build_id(&self, identity: &BotIdentity, build_id: Option<String>) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let entry = entries
            .entry(identity.clone())
            .or_insert_with(StatusEntry::not_deployed);
        entry.build_id = build_id;
    }

    /// Snapshot of a bot's entry, if any
    pub fn get(&self, identity: &BotIdentity) -> Option<StatusEntry> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(identity).cloned()
    }

    /// Snapshot of a bot's entry, `not-deployed` when absent
    pub fn status(&self, identity: &BotIdentity) -> StatusEntry {
        self.get(identity).unwrap_or_else(StatusEntry::not_deployed)
    }

    /// Snapshot of all entries, ordered by bot name
    pub fn list(&self) -> Vec<(BotIdentity, StatusEntry)> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut list: Vec<_> = entries
            .iter()
            .map(|(id, entry)| (id.clone(), entry.clone()))
            .collect();
        list.sort_by(|a, b| a.0.cmp(&b.0));
        list
    }

    pub fn remove(&self, identity: &BotIdentity) -> Option<StatusEntry> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(identity)
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
