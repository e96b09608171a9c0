//! Found-peers table — endpoints learned from LAN discovery.
//!
//! Populated only by the discovery listener, read for `/found` display
//! and as a convenience source for manual `/connect`. Entries are
//! never pruned; a re-announcing peer overwrites its own entry.

use std::sync::Arc;

use dashmap::DashMap;

/// Endpoint key (`host:port`) → last-announced display name.
#[derive(Clone, Default)]
pub struct FoundPeers {
    peers: Arc<DashMap<String, String>>,
}

impl FoundPeers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite. Last writer wins.
    pub fn upsert(&self, key: impl Into<String>, name: impl Into<String>) {
        self.peers.insert(key.into(), name.into());
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.peers.get(key).map(|n| n.clone())
    }

    /// Snapshot for display, sorted by endpoint key for stable output.
    pub fn snapshot(&self) -> Vec<(String, String)> {
        let mut entries: Vec<(String, String)> = self
            .peers
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        entries.sort();
        entries
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
