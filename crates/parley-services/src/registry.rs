//! Connection registry — the single source of truth for live links.
//!
//! Tracks which sockets are live, what display name each remote
//! declared, and which endpoints have already been dialed or accepted.
//! Shared between the accept path, every link reader, and the command
//! dispatch path; all operations are safe without external locking.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use parley_core::wire::endpoint_key_of;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;

/// Identifier for one live link, unique for the process lifetime.
pub type LinkId = u64;

/// State for one live link. The read half is owned by the link's
/// reader task; the write half lives here so broadcast and the HELLO
/// send can reach it.
pub struct LinkEntry {
    /// Remote socket address.
    pub addr: SocketAddr,
    /// Remote display name, once its HELLO arrives.
    pub name: Option<String>,
    /// Shared write half of the link.
    pub writer: Arc<Mutex<OwnedWriteHalf>>,
}

/// The registry. Cheap to clone; all clones share state.
///
/// Endpoint keys are sticky: closing a link removes the link and its
/// name mapping but leaves the key in the known set. Only a process
/// restart makes an endpoint dialable again.
#[derive(Clone, Default)]
pub struct LinkRegistry {
    links: Arc<DashMap<LinkId, LinkEntry>>,
    known: Arc<DashSet<String>>,
    next_id: Arc<AtomicU64>,
}

impl LinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a link to the live set and mark its endpoint key known.
    /// Always succeeds.
    pub fn register(&self, addr: SocketAddr, writer: Arc<Mutex<OwnedWriteHalf>>) -> LinkId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.known.insert(endpoint_key_of(&addr));
        self.links.insert(
            id,
            LinkEntry {
                addr,
                name: None,
                writer,
            },
        );
        id
    }

    /// Mark an endpoint key known without a link. Returns true if the
    /// key was not known before.
    pub fn mark_known(&self, key: impl Into<String>) -> bool {
        self.known.insert(key.into())
    }

    /// Has this endpoint already been dialed or accepted?
    pub fn is_known(&self, key: &str) -> bool {
        self.known.contains(key)
    }

    /// Record the remote's declared name. Idempotent; a re-announcing
    /// peer just overwrites — last value wins.
    pub fn bind_name(&self, id: LinkId, name: impl Into<String>) {
        if let Some(mut entry) = self.links.get_mut(&id) {
            entry.name = Some(name.into());
        }
    }

    /// The remote's declared name, if its HELLO has arrived.
    pub fn name_of(&self, id: LinkId) -> Option<String> {
        self.links.get(&id).and_then(|e| e.name.clone())
    }

    /// Remove a link and its name mapping. The endpoint key stays in
    /// the known set. Returns false if the link was already gone.
    pub fn unregister(&self, id: LinkId) -> bool {
        self.links.remove(&id).is_some()
    }

    /// Snapshot of (address, name-or-placeholder) for display.
    pub fn list_live(&self) -> Vec<(SocketAddr, String)> {
        self.links
            .iter()
            .map(|e| {
                let name = e.name.clone().unwrap_or_else(|| "?".to_string());
                (e.addr, name)
            })
            .collect()
    }

    /// Snapshot of every live link's write half. Taken eagerly so the
    /// caller never awaits while holding a map shard.
    pub fn writers(&self) -> Vec<(LinkId, SocketAddr, Arc<Mutex<OwnedWriteHalf>>)> {
        self.links
            .iter()
            .map(|e| (*e.key(), e.addr, e.writer.clone()))
            .collect()
    }

    /// Ids of every live link, for shutdown draining.
    pub fn live_ids(&self) -> Vec<LinkId> {
        self.links.iter().map(|e| *e.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}
