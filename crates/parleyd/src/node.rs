//! The connection manager — owns every live link from accept or dial
//! to close.
//!
//! One reader task per link; the accept loop, the readers, and the
//! command dispatch path all funnel into the shared registry. A link
//! leaves the live set only when its own reader ends (EOF, I/O error,
//! or global shutdown) — no other operation closes a link.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tokio::time::timeout;

use parley_core::wire::{endpoint_key, Frame, DIAL_TIMEOUT_SECS};
use parley_services::history::timestamp;
use parley_services::{FoundPeers, History, LinkId, LinkRegistry};

use crate::discovery::Discovery;

/// Result of an outbound dial.
#[derive(Debug)]
pub enum DialOutcome {
    /// A new link is up and its reader is running.
    Connected(SocketAddr),
    /// The endpoint was already dialed or accepted; no socket was
    /// attempted.
    AlreadyKnown,
}

pub struct Node {
    username: String,
    listen_port: u16,
    /// Primary interface address, for filtering our own multicast
    /// announcements.
    local_ip: IpAddr,
    history_dir: PathBuf,
    started_at_ms: u64,
    registry: LinkRegistry,
    found: FoundPeers,
    history: History,
    shutdown_tx: broadcast::Sender<()>,
    shut_down: AtomicBool,
    discovery: StdMutex<Option<Discovery>>,
}

impl Node {
    pub fn new(
        username: String,
        listen_port: u16,
        local_ip: IpAddr,
        history_dir: PathBuf,
    ) -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);
        let started_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Arc::new(Self {
            username,
            listen_port,
            local_ip,
            history_dir,
            started_at_ms,
            registry: LinkRegistry::new(),
            found: FoundPeers::new(),
            history: History::new(),
            shutdown_tx,
            shut_down: AtomicBool::new(false),
            discovery: StdMutex::new(None),
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    pub fn registry(&self) -> &LinkRegistry {
        &self.registry
    }

    pub fn found(&self) -> &FoundPeers {
        &self.found
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Print a line to the shared display channel and record it in the
    /// session history. Chat content and link up/down notices both go
    /// through here.
    pub fn display(&self, line: String) {
        println!("{line}");
        self.history.record(line);
    }

    // ── Inbound links ────────────────────────────────────────────────────────

    /// Accept inbound links until shutdown. Accept errors are logged
    /// and the loop keeps going; only shutdown ends it.
    pub async fn accept_loop(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        let mut shutdown = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("accept loop shutting down");
                    return Ok(());
                }
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            tracing::info!(%peer, "inbound link accepted");
                            self.clone().start_link(stream, peer);
                        }
                        Err(e) => tracing::warn!(error = %e, "accept failed"),
                    }
                }
            }
        }
    }

    /// Register a fresh socket, announce ourselves on it, and hand it
    /// to its reader. Both sides send HELLO first thing, so which side
    /// initiated the connection does not matter for name exchange.
    fn start_link(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let (read_half, write_half) = stream.into_split();
        let writer = Arc::new(Mutex::new(write_half));
        let id = self.registry.register(peer, writer.clone());

        let hello = Frame::Hello(self.username.clone()).encode();
        tokio::spawn(async move {
            if let Err(e) = send_line(&writer, &hello).await {
                tracing::debug!(%peer, error = %e, "hello send failed");
            }
            self.link_reader(id, read_half, peer).await;
        });
    }

    // ── Outbound links ───────────────────────────────────────────────────────

    /// Dial a peer. An endpoint that is already known is not re-dialed;
    /// a failed connect marks nothing known, so a later retry is
    /// allowed.
    pub async fn dial(self: Arc<Self>, host: &str, port: u16) -> Result<DialOutcome> {
        let key = endpoint_key(host, port);
        if self.registry.is_known(&key) {
            return Ok(DialOutcome::AlreadyKnown);
        }

        let stream = timeout(
            Duration::from_secs(DIAL_TIMEOUT_SECS),
            TcpStream::connect((host, port)),
        )
        .await
        .with_context(|| format!("timed out connecting to {key}"))?
        .with_context(|| format!("failed to connect to {key}"))?;

        let peer = stream.peer_addr().context("peer address unavailable")?;
        // The requested spelling dedups as well as the resolved address.
        self.registry.mark_known(key);
        tracing::info!(%peer, "outbound link established");
        self.start_link(stream, peer);
        Ok(DialOutcome::Connected(peer))
    }

    // ── Per-link reader ──────────────────────────────────────────────────────

    /// Read newline-delimited frames until the stream ends. This is
    /// the only path that removes a link from the live set outside of
    /// shutdown draining.
    async fn link_reader(self: Arc<Self>, id: LinkId, read_half: OwnedReadHalf, peer: SocketAddr) {
        let mut shutdown = self.shutdown_tx.subscribe();
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        loop {
            line.clear();
            tokio::select! {
                _ = shutdown.recv() => break,
                result = reader.read_line(&mut line) => match result {
                    Ok(0) => break,
                    Ok(_) => {
                        let frame = Frame::decode(line.trim_end_matches(['\r', '\n']));
                        self.handle_frame(id, peer, frame);
                    }
                    Err(e) => {
                        tracing::debug!(%peer, error = %e, "link read failed");
                        break;
                    }
                }
            }
        }

        let name = self.registry.name_of(id).unwrap_or_else(|| "?".to_string());
        if self.registry.unregister(id) && !self.shut_down.load(Ordering::SeqCst) {
            self.display(format!("[{}] {name} disconnected ({peer})", timestamp()));
        }
    }

    fn handle_frame(&self, id: LinkId, peer: SocketAddr, frame: Frame) {
        match frame {
            Frame::Hello(name) => {
                self.registry.bind_name(id, name.clone());
                self.display(format!("[{}] {name} connected ({peer})", timestamp()));
            }
            Frame::Msg(text) => {
                let name = self.attribution(id);
                self.display(format!("[{}] {name}: {text}", timestamp()));
            }
            Frame::Raw(raw) => {
                let name = self.attribution(id);
                self.display(format!("[{}] {name}: {raw}", timestamp()));
            }
        }
    }

    fn attribution(&self, id: LinkId) -> String {
        self.registry
            .name_of(id)
            .unwrap_or_else(|| "unknown".to_string())
    }

    // ── Broadcast ────────────────────────────────────────────────────────────

    /// Send a chat line to every live link. Fire-and-forget per
    /// recipient: a failed send is logged and the dead link's own
    /// reader tears it down; the remaining links still receive.
    pub async fn broadcast(&self, text: &str) {
        let line = Frame::Msg(text.to_string()).encode();
        for (id, peer, writer) in self.registry.writers() {
            if let Err(e) = send_line(&writer, &line).await {
                tracing::debug!(link = id, %peer, error = %e, "broadcast send failed");
            }
        }
    }

    // ── Discovery callback ───────────────────────────────────────────────────

    /// Target of the discovery listener. Filters our own announcements
    /// and upserts the found table; never touches the registry or any
    /// live link.
    pub fn on_peer_discovered(&self, host: IpAddr, port: u16, name: String) {
        if self.is_self_announcement(host, port) {
            tracing::trace!(%host, port, "ignoring own announcement");
            return;
        }
        tracing::debug!(%host, port, name = %name, "peer discovered");
        self.found.upsert(endpoint_key(&host.to_string(), port), name);
    }

    fn is_self_announcement(&self, host: IpAddr, port: u16) -> bool {
        port == self.listen_port
            && (host.is_loopback() || host.is_unspecified() || host == self.local_ip)
    }

    pub fn attach_discovery(&self, discovery: Discovery) {
        *self
            .discovery
            .lock()
            .expect("discovery slot lock poisoned") = Some(discovery);
    }

    // ── Shutdown ─────────────────────────────────────────────────────────────

    /// Tear everything down exactly once, regardless of how
    /// termination was triggered. A second call is a no-op.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        println!("Shutting down...");

        if let Some(discovery) = self
            .discovery
            .lock()
            .expect("discovery slot lock poisoned")
            .take()
        {
            discovery.stop();
        }

        // Ends the accept loop and every link reader.
        let _ = self.shutdown_tx.send(());

        for (id, peer, writer) in self.registry.writers() {
            let mut w = writer.lock().await;
            if let Err(e) = w.shutdown().await {
                tracing::debug!(link = id, %peer, error = %e, "link close failed");
            }
        }
        for id in self.registry.live_ids() {
            self.registry.unregister(id);
        }

        match self
            .history
            .flush_to(&self.history_dir, &self.username, self.started_at_ms)
        {
            Ok(path) => println!("History saved to {}", path.display()),
            Err(e) => tracing::warn!(error = %e, "failed to save history"),
        }
        println!("Done. Goodbye!");
    }
}

/// Write one line plus the newline terminator to a shared write half.
async fn send_line(writer: &Arc<Mutex<OwnedWriteHalf>>, line: &str) -> std::io::Result<()> {
    let mut w = writer.lock().await;
    w.write_all(line.as_bytes()).await?;
    w.write_all(b"\n").await?;
    Ok(())
}
