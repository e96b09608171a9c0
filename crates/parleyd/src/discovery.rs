//! LAN peer discovery over UDP multicast.
//!
//! Two independent loops while running: the announce loop sends
//! `DISCOVER <name> <tcpPort>` to the group every few seconds, and the
//! listen loop receives announcements from others and reports them
//! through the discovery callback. Discovery never touches the
//! registry or any live link — the callback is its only coupling to
//! the node.
//!
//! If the multicast group cannot be joined at startup the feature is
//! disabled for the whole session: `start` returns the error, the
//! caller reports it once, and nothing retries.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use parley_core::wire::{
    Announce, ANNOUNCE_INTERVAL_SECS, DISCOVERY_PORT, MAX_DATAGRAM, MULTICAST_GROUP,
};

/// Invoked by the listen loop for every well-formed announcement:
/// (sender address, announced TCP port, announced name).
pub type FoundCallback = Arc<dyn Fn(IpAddr, u16, String) + Send + Sync>;

pub struct Discovery {
    running: Arc<AtomicBool>,
    announce_task: JoinHandle<()>,
    listen_task: JoinHandle<()>,
}

impl Discovery {
    /// Join the group and spawn both loops. Must be called from a
    /// tokio runtime context.
    pub fn start(username: &str, tcp_port: u16, on_found: FoundCallback) -> Result<Discovery> {
        let listen_socket =
            make_listener_socket().context("failed to join multicast group")?;
        let listen_socket =
            UdpSocket::from_std(listen_socket).context("failed to convert to tokio UdpSocket")?;

        let announce_socket =
            make_announce_socket().context("failed to create announce socket")?;
        let announce_socket =
            UdpSocket::from_std(announce_socket).context("failed to convert to tokio UdpSocket")?;

        let group: Ipv4Addr = MULTICAST_GROUP.parse().unwrap();
        let dest = SocketAddr::V4(SocketAddrV4::new(group, DISCOVERY_PORT));
        let payload = Announce::new(username, tcp_port).encode();

        let running = Arc::new(AtomicBool::new(true));
        let announce_task = tokio::spawn(announce_loop(
            announce_socket,
            dest,
            payload,
            running.clone(),
        ));
        let listen_task = tokio::spawn(listen_loop(listen_socket, on_found, running.clone()));

        tracing::info!(
            group = MULTICAST_GROUP,
            port = DISCOVERY_PORT,
            interval_secs = ANNOUNCE_INTERVAL_SECS,
            "discovery running"
        );

        Ok(Discovery {
            running,
            announce_task,
            listen_task,
        })
    }

    /// Stop both loops. Idempotent — stopping twice is a no-op.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.announce_task.abort();
        self.listen_task.abort();
        tracing::info!("discovery stopped");
    }
}

/// Send one announcement per interval until stopped.
async fn announce_loop(
    socket: UdpSocket,
    dest: SocketAddr,
    payload: String,
    running: Arc<AtomicBool>,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(ANNOUNCE_INTERVAL_SECS));
    while running.load(Ordering::SeqCst) {
        interval.tick().await;
        match socket.send_to(payload.as_bytes(), dest).await {
            Ok(n) => tracing::trace!(bytes = n, "announce sent"),
            Err(e) => tracing::warn!(error = %e, "announce send failed"),
        }
    }
}

/// Receive announcements until stopped. Anything that does not parse
/// as a well-formed announcement is dropped without comment —
/// discovery is best-effort and a malformed datagram from a peer must
/// never become an error.
async fn listen_loop(socket: UdpSocket, on_found: FoundCallback, running: Arc<AtomicBool>) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    while running.load(Ordering::SeqCst) {
        let (len, peer_addr) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "recv_from failed");
                continue;
            }
        };

        let payload = match std::str::from_utf8(&buf[..len]) {
            Ok(s) => s.trim(),
            Err(_) => {
                tracing::trace!("non-UTF-8 datagram dropped");
                continue;
            }
        };

        match Announce::parse(payload) {
            Some(announce) => on_found(peer_addr.ip(), announce.tcp_port, announce.name),
            None => tracing::trace!("unrecognized datagram dropped"),
        }
    }
}

/// Create the UDP socket joined to the discovery group. Reuse-address
/// so several nodes on one host can share the port.
fn make_listener_socket() -> Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;

    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;

    let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DISCOVERY_PORT);
    socket.bind(&bind_addr.into()).context("bind()")?;

    let group: Ipv4Addr = MULTICAST_GROUP.parse().unwrap();
    socket
        .join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)
        .context("IP_ADD_MEMBERSHIP")?;

    Ok(socket.into())
}

/// Create a UDP socket suitable for sending to the group.
fn make_announce_socket() -> Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;

    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;
    // TTL 1 — announcements stay on the local segment
    socket
        .set_multicast_ttl_v4(1)
        .context("IP_MULTICAST_TTL")?;

    socket
        .bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0).into())
        .context("bind()")?;

    Ok(socket.into())
}
