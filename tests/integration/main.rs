//! Parley integration test harness.
//!
//! Tests here drive real nodes in-process over loopback sockets: an
//! accept loop per node, real TCP links, real reader tasks. The
//! multicast tests additionally need a working multicast route and
//! skip gracefully where the environment lacks one.

mod discovery;
mod links;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

use parleyd::node::Node;

// ── Harness ──────────────────────────────────────────────────────────────────

/// Spin up a node on an ephemeral loopback port with its accept loop
/// running. Returns the node and its listen port.
pub async fn spawn_node(username: &str) -> Result<(Arc<Node>, u16)> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context("failed to bind loopback listener")?;
    let port = listener.local_addr()?.port();
    let history_dir = std::env::temp_dir().join(format!("parley-it-{username}-{port}"));
    let node = Node::new(
        username.to_string(),
        port,
        IpAddr::V4(Ipv4Addr::LOCALHOST),
        history_dir,
    );
    tokio::spawn(node.clone().accept_loop(listener));
    Ok((node, port))
}

/// A raw TCP client speaking the line protocol directly, for driving a
/// node from the peer's side of the wire.
pub async fn raw_client(port: u16) -> Result<(Lines<BufReader<OwnedReadHalf>>, OwnedWriteHalf)> {
    let stream = TcpStream::connect(("127.0.0.1", port))
        .await
        .context("failed to connect raw client")?;
    let (read_half, write_half) = stream.into_split();
    Ok((BufReader::new(read_half).lines(), write_half))
}

/// Next line from a raw client, bounded. Panics on timeout so a hung
/// test fails with a message instead of running forever.
pub async fn next_line(lines: &mut Lines<BufReader<OwnedReadHalf>>) -> Option<String> {
    tokio::time::timeout(Duration::from_secs(2), lines.next_line())
        .await
        .expect("timed out waiting for a line")
        .expect("read failed")
}

/// Poll a condition for up to two seconds.
pub async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// The address of a node's single live link, for tests that need its
/// endpoint key.
pub fn sole_link_addr(node: &Node) -> SocketAddr {
    let live = node.registry().list_live();
    assert_eq!(live.len(), 1, "expected exactly one live link");
    live[0].0
}

// ── Smoke test ───────────────────────────────────────────────────────────────

/// An accepted link is greeted with the node's identity announce
/// before anything else — the accepting side does not wait for the
/// dialer to speak first.
#[tokio::test]
async fn accepted_link_is_greeted_with_hello() {
    let (_node, port) = spawn_node("ana").await.unwrap();
    let (mut lines, _write) = raw_client(port).await.unwrap();

    let greeting = next_line(&mut lines).await.expect("link closed early");
    assert_eq!(greeting, "HELLO ana");
}
