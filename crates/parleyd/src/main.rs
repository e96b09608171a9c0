//! parleyd — Parley peer-to-peer chat node.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;

use parley_core::config::ParleyConfig;
use parley_core::wire::{DISCOVERY_PORT, MULTICAST_GROUP};

use parleyd::discovery::{Discovery, FoundCallback};
use parleyd::node::Node;
use parleyd::repl;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = ParleyConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = ParleyConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        ParleyConfig::default()
    });

    // argv: parleyd [username] [port] — argv wins over config
    let mut args = std::env::args().skip(1);
    let username = args.next().unwrap_or(config.identity.username);
    let port: u16 = match args.next() {
        Some(v) => v.parse().context("port must be a number")?,
        None => config.network.listen_port,
    };

    // Bind failure is fatal: there is no fallback port, the node
    // cannot run as a server without its listening socket.
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to bind listen port {port}"))?;
    let listen_port = listener.local_addr()?.port();
    tracing::info!(username = %username, port = listen_port, "parleyd starting");
    println!("Peer {username} listening on port {listen_port}");

    let local_ip = probe_local_ip();
    tracing::info!(addr = %local_ip, "local interface address");

    let node = Node::new(username, listen_port, local_ip, config.history.dir);

    tokio::spawn(node.clone().accept_loop(listener));

    if config.discovery.enabled {
        let callback: FoundCallback = {
            let node = node.clone();
            Arc::new(move |host, port, name| node.on_peer_discovered(host, port, name))
        };
        match Discovery::start(node.username(), listen_port, callback) {
            Ok(discovery) => {
                println!(
                    "Discovery enabled (multicast {MULTICAST_GROUP}:{DISCOVERY_PORT}). \
                     Use /found to list peers."
                );
                node.attach_discovery(discovery);
            }
            // Reported once; the node runs on without discovery.
            Err(e) => eprintln!("Discovery unavailable (multicast blocked?): {e:#}"),
        }
    }

    {
        let node = node.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("termination signal received");
            node.shutdown().await;
        });
    }

    repl::run(node).await;

    Ok(())
}

/// Learn the primary interface address by pointing a throwaway UDP
/// socket at the discovery group; nothing is sent. Used to filter our
/// own multicast announcements. Loopback on failure.
fn probe_local_ip() -> IpAddr {
    let fallback = IpAddr::V4(Ipv4Addr::LOCALHOST);
    let probe = match std::net::UdpSocket::bind("0.0.0.0:0") {
        Ok(s) => s,
        Err(_) => return fallback,
    };
    if probe.connect((MULTICAST_GROUP, DISCOVERY_PORT)).is_err() {
        return fallback;
    }
    probe.local_addr().map(|a| a.ip()).unwrap_or(fallback)
}
