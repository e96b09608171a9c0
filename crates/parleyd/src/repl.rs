//! Interactive command loop.
//!
//! Reads stdin lines and dispatches them: slash commands operate the
//! node, anything else is a chat message broadcast to every live link
//! and echoed locally. Listing output (`/peers`, `/found`, `/history`)
//! is display-only and is not recorded in the session history.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use parley_services::history::timestamp;

use crate::node::{DialOutcome, Node};

/// Run until `/exit`, stdin EOF, or node shutdown.
pub async fn run(node: Arc<Node>) {
    let mut shutdown = node.subscribe_shutdown();
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if dispatch(&node, line.trim()).await {
                        break;
                    }
                }
                Ok(None) => {
                    // stdin closed — treat like /exit
                    node.shutdown().await;
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "stdin read failed");
                    node.shutdown().await;
                    break;
                }
            }
        }
    }
}

/// Handle one input line. Returns true when the loop should end.
async fn dispatch(node: &Arc<Node>, line: &str) -> bool {
    if line.is_empty() {
        return false;
    }

    if line.eq_ignore_ascii_case("/exit") {
        node.shutdown().await;
        return true;
    } else if line.eq_ignore_ascii_case("/peers") {
        print_peers(node);
    } else if line.eq_ignore_ascii_case("/found") {
        print_found(node);
    } else if line.eq_ignore_ascii_case("/history") {
        print_history(node);
    } else if let Some(args) = line.strip_prefix("/connect ") {
        connect(node, args).await;
    } else {
        node.broadcast(line).await;
        node.display(format!(
            "[{}] {} (you): {line}",
            timestamp(),
            node.username()
        ));
    }
    false
}

async fn connect(node: &Arc<Node>, args: &str) {
    let (host, port) = match parse_connect(args) {
        Some(target) => target,
        None => {
            println!("Usage: /connect <host> <port>  (e.g. /connect localhost 8082)");
            return;
        }
    };
    match node.clone().dial(&host, port).await {
        Ok(DialOutcome::Connected(peer)) => println!("Connected to {host}:{port} ({peer})"),
        Ok(DialOutcome::AlreadyKnown) => {
            println!("Already connected (or pending) to {host}:{port}")
        }
        Err(e) => eprintln!("Failed to connect to {host}:{port} -> {e:#}"),
    }
}

/// Parse `/connect` arguments: exactly a host and a numeric port.
fn parse_connect(args: &str) -> Option<(String, u16)> {
    let parts: Vec<&str> = args.split_whitespace().collect();
    match parts.as_slice() {
        [host, port] => port.parse().ok().map(|p| (host.to_string(), p)),
        _ => None,
    }
}

fn print_peers(node: &Node) {
    let live = node.registry().list_live();
    println!("Connected peers: {}", live.len());
    for (addr, name) in live {
        println!(" - {addr} [{name}]");
    }
}

fn print_found(node: &Node) {
    let found = node.found().snapshot();
    if found.is_empty() {
        println!("No peers found yet. (Enable discovery or wait for announcements)");
        return;
    }
    println!("Peers found on the LAN (host:port -> name):");
    for (key, name) in found {
        println!(" - {key} -> {name}");
    }
    println!("Use: /connect <host> <port>");
}

fn print_history(node: &Node) {
    let lines = node.history().snapshot();
    println!("=== Session history ({} msgs) ===", lines.len());
    for line in lines {
        println!("{line}");
    }
    println!("===============================================");
}
