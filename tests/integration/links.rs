//! Link lifecycle: dial, name exchange, dedup, teardown, broadcast.

use tokio::io::AsyncWriteExt;

use parley_core::wire::endpoint_key_of;
use parleyd::node::DialOutcome;

use crate::{next_line, raw_client, sole_link_addr, spawn_node, wait_until};

/// B dials A; both sides auto-send HELLO; both registries end up
/// showing the other's name with no user action beyond the dial.
#[tokio::test]
async fn dial_exchanges_names_both_ways() {
    let (node_a, port_a) = spawn_node("ana").await.unwrap();
    let (node_b, _port_b) = spawn_node("bob").await.unwrap();

    match node_b.clone().dial("127.0.0.1", port_a).await.unwrap() {
        DialOutcome::Connected(_) => {}
        other => panic!("expected a connection, got {other:?}"),
    }

    wait_until("ana to learn bob's name", || {
        node_a.registry().list_live().iter().any(|(_, n)| n == "bob")
    })
    .await;
    wait_until("bob to learn ana's name", || {
        node_b.registry().list_live().iter().any(|(_, n)| n == "ana")
    })
    .await;
}

#[tokio::test]
async fn second_dial_to_same_endpoint_is_already_known() {
    let (_node_a, port_a) = spawn_node("ana").await.unwrap();
    let (node_b, _port_b) = spawn_node("bob").await.unwrap();

    match node_b.clone().dial("127.0.0.1", port_a).await.unwrap() {
        DialOutcome::Connected(_) => {}
        other => panic!("expected a connection, got {other:?}"),
    }
    wait_until("first link to register", || node_b.registry().len() == 1).await;

    match node_b.clone().dial("127.0.0.1", port_a).await.unwrap() {
        DialOutcome::AlreadyKnown => {}
        other => panic!("expected AlreadyKnown, got {other:?}"),
    }
    assert_eq!(node_b.registry().len(), 1, "no second socket was created");
}

#[tokio::test]
async fn dial_to_dead_port_fails_and_permits_retry() {
    let (node, _port) = spawn_node("ana").await.unwrap();

    // an ephemeral port we just closed — nothing is listening
    let dead_port = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    assert!(node.clone().dial("127.0.0.1", dead_port).await.is_err());
    // the failed attempt must not poison the endpoint
    assert!(!node
        .registry()
        .is_known(&format!("127.0.0.1:{dead_port}")));
    assert!(node.registry().is_empty());
}

/// EOF removes the link from the live set but its endpoint stays
/// known — a closed peer is not re-dialable within the session.
#[tokio::test]
async fn eof_unregisters_link_but_endpoint_stays_known() {
    let (node, port) = spawn_node("ana").await.unwrap();
    let (mut lines, write) = raw_client(port).await.unwrap();
    assert!(next_line(&mut lines).await.is_some()); // HELLO ana

    wait_until("link to register", || node.registry().len() == 1).await;
    let key = endpoint_key_of(&sole_link_addr(&node));

    drop(lines);
    drop(write);

    wait_until("link to unregister", || node.registry().is_empty()).await;
    assert!(node.registry().is_known(&key), "sticky dedup lost the key");
}

#[tokio::test]
async fn broadcast_reaches_every_live_link() {
    let (node, port) = spawn_node("ana").await.unwrap();

    let mut clients = Vec::new();
    for _ in 0..3 {
        let (mut lines, write) = raw_client(port).await.unwrap();
        assert_eq!(next_line(&mut lines).await.as_deref(), Some("HELLO ana"));
        clients.push((lines, write));
    }
    wait_until("all links to register", || node.registry().len() == 3).await;

    node.broadcast("oi tudo bem").await;

    for (lines, _write) in &mut clients {
        assert_eq!(next_line(lines).await.as_deref(), Some("MSG oi tudo bem"));
    }
}

/// One link dying mid-session must not cost the others their
/// delivery, and broadcasting at a dead link must not error.
#[tokio::test]
async fn broadcast_survives_a_dead_link() {
    let (node, port) = spawn_node("ana").await.unwrap();

    let (mut lines_a, write_a) = raw_client(port).await.unwrap();
    assert!(next_line(&mut lines_a).await.is_some());
    let (mut lines_b, _write_b) = raw_client(port).await.unwrap();
    assert!(next_line(&mut lines_b).await.is_some());
    wait_until("both links to register", || node.registry().len() == 2).await;

    // kill A abruptly; broadcast immediately, before and after the
    // node's reader has had a chance to notice
    drop(lines_a);
    drop(write_a);
    node.broadcast("first").await;
    wait_until("dead link to unregister", || node.registry().len() == 1).await;
    node.broadcast("second").await;

    assert_eq!(next_line(&mut lines_b).await.as_deref(), Some("MSG first"));
    assert_eq!(next_line(&mut lines_b).await.as_deref(), Some("MSG second"));
}

/// Inbound chat and raw lines are displayed with attribution and land
/// in the session history in arrival order.
#[tokio::test]
async fn inbound_lines_are_recorded_with_attribution() {
    let (node, port) = spawn_node("ana").await.unwrap();
    let (mut lines, mut write) = raw_client(port).await.unwrap();
    assert!(next_line(&mut lines).await.is_some());

    write.write_all(b"HELLO bob\n").await.unwrap();
    write.write_all(b"MSG oi tudo bem\n").await.unwrap();
    write.write_all(b"not a protocol line\n").await.unwrap();

    wait_until("all three lines to be recorded", || node.history().len() == 3).await;

    let history = node.history().snapshot();
    assert!(history[0].contains("bob connected"));
    assert!(history[1].ends_with("bob: oi tudo bem"));
    assert!(history[2].ends_with("bob: not a protocol line"));
}

#[tokio::test]
async fn shutdown_closes_live_links_and_is_idempotent() {
    let (node, port) = spawn_node("ana").await.unwrap();
    let (mut lines, _write) = raw_client(port).await.unwrap();
    assert!(next_line(&mut lines).await.is_some());
    wait_until("link to register", || node.registry().len() == 1).await;

    node.shutdown().await;
    node.shutdown().await; // second invocation must be a no-op

    assert!(node.registry().is_empty());
    // the peer sees the stream end
    assert_eq!(next_line(&mut lines).await, None);
}
