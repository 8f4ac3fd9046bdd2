//! End-to-End Integration Tests for Nexus
//!
//! These verify the complete flow across layers:
//! 1. Registration with the in-process rendezvous
//! 2. Offer/answer/candidate relay between two client nodes
//! 3. Loopback channel establishment (both sides reach OPEN)
//! 4. Fan-out broadcast and tagged inbound delivery
//!
//! Run with: cargo test --test integration_e2e

use nexus_core::connection::local::{LoopbackEngineFactory, LoopbackNet};
use nexus_core::node::{ClientNode, NodeEvent, NodeHandle};
use nexus_core::signaling::{ClientRequest, Directory, Rendezvous, ServerEvent, SessionId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

/// Attach one in-process "socket" to the rendezvous: requests in, events out.
/// Dropping the request sender tears the session down, exactly like a socket
/// close would.
fn attach_session(
    rendezvous: Arc<Rendezvous>,
) -> (
    mpsc::UnboundedSender<ClientRequest>,
    mpsc::UnboundedReceiver<ServerEvent>,
) {
    let session = SessionId::new();
    let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
    let (request_tx, mut request_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(request) = request_rx.recv().await {
            if let Err(err) = rendezvous.handle(session, &outbox_tx, request) {
                let _ = outbox_tx.send(ServerEvent::Error {
                    message: err.to_string(),
                });
            }
        }
        rendezvous.disconnect(session);
    });
    (request_tx, outbox_rx)
}

struct Peer {
    handle: NodeHandle,
    events: mpsc::UnboundedReceiver<NodeEvent>,
}

fn spawn_peer(name: &str, net: &Arc<LoopbackNet>, rendezvous: &Arc<Rendezvous>) -> Peer {
    let (requests, server_events) = attach_session(rendezvous.clone());
    let factory = Arc::new(LoopbackEngineFactory::new(net.clone(), name));
    let (node, handle, events) = ClientNode::new(name, factory, requests, server_events);
    tokio::spawn(node.run());
    Peer { handle, events }
}

async fn wait_for(peer: &mut Peer, matches: impl Fn(&NodeEvent) -> bool) -> NodeEvent {
    timeout(WAIT, async {
        loop {
            let event = peer
                .events
                .recv()
                .await
                .expect("node event stream ended early");
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for node event")
}

async fn registered(peer: &mut Peer) {
    wait_for(peer, |e| matches!(e, NodeEvent::Registered { .. })).await;
}

async fn connected_pair(
    net: &Arc<LoopbackNet>,
    rendezvous: &Arc<Rendezvous>,
) -> (Peer, Peer) {
    let mut alice = spawn_peer("alice", net, rendezvous);
    let mut bob = spawn_peer("bob", net, rendezvous);
    registered(&mut alice).await;
    registered(&mut bob).await;

    alice.handle.call("bob");
    wait_for(&mut alice, |e| {
        matches!(e, NodeEvent::ChannelOpen { peer } if peer == "bob")
    })
    .await;
    wait_for(&mut bob, |e| {
        matches!(e, NodeEvent::ChannelOpen { peer } if peer == "alice")
    })
    .await;
    (alice, bob)
}

#[tokio::test]
async fn test_call_broadcast_and_single_delivery() {
    let net = Arc::new(LoopbackNet::new());
    let rendezvous = Arc::new(Rendezvous::new(Arc::new(Directory::new())));
    let (mut alice, mut bob) = connected_pair(&net, &rendezvous).await;

    alice.handle.broadcast("hi");

    let delivered = wait_for(&mut alice, |e| matches!(e, NodeEvent::Delivered { .. })).await;
    match delivered {
        NodeEvent::Delivered { text, count, peers } => {
            assert_eq!(text, "hi");
            assert_eq!(count, 1);
            assert_eq!(peers, vec!["bob".to_string()]);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    let message = wait_for(&mut bob, |e| matches!(e, NodeEvent::Message { .. })).await;
    match message {
        NodeEvent::Message { from, text } => {
            assert_eq!(from, "alice");
            assert_eq!(text, "hi");
        }
        other => panic!("unexpected event: {other:?}"),
    }

    // Exactly one delivery: nothing further should surface at bob.
    tokio::time::sleep(Duration::from_millis(100)).await;
    while let Ok(event) = bob.events.try_recv() {
        assert!(
            !matches!(event, NodeEvent::Message { .. }),
            "unexpected extra message: {event:?}"
        );
    }
}

#[tokio::test]
async fn test_peer_list_tracks_connection_state() {
    let net = Arc::new(LoopbackNet::new());
    let rendezvous = Arc::new(Rendezvous::new(Arc::new(Directory::new())));
    let mut alice = spawn_peer("alice", &net, &rendezvous);
    let mut bob = spawn_peer("bob", &net, &rendezvous);
    registered(&mut alice).await;
    registered(&mut bob).await;

    alice.handle.list_peers();
    let listing = wait_for(&mut alice, |e| matches!(e, NodeEvent::PeerList { .. })).await;
    match listing {
        NodeEvent::PeerList { peers } => {
            assert_eq!(peers, vec![("bob".to_string(), false)]);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    alice.handle.call("bob");
    wait_for(&mut alice, |e| matches!(e, NodeEvent::ChannelOpen { .. })).await;

    alice.handle.list_peers();
    let listing = wait_for(&mut alice, |e| matches!(e, NodeEvent::PeerList { .. })).await;
    match listing {
        NodeEvent::PeerList { peers } => {
            assert_eq!(peers, vec![("bob".to_string(), true)]);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_broadcast_before_any_connection_errors() {
    let net = Arc::new(LoopbackNet::new());
    let rendezvous = Arc::new(Rendezvous::new(Arc::new(Directory::new())));
    let mut alice = spawn_peer("alice", &net, &rendezvous);
    registered(&mut alice).await;

    alice.handle.broadcast("into the void");

    let event = wait_for(&mut alice, |e| matches!(e, NodeEvent::Error { .. })).await;
    match event {
        NodeEvent::Error { message } => assert!(message.contains("no open channels")),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_calling_absent_peer_surfaces_error_to_caller_only() {
    let net = Arc::new(LoopbackNet::new());
    let rendezvous = Arc::new(Rendezvous::new(Arc::new(Directory::new())));
    let mut alice = spawn_peer("alice", &net, &rendezvous);
    registered(&mut alice).await;

    alice.handle.call("ghost");

    let event = wait_for(&mut alice, |e| matches!(e, NodeEvent::Error { .. })).await;
    match event {
        NodeEvent::Error { message } => assert!(message.contains("ghost")),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_remote_shutdown_is_discovered_through_the_transport() {
    let net = Arc::new(LoopbackNet::new());
    let rendezvous = Arc::new(Rendezvous::new(Arc::new(Directory::new())));
    let (mut alice, bob) = connected_pair(&net, &rendezvous).await;

    // No goodbye signal exists; alice only learns of this from her engine.
    bob.handle.shutdown();

    wait_for(&mut alice, |e| {
        matches!(e, NodeEvent::ChannelClosed { peer } if peer == "bob")
    })
    .await;

    alice.handle.broadcast("anyone?");
    let event = wait_for(&mut alice, |e| matches!(e, NodeEvent::Error { .. })).await;
    match event {
        NodeEvent::Error { message } => assert!(message.contains("no open channels")),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_identity_reusable_after_node_shutdown() {
    let net = Arc::new(LoopbackNet::new());
    let rendezvous = Arc::new(Rendezvous::new(Arc::new(Directory::new())));
    let mut alice = spawn_peer("alice", &net, &rendezvous);
    registered(&mut alice).await;

    alice.handle.shutdown();

    // Wait for the implicit unregister that follows session teardown.
    timeout(WAIT, async {
        while !rendezvous.directory().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("identity was never released");

    let mut newcomer = spawn_peer("alice", &net, &rendezvous);
    registered(&mut newcomer).await;
}
