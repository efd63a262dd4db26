//! Pairing handshake between engines over the in-memory rendezvous

mod common;

use std::time::Duration;

use common::{pair, start_node, start_node_with, Node};
use galaxy_core::{
    AppEvent, ChannelEvent, ControlMessage, DeviceCode, DialError, GalaxyConfig, GalaxyError,
    MemoryStorage, PairingError, Rendezvous, WireFrame,
};
use galaxy_harness::MemoryRendezvous;
use tokio::time::timeout;

fn raw_code(s: &str) -> DeviceCode {
    s.parse().expect("valid code")
}

// ----------------------------------------------------------------------------
// Handshake Outcomes
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_untrusted_pairing_prompts_then_trusts_both_ways() {
    let hub = MemoryRendezvous::new();
    let mut a = start_node(&hub).await;
    let mut b = start_node(&hub).await;

    a.handle.dial(&b.code).await.expect("dial failed");
    let from = a.code.clone();
    b.wait_for(|e| matches!(e, AppEvent::PairingRequest { from: f } if *f == from))
        .await;

    let peers = b.handle.peers().await.expect("peers");
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].code, a.code);
    assert_eq!(peers[0].state, "Pending");
    assert!(!b.handle.is_connected(&a.code).await.expect("query"));

    b.handle.accept_pairing(&a.code).await.expect("accept");
    let peer = b.code.clone();
    a.wait_for(|e| matches!(e, AppEvent::Paired { peer: p } if *p == peer))
        .await;
    let peer = a.code.clone();
    b.wait_for(|e| matches!(e, AppEvent::Connected { peer: p } if *p == peer))
        .await;

    assert!(a.handle.is_connected(&b.code).await.expect("query"));
    assert!(b.handle.is_connected(&a.code).await.expect("query"));

    let trusted_by_a = a.handle.trusted_devices().await.expect("trusted");
    assert_eq!(trusted_by_a.len(), 1);
    assert_eq!(trusted_by_a[0].code, b.code);
    assert_eq!(trusted_by_a[0].name, "Device 1");
    let trusted_by_b = b.handle.trusted_devices().await.expect("trusted");
    assert_eq!(trusted_by_b[0].code, a.code);
}

#[tokio::test]
async fn test_locally_trusted_device_pairs_without_prompt() {
    let hub = MemoryRendezvous::new();
    let mut a = start_node(&hub).await;
    let mut b = start_node(&hub).await;

    assert!(b
        .handle
        .save_trusted(&a.code, Some("Laptop".to_string()))
        .await
        .expect("save"));

    a.handle.dial(&b.code).await.expect("dial failed");
    let peer = a.code.clone();
    let seen = b
        .collect_until(|e| matches!(e, AppEvent::Connected { peer: p } if *p == peer))
        .await;
    assert!(!seen
        .iter()
        .any(|e| matches!(e, AppEvent::PairingRequest { .. })));

    let peer = b.code.clone();
    a.wait_for(|e| matches!(e, AppEvent::Paired { peer: p } if *p == peer))
        .await;

    // Existing entry keeps its name
    let trusted = b.handle.trusted_devices().await.expect("trusted");
    assert_eq!(trusted.len(), 1);
    assert_eq!(trusted[0].name, "Laptop");
}

#[tokio::test]
async fn test_dialer_trust_claim_skips_prompt() {
    let hub = MemoryRendezvous::new();
    let mut a = start_node(&hub).await;
    let mut b = start_node(&hub).await;

    a.handle.save_trusted(&b.code, None).await.expect("save");
    a.handle.dial(&b.code).await.expect("dial failed");

    let peer = a.code.clone();
    let seen = b
        .collect_until(|e| matches!(e, AppEvent::Connected { peer: p } if *p == peer))
        .await;
    assert!(!seen
        .iter()
        .any(|e| matches!(e, AppEvent::PairingRequest { .. })));
    assert!(b.handle.is_connected(&a.code).await.expect("query"));
}

#[tokio::test]
async fn test_rejection_leaves_no_trust_and_no_connection() {
    let hub = MemoryRendezvous::new();
    let mut a = start_node(&hub).await;
    let mut b = start_node(&hub).await;

    a.handle.dial(&b.code).await.expect("dial failed");
    b.wait_for(|e| matches!(e, AppEvent::PairingRequest { .. }))
        .await;
    b.handle.reject_pairing(&a.code).await.expect("reject");

    let peer = b.code.clone();
    a.wait_for(|e| matches!(e, AppEvent::Rejected { peer: p } if *p == peer))
        .await;

    assert!(a.handle.peers().await.expect("peers").is_empty());
    assert!(b.handle.peers().await.expect("peers").is_empty());
    assert!(a.handle.trusted_devices().await.expect("trusted").is_empty());
    assert!(b.handle.trusted_devices().await.expect("trusted").is_empty());

    let err = b
        .handle
        .accept_pairing(&a.code)
        .await
        .expect_err("nothing left to accept");
    assert!(matches!(
        err,
        GalaxyError::Pairing(PairingError::NoPendingRequest { .. })
    ));
}

#[tokio::test]
async fn test_accept_without_prompt_is_invalid_state() {
    let hub = MemoryRendezvous::new();
    let mut a = start_node(&hub).await;
    let mut b = start_node(&hub).await;
    pair(&mut a, &mut b).await;

    let err = b
        .handle
        .accept_pairing(&a.code)
        .await
        .expect_err("already paired");
    assert!(matches!(
        err,
        GalaxyError::Pairing(PairingError::InvalidState { ref state, .. }) if state == "Paired"
    ));
}

// ----------------------------------------------------------------------------
// Dial Guards
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_dial_guards() {
    let hub = MemoryRendezvous::new();
    let mut a = start_node(&hub).await;
    let b = start_node(&hub).await;

    let err = a.handle.dial(&a.code).await.expect_err("self dial");
    assert!(matches!(err, GalaxyError::Dial(DialError::SelfDial)));

    a.handle.dial(&b.code).await.expect("first dial");
    let err = a.handle.dial(&b.code).await.expect_err("duplicate dial");
    assert!(matches!(err, GalaxyError::Dial(DialError::Duplicate { .. })));

    let nobody = raw_code("GT-ZZZZZZ");
    let err = a.handle.dial(&nobody).await.expect_err("unknown peer");
    assert!(matches!(
        err,
        GalaxyError::Dial(DialError::PeerUnavailable { ref code }) if *code == nobody
    ));
    a.wait_for(|e| matches!(e, AppEvent::Error { .. })).await;

    // A failed dial leaves nothing behind
    let peers = a.handle.peers().await.expect("peers");
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].code, b.code);
}

#[tokio::test]
async fn test_dial_to_paired_peer_is_duplicate() {
    let hub = MemoryRendezvous::new();
    let mut a = start_node(&hub).await;
    let mut b = start_node(&hub).await;
    pair(&mut a, &mut b).await;

    let err = a.handle.dial(&b.code).await.expect_err("already paired");
    assert!(matches!(
        err,
        GalaxyError::Dial(DialError::Duplicate { ref code }) if *code == b.code
    ));
    assert_eq!(hub.registration_attempts(), 2);

    let peers = a.handle.peers().await.expect("peers");
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].code, b.code);
    assert_eq!(peers[0].state, "Paired");
    assert!(a.handle.is_connected(&b.code).await.expect("is_connected"));
}

async fn wait_until_paired_with(node: &Node, peer: &DeviceCode) {
    timeout(Duration::from_secs(5), async {
        loop {
            let peers = node.handle.peers().await.expect("peers");
            if peers.len() == 1 && peers[0].code == *peer && peers[0].state == "Paired" {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("connection never settled into a single pairing");
}

#[tokio::test]
async fn test_crossed_dials_leave_one_connection() {
    let hub = MemoryRendezvous::new();
    let mut a = start_node(&hub).await;
    let mut b = start_node(&hub).await;

    let (to_b, to_a) = tokio::join!(a.handle.dial(&b.code), b.handle.dial(&a.code));
    for result in [to_b, to_a] {
        assert!(matches!(
            result,
            Ok(()) | Err(GalaxyError::Dial(DialError::Duplicate { .. }))
        ));
    }

    // Whichever channel survived, its receiving side is prompted
    let (a_code, b_code) = (a.code.clone(), b.code.clone());
    let a_prompted = tokio::select! {
        _ = a.wait_for(|e| matches!(e, AppEvent::PairingRequest { from } if *from == b_code)) => true,
        _ = b.wait_for(|e| matches!(e, AppEvent::PairingRequest { from } if *from == a_code)) => false,
    };
    if a_prompted {
        a.handle.accept_pairing(&b.code).await.expect("accept");
    } else {
        b.handle.accept_pairing(&a.code).await.expect("accept");
    }

    wait_until_paired_with(&a, &b.code).await;
    wait_until_paired_with(&b, &a.code).await;

    // Still a single connection once everything has settled
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(a.handle.connected_peers().await.expect("peers"), vec![b.code.clone()]);
    assert_eq!(b.handle.connected_peers().await.expect("peers"), vec![a.code.clone()]);
}

// ----------------------------------------------------------------------------
// Teardown
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_disconnect_notifies_both_sides() {
    let hub = MemoryRendezvous::new();
    let mut a = start_node(&hub).await;
    let mut b = start_node(&hub).await;
    pair(&mut a, &mut b).await;

    assert!(a.handle.disconnect(&b.code).await.expect("disconnect"));
    let peer = b.code.clone();
    a.wait_for(|e| matches!(e, AppEvent::Disconnected { peer: p } if *p == peer))
        .await;
    let peer = a.code.clone();
    b.wait_for(|e| matches!(e, AppEvent::Disconnected { peer: p } if *p == peer))
        .await;

    assert!(!a.handle.disconnect(&b.code).await.expect("disconnect"));
    assert!(b.handle.peers().await.expect("peers").is_empty());

    // Trust outlives the connection, so the next dial pairs silently
    a.handle.dial(&b.code).await.expect("redial");
    let peer = a.code.clone();
    let seen = b
        .collect_until(|e| matches!(e, AppEvent::Connected { peer: p } if *p == peer))
        .await;
    assert!(!seen
        .iter()
        .any(|e| matches!(e, AppEvent::PairingRequest { .. })));
}

#[tokio::test]
async fn test_remove_trusted_also_disconnects() {
    let hub = MemoryRendezvous::new();
    let mut a = start_node(&hub).await;
    let mut b = start_node(&hub).await;
    pair(&mut a, &mut b).await;

    assert!(b.handle.remove_trusted(&a.code).await.expect("remove"));
    let peer = b.code.clone();
    a.wait_for(|e| matches!(e, AppEvent::Disconnected { peer: p } if *p == peer))
        .await;
    assert!(b.handle.trusted_devices().await.expect("trusted").is_empty());
    assert!(!b.handle.remove_trusted(&a.code).await.expect("remove"));
}

#[tokio::test]
async fn test_channel_error_is_reported_then_disconnects() {
    let hub = MemoryRendezvous::new();
    let mut a = start_node(&hub).await;
    let mut b = start_node(&hub).await;
    pair(&mut a, &mut b).await;

    hub.sink(&a.code, &b.code)
        .expect("link exists")
        .inject_error("cable unplugged");

    let seen = a
        .collect_until(|e| matches!(e, AppEvent::Disconnected { .. }))
        .await;
    assert!(seen.iter().any(
        |e| matches!(e, AppEvent::Error { message } if message.contains("cable unplugged"))
    ));
    b.wait_for(|e| matches!(e, AppEvent::Disconnected { .. }))
        .await;
}

#[tokio::test]
async fn test_shutdown_closes_connections() {
    let hub = MemoryRendezvous::new();
    let mut a = start_node(&hub).await;
    let mut b = start_node(&hub).await;
    pair(&mut a, &mut b).await;

    a.handle.shutdown().await.expect("shutdown");
    let peer = a.code.clone();
    b.wait_for(|e| matches!(e, AppEvent::Disconnected { peer: p } if *p == peer))
        .await;
}

// ----------------------------------------------------------------------------
// Misbehaving Peers
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_first_message_must_be_pair_request() {
    let hub = MemoryRendezvous::new();
    let b = start_node(&hub).await;
    let intruder = raw_code("GT-XXXXXX");

    let mut channel = hub.dial(&intruder, &b.code).await.expect("dial");
    let accept = ControlMessage::PairAccept {
        from: intruder.clone(),
    };
    channel
        .sink
        .send(WireFrame::control(&accept).expect("encode"))
        .expect("send");

    let closed = timeout(Duration::from_secs(5), async {
        while let Some(event) = channel.events.recv().await {
            if event == ChannelEvent::Closed {
                return true;
            }
        }
        false
    })
    .await
    .expect("channel was not closed");
    assert!(closed);
    assert!(b.handle.peers().await.expect("peers").is_empty());
}

#[tokio::test]
async fn test_malformed_frames_are_ignored() {
    let hub = MemoryRendezvous::new();
    let mut b = start_node_with(&hub, GalaxyConfig::testing(), MemoryStorage::new()).await;
    let stranger = raw_code("GT-YYYYYY");

    let channel = hub.dial(&stranger, &b.code).await.expect("dial");
    channel
        .sink
        .send(WireFrame::Text("{not json".to_string()))
        .expect("send");
    channel
        .sink
        .send(WireFrame::Text(r#"{"type":"pair-bogus"}"#.to_string()))
        .expect("send");
    let request = ControlMessage::PairRequest {
        from: stranger.clone(),
        claims_trusted: false,
    };
    channel
        .sink
        .send(WireFrame::control(&request).expect("encode"))
        .expect("send");

    let from = stranger.clone();
    b.wait_for(|e| matches!(e, AppEvent::PairingRequest { from: f } if *f == from))
        .await;
    let peers = b.handle.peers().await.expect("peers");
    assert_eq!(peers[0].state, "Pending");
}
