//! Shared helpers for engine integration tests

#![allow(dead_code)]

use galaxy_core::{AppEvent, DeviceCode, GalaxyConfig, MemoryStorage};
use galaxy_harness::{collect_until, next_event_matching, MemoryRendezvous, DEFAULT_EVENT_TIMEOUT};
use galaxy_runtime::{AppEventReceiver, EngineBuilder, EngineHandle};

/// A running engine plus the receiver that has seen every event since start
pub struct Node {
    pub handle: EngineHandle,
    pub events: AppEventReceiver,
    pub code: DeviceCode,
}

impl Node {
    pub async fn wait_for(&mut self, pred: impl FnMut(&AppEvent) -> bool) -> AppEvent {
        next_event_matching(&mut self.events, DEFAULT_EVENT_TIMEOUT, pred)
            .await
            .expect("expected event did not arrive")
    }

    pub async fn collect_until(&mut self, pred: impl FnMut(&AppEvent) -> bool) -> Vec<AppEvent> {
        collect_until(&mut self.events, DEFAULT_EVENT_TIMEOUT, pred)
            .await
            .expect("expected event did not arrive")
    }
}

pub async fn start_node(hub: &MemoryRendezvous) -> Node {
    start_node_with(hub, GalaxyConfig::testing(), MemoryStorage::new()).await
}

pub async fn start_node_with(
    hub: &MemoryRendezvous,
    config: GalaxyConfig,
    storage: MemoryStorage,
) -> Node {
    let mut handle = EngineBuilder::new(hub.clone())
        .with_config(config)
        .with_storage(storage)
        .build_and_start()
        .await
        .expect("Failed to build engine");
    let mut events = handle
        .take_app_event_receiver()
        .expect("Failed to get app event receiver");

    let ready = next_event_matching(&mut events, DEFAULT_EVENT_TIMEOUT, |e| {
        matches!(e, AppEvent::Ready { .. })
    })
    .await
    .expect("engine never came online");
    let AppEvent::Ready { identity } = ready else {
        unreachable!("matched Ready above")
    };

    Node {
        handle,
        events,
        code: identity,
    }
}

/// Pair two untrusted nodes: `a` dials, `b` accepts the prompt
pub async fn pair(a: &mut Node, b: &mut Node) {
    a.handle.dial(&b.code).await.expect("dial failed");

    let from = a.code.clone();
    b.wait_for(|e| matches!(e, AppEvent::PairingRequest { from: f } if *f == from))
        .await;
    b.handle
        .accept_pairing(&a.code)
        .await
        .expect("accept failed");

    let peer = b.code.clone();
    a.wait_for(|e| matches!(e, AppEvent::Paired { peer: p } if *p == peer))
        .await;
    let peer = a.code.clone();
    b.wait_for(|e| matches!(e, AppEvent::Connected { peer: p } if *p == peer))
        .await;
}

/// Deterministic, non-repeating-looking test payload
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
