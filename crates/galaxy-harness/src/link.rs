//! In-memory duplex channels
//!
//! Each direction of a link is a relay task that moves frames from the
//! sender's queue to the receiver's event stream, keeping a [`QueueGauge`] of
//! bytes sent but not yet delivered. Frames are delivered in send order and a
//! close is delivered after every frame queued before it.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use galaxy_core::{
    ChannelEvent, ChannelSink, DeviceCode, PeerChannel, RendezvousError, WireFrame,
};
use tokio::sync::{mpsc, Notify};
use tracing::trace;

// ----------------------------------------------------------------------------
// Queue Gauge
// ----------------------------------------------------------------------------

/// Bytes queued in one direction of a link
///
/// `hold` adds an artificial amount on top of the real backlog so tests can
/// keep a sender above its high-water mark for as long as they like.
#[derive(Debug, Default)]
pub struct QueueGauge {
    queued: AtomicUsize,
    held: AtomicUsize,
    binary_frames: AtomicUsize,
    changed: Notify,
}

impl QueueGauge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Real backlog plus any held amount
    pub fn total(&self) -> usize {
        self.queued
            .load(Ordering::SeqCst)
            .saturating_add(self.held.load(Ordering::SeqCst))
    }

    /// Pretend `bytes` are stuck in the queue until [`release`](Self::release)
    pub fn hold(&self, bytes: usize) {
        self.held.store(bytes, Ordering::SeqCst);
        self.changed.notify_waiters();
    }

    pub fn release(&self) {
        self.held.store(0, Ordering::SeqCst);
        self.changed.notify_waiters();
    }

    /// Binary frames accepted for sending so far
    pub fn binary_frames_sent(&self) -> usize {
        self.binary_frames.load(Ordering::SeqCst)
    }

    pub async fn changed(&self) {
        self.changed.notified().await
    }

    fn enqueue(&self, frame: &WireFrame) {
        self.queued.fetch_add(frame.len(), Ordering::SeqCst);
        if matches!(frame, WireFrame::Binary(_)) {
            self.binary_frames.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn dequeue(&self, bytes: usize) {
        // fetch_update never fails with a closure that always returns Some
        let _ = self
            .queued
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |q| {
                Some(q.saturating_sub(bytes))
            });
        self.changed.notify_waiters();
    }
}

// ----------------------------------------------------------------------------
// Memory Sink
// ----------------------------------------------------------------------------

enum Relay {
    Frame(WireFrame),
    Close,
}

/// Sending half of one end of an in-memory link
pub struct MemorySink {
    remote: DeviceCode,
    outbound: mpsc::UnboundedSender<Relay>,
    own_events: mpsc::UnboundedSender<ChannelEvent>,
    gauge: Arc<QueueGauge>,
    closed: Arc<AtomicBool>,
}

impl MemorySink {
    pub fn gauge(&self) -> Arc<QueueGauge> {
        self.gauge.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Deliver a transport error to this end, as a failing network would
    pub fn inject_error(&self, message: impl Into<String>) {
        let _ = self.own_events.send(ChannelEvent::Error(message.into()));
    }
}

#[async_trait]
impl ChannelSink for MemorySink {
    fn remote(&self) -> &DeviceCode {
        &self.remote
    }

    fn send(&self, frame: WireFrame) -> Result<(), RendezvousError> {
        if self.is_closed() {
            return Err(RendezvousError::Closed);
        }
        self.gauge.enqueue(&frame);
        self.outbound
            .send(Relay::Frame(frame))
            .map_err(|_| RendezvousError::Closed)
    }

    fn queued_bytes(&self) -> usize {
        self.gauge.total()
    }

    async fn queue_changed(&self) {
        self.gauge.changed().await
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.outbound.send(Relay::Close);
        let _ = self.own_events.send(ChannelEvent::Closed);
    }
}

// ----------------------------------------------------------------------------
// Link Construction
// ----------------------------------------------------------------------------

/// Both ends of an in-memory link, before they are handed out as channels
pub struct MemoryLink {
    pub a: Arc<MemorySink>,
    pub a_events: mpsc::UnboundedReceiver<ChannelEvent>,
    pub b: Arc<MemorySink>,
    pub b_events: mpsc::UnboundedReceiver<ChannelEvent>,
}

impl MemoryLink {
    /// `(end held by a, end held by b)`
    pub fn into_channels(self) -> (PeerChannel, PeerChannel) {
        (
            PeerChannel {
                sink: self.a,
                events: self.a_events,
            },
            PeerChannel {
                sink: self.b,
                events: self.b_events,
            },
        )
    }
}

/// Build a connected link between `a` and `b`
///
/// Must be called inside a tokio runtime since each direction spawns a relay
/// task.
pub fn memory_link(a: &DeviceCode, b: &DeviceCode) -> MemoryLink {
    let closed = Arc::new(AtomicBool::new(false));
    let (a_events_tx, a_events) = mpsc::unbounded_channel();
    let (b_events_tx, b_events) = mpsc::unbounded_channel();
    let (a_out_tx, a_out_rx) = mpsc::unbounded_channel();
    let (b_out_tx, b_out_rx) = mpsc::unbounded_channel();

    let a_gauge = Arc::new(QueueGauge::new());
    let b_gauge = Arc::new(QueueGauge::new());

    spawn_relay(a_out_rx, b_events_tx.clone(), a_gauge.clone(), closed.clone());
    spawn_relay(b_out_rx, a_events_tx.clone(), b_gauge.clone(), closed.clone());

    let a_end = MemorySink {
        remote: b.clone(),
        outbound: a_out_tx,
        own_events: a_events_tx,
        gauge: a_gauge,
        closed: closed.clone(),
    };
    let b_end = MemorySink {
        remote: a.clone(),
        outbound: b_out_tx,
        own_events: b_events_tx,
        gauge: b_gauge,
        closed,
    };

    MemoryLink {
        a: Arc::new(a_end),
        a_events,
        b: Arc::new(b_end),
        b_events,
    }
}

fn spawn_relay(
    mut queue: mpsc::UnboundedReceiver<Relay>,
    deliver: mpsc::UnboundedSender<ChannelEvent>,
    gauge: Arc<QueueGauge>,
    closed: Arc<AtomicBool>,
) {
    tokio::spawn(async move {
        while let Some(item) = queue.recv().await {
            match item {
                Relay::Frame(frame) => {
                    let len = frame.len();
                    trace!("relaying {} byte frame", len);
                    gauge.dequeue(len);
                    let _ = deliver.send(ChannelEvent::Message(frame));
                }
                Relay::Close => {
                    closed.store(true, Ordering::SeqCst);
                    let _ = deliver.send(ChannelEvent::Closed);
                    break;
                }
            }
        }
    });
}
