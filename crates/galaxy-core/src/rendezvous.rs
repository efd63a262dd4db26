//! Rendezvous collaborator boundary
//!
//! The rendezvous service maps device codes to reachable endpoints and hands
//! out ordered, reliable, message-oriented duplex channels. The engine only
//! sees the traits below; `galaxy-harness` provides an in-memory
//! implementation.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::errors::RendezvousError;
use crate::protocol::WireFrame;
use crate::types::DeviceCode;

/// A live registration under one device code
///
/// Incoming channels arrive on `incoming`. When the rendezvous service loses
/// the registration the sender side is dropped and `incoming` yields `None`.
#[derive(Debug)]
pub struct Registration {
    pub code: DeviceCode,
    pub session_id: Uuid,
    pub incoming: mpsc::UnboundedReceiver<PeerChannel>,
}

#[async_trait]
pub trait Rendezvous: Send + Sync + 'static {
    /// Register `code`; fails with `IdUnavailable` when it is taken
    async fn register(&self, code: &DeviceCode) -> Result<Registration, RendezvousError>;

    /// Open a channel from `local` to the device registered as `remote`
    async fn dial(
        &self,
        local: &DeviceCode,
        remote: &DeviceCode,
    ) -> Result<PeerChannel, RendezvousError>;
}

// ----------------------------------------------------------------------------
// Peer Channels
// ----------------------------------------------------------------------------

/// Sending half of a peer channel
#[async_trait]
pub trait ChannelSink: Send + Sync {
    /// Device on the other end
    fn remote(&self) -> &DeviceCode;

    /// Enqueue a frame; never blocks
    fn send(&self, frame: WireFrame) -> Result<(), RendezvousError>;

    /// Advisory count of bytes enqueued but not yet flushed
    fn queued_bytes(&self) -> usize;

    /// Resolves when the queued-bytes count may have changed
    async fn queue_changed(&self);

    /// Close the channel; both ends observe `ChannelEvent::Closed`
    fn close(&self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Message(WireFrame),
    Error(String),
    Closed,
}

/// Both halves of an open channel
pub struct PeerChannel {
    pub sink: Arc<dyn ChannelSink>,
    pub events: mpsc::UnboundedReceiver<ChannelEvent>,
}

impl PeerChannel {
    pub fn remote(&self) -> &DeviceCode {
        self.sink.remote()
    }
}

impl std::fmt::Debug for PeerChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerChannel")
            .field("remote", self.sink.remote())
            .field("queued_bytes", &self.sink.queued_bytes())
            .finish()
    }
}
