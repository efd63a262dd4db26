//! In-memory rendezvous service
//!
//! A shared registration table standing in for the real signaling service.
//! Clones share state, so one `MemoryRendezvous` can serve several engines in
//! a test while the test keeps a clone to inject faults.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use async_trait::async_trait;
use galaxy_core::{DeviceCode, PeerChannel, Registration, Rendezvous, RendezvousError};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::link::{memory_link, MemorySink, QueueGauge};

struct Slot {
    incoming: mpsc::UnboundedSender<PeerChannel>,
}

impl Slot {
    fn is_live(&self) -> bool {
        !self.incoming.is_closed()
    }
}

#[derive(Default)]
struct HubState {
    registrations: HashMap<DeviceCode, Slot>,
    reserved: HashSet<DeviceCode>,
    all_taken: bool,
    fail_next: u32,
    offline: bool,
    hang_registrations: bool,
    registration_attempts: usize,
    /// Sink owned by `.0` whose remote is `.1`
    sinks: HashMap<(DeviceCode, DeviceCode), Weak<MemorySink>>,
}

#[derive(Clone, Default)]
pub struct MemoryRendezvous {
    state: Arc<Mutex<HubState>>,
}

impl MemoryRendezvous {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, HubState>, RendezvousError> {
        self.state.lock().map_err(|_| RendezvousError::Transport {
            reason: "rendezvous state poisoned".to_string(),
        })
    }

    fn with_state<T: Default>(&self, f: impl FnOnce(&mut HubState) -> T) -> T {
        match self.state.lock() {
            Ok(mut state) => f(&mut state),
            Err(_) => T::default(),
        }
    }

    // ------------------------------------------------------------------------
    // Fault Injection
    // ------------------------------------------------------------------------

    /// Treat `code` as taken by someone else
    pub fn reserve(&self, code: DeviceCode) {
        self.with_state(|s| {
            s.reserved.insert(code);
        })
    }

    /// While set every code is reported as taken
    pub fn set_all_codes_taken(&self, taken: bool) {
        self.with_state(|s| s.all_taken = taken)
    }

    /// Fail the next `n` registrations with a transport error
    pub fn fail_next_registrations(&self, n: u32) {
        self.with_state(|s| s.fail_next = n)
    }

    /// While offline every register and dial fails with a transport error
    pub fn set_offline(&self, offline: bool) {
        self.with_state(|s| s.offline = offline)
    }

    /// Registrations never resolve while set
    pub fn set_hang_registrations(&self, hang: bool) {
        self.with_state(|s| s.hang_registrations = hang)
    }

    /// Forget a live registration; the owner sees its incoming stream end
    pub fn drop_registration(&self, code: &DeviceCode) -> bool {
        self.with_state(|s| s.registrations.remove(code).is_some())
    }

    // ------------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------------

    pub fn is_registered(&self, code: &DeviceCode) -> bool {
        self.with_state(|s| s.registrations.get(code).is_some_and(Slot::is_live))
    }

    pub fn registration_attempts(&self) -> usize {
        self.with_state(|s| s.registration_attempts)
    }

    /// The end of the most recent link that `from` uses to talk to `to`
    pub fn sink(&self, from: &DeviceCode, to: &DeviceCode) -> Option<Arc<MemorySink>> {
        self.with_state(|s| {
            s.sinks
                .get(&(from.clone(), to.clone()))
                .and_then(Weak::upgrade)
        })
    }

    /// Queued-bytes gauge for frames travelling from `from` to `to`
    pub fn gauge(&self, from: &DeviceCode, to: &DeviceCode) -> Option<Arc<QueueGauge>> {
        self.sink(from, to).map(|sink| sink.gauge())
    }
}

#[async_trait]
impl Rendezvous for MemoryRendezvous {
    async fn register(&self, code: &DeviceCode) -> Result<Registration, RendezvousError> {
        let outcome = {
            let mut state = self.state()?;
            state.registration_attempts += 1;

            if state.hang_registrations {
                None
            } else if state.offline {
                Some(Err(RendezvousError::Transport {
                    reason: "rendezvous offline".to_string(),
                }))
            } else if state.fail_next > 0 {
                state.fail_next -= 1;
                Some(Err(RendezvousError::Transport {
                    reason: "injected registration failure".to_string(),
                }))
            } else if state.all_taken
                || state.reserved.contains(code)
                || state.registrations.get(code).is_some_and(Slot::is_live)
            {
                Some(Err(RendezvousError::IdUnavailable { code: code.clone() }))
            } else {
                let (incoming_tx, incoming) = mpsc::unbounded_channel();
                state
                    .registrations
                    .insert(code.clone(), Slot { incoming: incoming_tx });
                debug!("registered {}", code);
                Some(Ok(Registration {
                    code: code.clone(),
                    session_id: Uuid::new_v4(),
                    incoming,
                }))
            }
        };

        match outcome {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }

    async fn dial(
        &self,
        local: &DeviceCode,
        remote: &DeviceCode,
    ) -> Result<PeerChannel, RendezvousError> {
        let mut state = self.state()?;
        if state.offline {
            return Err(RendezvousError::Transport {
                reason: "rendezvous offline".to_string(),
            });
        }

        let unavailable = || RendezvousError::PeerUnavailable {
            code: remote.clone(),
        };
        let incoming = match state.registrations.get(remote) {
            Some(slot) if slot.is_live() => slot.incoming.clone(),
            _ => return Err(unavailable()),
        };

        let link = memory_link(local, remote);
        state
            .sinks
            .insert((local.clone(), remote.clone()), Arc::downgrade(&link.a));
        state
            .sinks
            .insert((remote.clone(), local.clone()), Arc::downgrade(&link.b));

        let (ours, theirs) = link.into_channels();
        incoming.send(theirs).map_err(|_| unavailable())?;
        debug!("linked {} -> {}", local, remote);
        Ok(ours)
    }
}
