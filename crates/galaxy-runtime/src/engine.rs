//! Core loop
//!
//! A single task owns the identity store, the lifecycle manager and the
//! connection table, and reacts to one input at a time:
//! - commands from `EngineHandle`s
//! - internal events (registration results, retry timers, dial results,
//!   frames pumped from every open channel)
//! - incoming channels from the live registration
//!
//! Anything that waits (registration, dialing, backoff, reject grace,
//! outbound transfers) runs in a spawned task and reports back through the
//! internal channel, so the loop itself never blocks.

use std::sync::Arc;

use galaxy_core::channel::utils::{AppEventSender, CommandReceiver};
use galaxy_core::protocol::{
    ChunkProgress, ConnectionEffect, ConnectionEvent, ConnectionState, FileMetadata, InboundFrame,
    InboundTransfers, PairingNotice, StateTransitionError,
};
use galaxy_core::{
    AppEvent, ChannelEvent, ChannelSink, Command, ControlMessage, DeviceCode, DialError,
    Direction, FileId, GalaxyConfig, IdentityStore, OutgoingFile, PairingError, PeerChannel,
    PeerSummary, ReceivedFile, Registration, Rendezvous, RendezvousError, SendSummary,
    SessionStatus, TransferError, WireFrame,
};
use hashbrown::HashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::lifecycle::{BringUpStep, LifecycleManager};
use crate::transfer::{SendJob, TransferLane};

// ----------------------------------------------------------------------------
// Internal Types
// ----------------------------------------------------------------------------

/// Distinguishes successive connections to the same device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ConnectionId(u64);

enum InternalEvent {
    Registered {
        epoch: u64,
        code: DeviceCode,
        result: Result<Registration, RendezvousError>,
    },
    RetryDue {
        epoch: u64,
    },
    DialFinished {
        id: ConnectionId,
        code: DeviceCode,
        result: Result<PeerChannel, RendezvousError>,
    },
    Channel {
        id: ConnectionId,
        code: DeviceCode,
        event: ChannelEvent,
    },
}

struct Connection {
    id: ConnectionId,
    /// `None` only while a transition is being computed
    state: Option<ConnectionState>,
    /// `None` while dialing, until the rendezvous hands us a channel
    sink: Option<Arc<dyn ChannelSink>>,
    inbound: InboundTransfers,
    lane: Option<TransferLane>,
    dial_reply: Option<oneshot::Sender<Result<(), DialError>>>,
}

impl Connection {
    fn new(id: ConnectionId, state: ConnectionState, sink: Option<Arc<dyn ChannelSink>>) -> Self {
        Self {
            id,
            state: Some(state),
            sink,
            inbound: InboundTransfers::new(),
            lane: None,
            dial_reply: None,
        }
    }

    fn state_name(&self) -> &'static str {
        self.state.as_ref().map_or("Closed", |s| s.state_name())
    }

    fn is_paired(&self) -> bool {
        self.state.as_ref().is_some_and(|s| s.is_paired())
    }
}

// ----------------------------------------------------------------------------
// Engine
// ----------------------------------------------------------------------------

pub(crate) struct Engine {
    config: GalaxyConfig,
    rendezvous: Arc<dyn Rendezvous>,
    store: IdentityStore,
    lifecycle: LifecycleManager,
    /// Bumped on every (re)start so late results from older rounds are ignored
    epoch: u64,
    incoming: Option<mpsc::UnboundedReceiver<PeerChannel>>,
    connections: HashMap<DeviceCode, Connection>,
    next_connection_id: u64,
    commands: CommandReceiver,
    internal_tx: mpsc::UnboundedSender<InternalEvent>,
    internal_rx: mpsc::UnboundedReceiver<InternalEvent>,
    events: AppEventSender,
}

impl Engine {
    pub(crate) fn new(
        config: GalaxyConfig,
        rendezvous: Arc<dyn Rendezvous>,
        store: IdentityStore,
        commands: CommandReceiver,
        events: AppEventSender,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        Self {
            lifecycle: LifecycleManager::new(config.lifecycle.clone()),
            config,
            rendezvous,
            store,
            epoch: 0,
            incoming: None,
            connections: HashMap::new(),
            next_connection_id: 0,
            commands,
            internal_tx,
            internal_rx,
            events,
        }
    }

    pub(crate) async fn run(mut self) {
        info!("Engine starting");
        self.start_bring_up();

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command) {
                            break;
                        }
                    }
                    None => {
                        debug!("All engine handles dropped");
                        self.teardown();
                        break;
                    }
                },
                Some(event) = self.internal_rx.recv() => self.handle_internal(event),
                incoming = next_incoming(&mut self.incoming) => match incoming {
                    Some(channel) => self.handle_incoming(channel),
                    None => self.handle_registration_lost(),
                },
            }
        }

        info!("Engine stopped");
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    /// Returns false once the engine should stop
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Dial { code, reply } => self.dial(code, reply),
            Command::Disconnect { code, reply } => {
                let _ = reply.send(self.disconnect(&code));
            }
            Command::AcceptPairing { code, reply } => {
                let _ = reply.send(self.decide_pairing(&code, ConnectionEvent::LocalAccept));
            }
            Command::RejectPairing { code, reply } => {
                let _ = reply.send(self.decide_pairing(&code, ConnectionEvent::LocalReject));
            }
            Command::SendFiles { code, files, reply } => self.send_files(code, files, reply),
            Command::Restart { reply } => {
                info!("Restarting session bring-up");
                self.start_bring_up();
                let _ = reply.send(());
            }
            Command::CurrentIdentity { reply } => {
                let _ = reply.send(self.store.current_identity());
            }
            Command::Status { reply } => {
                let _ = reply.send(self.lifecycle.state().status());
            }
            Command::TrustedDevices { reply } => {
                let _ = reply.send(self.store.list_trusted().to_vec());
            }
            Command::SaveTrusted { code, name, reply } => {
                let _ = reply.send(self.store.save_trusted(&code, name));
            }
            Command::RemoveTrusted { code, reply } => {
                self.disconnect(&code);
                let _ = reply.send(self.store.remove_trusted(&code));
            }
            Command::Peers { reply } => {
                let _ = reply.send(self.peer_summaries());
            }
            Command::Shutdown { reply } => {
                self.teardown();
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn dial(&mut self, code: DeviceCode, reply: oneshot::Sender<Result<(), DialError>>) {
        let local = self.store.current_identity();
        let rejection = if code == local {
            Some(DialError::SelfDial)
        } else if self.connections.contains_key(&code) {
            Some(DialError::Duplicate { code: code.clone() })
        } else if !self.lifecycle.is_online() {
            Some(DialError::NotReady {
                state: self.lifecycle.state().name().to_string(),
            })
        } else {
            None
        };
        if let Some(err) = rejection {
            debug!("Rejecting dial to {}: {}", code, err);
            let _ = reply.send(Err(err));
            return;
        }

        info!("Dialing {}", code);
        let id = self.next_id();
        let mut connection = Connection::new(id, ConnectionState::new_dialing(code.clone()), None);
        connection.dial_reply = Some(reply);
        self.connections.insert(code.clone(), connection);

        let rendezvous = self.rendezvous.clone();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = rendezvous.dial(&local, &code).await;
            let _ = tx.send(InternalEvent::DialFinished { id, code, result });
        });
    }

    /// Close the connection to `code` if there is one
    fn disconnect(&mut self, code: &DeviceCode) -> bool {
        if !self.connections.contains_key(code) {
            return false;
        }
        info!("Disconnecting from {}", code);
        self.apply_transition(code, ConnectionEvent::Disconnect).is_ok()
    }

    fn decide_pairing(
        &mut self,
        code: &DeviceCode,
        decision: ConnectionEvent,
    ) -> Result<(), PairingError> {
        let connection = self
            .connections
            .get(code)
            .ok_or_else(|| PairingError::NoPendingRequest { code: code.clone() })?;
        let invalid = || PairingError::InvalidState {
            code: code.clone(),
            state: connection.state_name().to_string(),
        };
        if !connection
            .state
            .as_ref()
            .is_some_and(|s| s.awaits_local_decision())
        {
            return Err(invalid());
        }
        let err = invalid();
        self.apply_transition(code, decision).map_err(|_| err)
    }

    fn send_files(
        &mut self,
        code: DeviceCode,
        files: Vec<OutgoingFile>,
        reply: oneshot::Sender<Result<SendSummary, TransferError>>,
    ) {
        match self.connections.get(&code) {
            Some(Connection {
                lane: Some(lane), ..
            }) => {
                debug!("Queueing {} file(s) for {}", files.len(), code);
                lane.submit(SendJob { files, reply });
            }
            _ => {
                let _ = reply.send(Err(TransferError::NotPaired { code }));
            }
        }
    }

    fn peer_summaries(&self) -> Vec<PeerSummary> {
        let mut peers: Vec<_> = self
            .connections
            .iter()
            .map(|(code, connection)| PeerSummary {
                code: code.clone(),
                state: connection.state_name(),
            })
            .collect();
        peers.sort_by(|a, b| a.code.cmp(&b.code));
        peers
    }

    // ------------------------------------------------------------------------
    // Session Bring-up
    // ------------------------------------------------------------------------

    fn start_bring_up(&mut self) {
        self.epoch += 1;
        self.incoming = None;
        self.emit(AppEvent::Status {
            status: SessionStatus::Connecting,
        });
        let step = self.lifecycle.begin(Instant::now());
        self.run_step(step);
    }

    fn run_step(&mut self, step: BringUpStep) {
        match step {
            BringUpStep::Register => self.spawn_registration(),
            BringUpStep::RegisterAfter(delay) => {
                debug!("Registering again in {:?}", delay);
                self.schedule_retry(delay);
            }
            BringUpStep::RetryAfter(delay) => {
                info!("Retrying registration in {:?}", delay);
                self.emit(AppEvent::Status {
                    status: SessionStatus::Reconnecting,
                });
                self.schedule_retry(delay);
            }
            BringUpStep::Regenerate { delay } => {
                let code = self.store.regenerate_identity();
                warn!("Bring-up exhausted; starting over as {}", code);
                self.emit(AppEvent::Status {
                    status: SessionStatus::Reconnecting,
                });
                self.schedule_retry(delay);
            }
            BringUpStep::Offline => {
                error!("Could not register with the rendezvous service; going offline");
                self.emit(AppEvent::Status {
                    status: SessionStatus::Offline,
                });
            }
        }
    }

    fn spawn_registration(&mut self) {
        let code = self.store.current_identity();
        let epoch = self.epoch;
        let timeout = self.config.lifecycle.registration_timeout;
        let rendezvous = self.rendezvous.clone();
        let tx = self.internal_tx.clone();

        debug!("Registering {}", code);
        tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, rendezvous.register(&code)).await {
                Ok(result) => result,
                Err(_) => Err(RendezvousError::Timeout {
                    duration_ms: timeout.as_millis() as u64,
                }),
            };
            let _ = tx.send(InternalEvent::Registered {
                epoch,
                code,
                result,
            });
        });
    }

    fn schedule_retry(&self, delay: std::time::Duration) {
        let epoch = self.epoch;
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(InternalEvent::RetryDue { epoch });
        });
    }

    fn on_registered(
        &mut self,
        epoch: u64,
        code: DeviceCode,
        result: Result<Registration, RendezvousError>,
    ) {
        if epoch != self.epoch {
            debug!("Ignoring registration result for {} from an earlier round", code);
            return;
        }

        match result {
            Ok(registration) => {
                self.lifecycle.on_registered();
                info!(
                    "Online as {} (session {})",
                    registration.code, registration.session_id
                );
                self.incoming = Some(registration.incoming);
                self.emit(AppEvent::Status {
                    status: SessionStatus::Online,
                });
                self.emit(AppEvent::Ready {
                    identity: registration.code,
                });
            }
            Err(RendezvousError::IdUnavailable { .. }) => {
                let fresh = self.store.regenerate_identity();
                warn!("Device code {} is taken; registering as {}", code, fresh);
                let step = self.lifecycle.on_conflict(Instant::now());
                self.run_step(step);
            }
            Err(e) => {
                warn!("Registration of {} failed: {}", code, e);
                let step = self.lifecycle.on_failure(Instant::now());
                self.run_step(step);
            }
        }
    }

    fn handle_registration_lost(&mut self) {
        self.incoming = None;
        if !self.lifecycle.is_online() {
            return;
        }
        warn!("Lost registration with the rendezvous service");
        let step = self.lifecycle.on_liveness_lost(Instant::now());
        self.run_step(step);
    }

    // ------------------------------------------------------------------------
    // Internal Events
    // ------------------------------------------------------------------------

    fn handle_internal(&mut self, event: InternalEvent) {
        match event {
            InternalEvent::Registered {
                epoch,
                code,
                result,
            } => self.on_registered(epoch, code, result),
            InternalEvent::RetryDue { epoch } => {
                if epoch == self.epoch && self.lifecycle.awaits_registration() {
                    self.spawn_registration();
                }
            }
            InternalEvent::DialFinished { id, code, result } => {
                self.on_dial_finished(id, code, result)
            }
            InternalEvent::Channel { id, code, event } => self.on_channel_event(id, code, event),
        }
    }

    fn on_dial_finished(
        &mut self,
        id: ConnectionId,
        code: DeviceCode,
        result: Result<PeerChannel, RendezvousError>,
    ) {
        if !self.is_current(&code, id) {
            if let Ok(channel) = result {
                debug!("Dial to {} completed after it was abandoned", code);
                channel.sink.close();
            }
            return;
        }

        let channel = match result {
            Ok(channel) => channel,
            Err(e) => {
                let err = DialError::from(e);
                warn!("Dial to {} failed: {}", code, err);
                if let Some(reply) = self
                    .connections
                    .remove(&code)
                    .and_then(|mut connection| connection.dial_reply.take())
                {
                    let _ = reply.send(Err(err.clone()));
                }
                self.emit(AppEvent::error(err.to_string()));
                return;
            }
        };

        let PeerChannel { sink, events } = channel;
        self.spawn_pump(id, code.clone(), events);
        let reply = self.connections.get_mut(&code).and_then(|connection| {
            connection.sink = Some(sink);
            connection.dial_reply.take()
        });

        let request = ControlMessage::PairRequest {
            from: self.store.current_identity(),
            claims_trusted: self.store.is_trusted(&code),
        };
        self.send_control(&code, &request);
        let _ = self.apply_transition(&code, ConnectionEvent::RequestSent);

        if let Some(reply) = reply {
            let _ = reply.send(Ok(()));
        }
    }

    fn handle_incoming(&mut self, channel: PeerChannel) {
        let code = channel.remote().clone();
        let local = self.store.current_identity();
        let crossed = self
            .connections
            .get(&code)
            .and_then(|c| c.state.as_ref())
            .is_some_and(ConnectionState::is_unanswered_dial);
        // Both sides dialed at once: the smaller code keeps its own dial
        if crossed && local > code {
            self.yield_dial(&code);
        }
        if code == local || self.connections.contains_key(&code) {
            warn!("Refusing incoming channel from {}: already connected", code);
            channel.sink.close();
            return;
        }

        info!("Incoming channel from {}", code);
        let id = self.next_id();
        let PeerChannel { sink, events } = channel;
        self.connections.insert(
            code.clone(),
            Connection::new(id, ConnectionState::new_incoming(code.clone()), Some(sink)),
        );
        self.spawn_pump(id, code, events);
    }

    fn yield_dial(&mut self, code: &DeviceCode) {
        let Some(mut connection) = self.connections.remove(code) else {
            return;
        };
        info!("Crossed dials with {}; continuing on its channel", code);
        if let Some(sink) = connection.sink.take() {
            sink.close();
        }
        if let Some(reply) = connection.dial_reply.take() {
            let _ = reply.send(Ok(()));
        }
    }

    fn on_channel_event(&mut self, id: ConnectionId, code: DeviceCode, event: ChannelEvent) {
        if !self.is_current(&code, id) {
            debug!("Ignoring event from a stale channel to {}", code);
            return;
        }

        match event {
            ChannelEvent::Message(frame) => self.on_frame(&code, frame),
            ChannelEvent::Error(message) => {
                warn!("Channel to {} failed: {}", code, message);
                self.emit(AppEvent::error(format!(
                    "Connection to {} failed: {}",
                    code, message
                )));
                if let Some(sink) = self.connections.get(&code).and_then(|c| c.sink.clone()) {
                    sink.close();
                }
                let _ = self.apply_transition(&code, ConnectionEvent::ChannelClosed);
            }
            ChannelEvent::Closed => {
                debug!("Channel to {} closed", code);
                let _ = self.apply_transition(&code, ConnectionEvent::ChannelClosed);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Frames
    // ------------------------------------------------------------------------

    fn on_frame(&mut self, code: &DeviceCode, frame: WireFrame) {
        let frame = match frame.decode() {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Discarding frame from {}: {}", code, e);
                return;
            }
        };

        let awaiting_request = self
            .connections
            .get(code)
            .is_some_and(|c| matches!(c.state, Some(ConnectionState::Incoming(_))));
        let is_request = matches!(
            frame,
            InboundFrame::Control(ControlMessage::PairRequest { .. })
        );
        if awaiting_request && !is_request {
            warn!("{} opened with something other than a pair-request", code);
            let _ = self.apply_transition(code, ConnectionEvent::ProtocolViolation);
            return;
        }

        match frame {
            InboundFrame::Chunk(bytes) => self.on_chunk(code, bytes),
            InboundFrame::Control(message) => self.on_control(code, message),
        }
    }

    fn on_control(&mut self, code: &DeviceCode, message: ControlMessage) {
        debug!("{} from {}", message.kind(), code);
        match message {
            ControlMessage::PairRequest {
                from,
                claims_trusted,
            } => {
                if &from != code {
                    warn!("pair-request names {} but arrived from {}", from, code);
                }
                let trusted = claims_trusted || self.store.is_trusted(code);
                let _ = self.apply_transition(code, ConnectionEvent::RequestReceived { trusted });
            }
            ControlMessage::PairAccept { .. } => {
                let _ = self.apply_transition(code, ConnectionEvent::AcceptReceived);
            }
            ControlMessage::PairReject => {
                let _ = self.apply_transition(code, ConnectionEvent::RejectReceived);
            }
            ControlMessage::FileStart {
                file_id,
                name,
                size,
                mime_type,
                chunk_count,
            } => self.on_file_start(
                code,
                FileMetadata {
                    file_id,
                    name,
                    size,
                    mime_type,
                    chunk_count,
                },
            ),
            ControlMessage::FileEnd { file_id } => self.on_file_end(code, &file_id),
            ControlMessage::FileCancel { file_id } => self.on_file_cancel(code, &file_id),
        }
    }

    fn paired_mut(&mut self, code: &DeviceCode) -> Option<&mut Connection> {
        match self.connections.get_mut(code) {
            Some(connection) if connection.is_paired() => Some(connection),
            _ => {
                debug!("Ignoring transfer frame from unpaired {}", code);
                None
            }
        }
    }

    fn on_file_start(&mut self, code: &DeviceCode, metadata: FileMetadata) {
        let Some(connection) = self.paired_mut(code) else {
            return;
        };
        let dropped = connection.inbound.begin(metadata.clone());
        for transfer in dropped {
            self.emit(AppEvent::error(format!(
                "{} started a new file before finishing {}",
                code, transfer.metadata.name
            )));
        }

        info!(
            "Receiving {} from {} ({} bytes, {} chunks)",
            metadata.name, code, metadata.size, metadata.chunk_count
        );
        let empty = metadata.empty_file_progress();
        self.emit(AppEvent::TransferStarted {
            peer: code.clone(),
            file_id: metadata.file_id,
            name: metadata.name,
            size: metadata.size,
            direction: Direction::Inbound,
        });
        if let Some(update) = empty {
            self.emit_progress(code, update);
        }
    }

    fn on_chunk(&mut self, code: &DeviceCode, bytes: Vec<u8>) {
        let Some(connection) = self.paired_mut(code) else {
            return;
        };
        match connection.inbound.accept_chunk(bytes) {
            Some(update) => self.emit_progress(code, update),
            None => debug!("Discarding stray chunk from {}", code),
        }
    }

    fn emit_progress(&self, code: &DeviceCode, update: ChunkProgress) {
        self.emit(AppEvent::Progress {
            peer: code.clone(),
            file_id: update.file_id,
            name: update.name,
            done: update.done,
            total: update.total,
            percent: update.percent,
            direction: Direction::Inbound,
        });
    }

    fn on_file_end(&mut self, code: &DeviceCode, file_id: &FileId) {
        let Some(connection) = self.paired_mut(code) else {
            return;
        };
        let Some(done) = connection.inbound.finish(file_id) else {
            debug!("file-end for unknown file {} from {}", file_id, code);
            return;
        };
        info!(
            "Received {} from {} ({} bytes)",
            done.metadata.name,
            code,
            done.payload.len()
        );
        self.emit(AppEvent::FileComplete(ReceivedFile {
            file_id: done.metadata.file_id,
            name: done.metadata.name,
            size: done.metadata.size,
            mime_type: done.metadata.mime_type,
            payload: Arc::from(done.payload),
            from: code.clone(),
        }));
    }

    fn on_file_cancel(&mut self, code: &DeviceCode, file_id: &FileId) {
        let Some(connection) = self.paired_mut(code) else {
            return;
        };
        if let Some(transfer) = connection.inbound.cancel(file_id) {
            warn!("{} cancelled {}", code, transfer.metadata.name);
            self.emit(AppEvent::error(format!(
                "{} stopped sending {}",
                code, transfer.metadata.name
            )));
        }
    }

    // ------------------------------------------------------------------------
    // Connection State
    // ------------------------------------------------------------------------

    fn apply_transition(
        &mut self,
        code: &DeviceCode,
        event: ConnectionEvent,
    ) -> Result<(), StateTransitionError> {
        let missing = |event: &ConnectionEvent| StateTransitionError::InvalidTransition {
            from_state: "None".to_string(),
            event: format!("{:?}", event),
            reason: format!("no connection to {}", code),
        };
        let Some(connection) = self.connections.get_mut(code) else {
            return Err(missing(&event));
        };
        let Some(state) = connection.state.take() else {
            return Err(missing(&event));
        };

        let snapshot = state.clone();
        match state.transition(event) {
            Ok(transition) => {
                let audit = &transition.audit_entry;
                debug!(
                    "{}: {} -> {} on {}",
                    audit.code, audit.from_state, audit.to_state, audit.event
                );
                connection.state = Some(transition.new_state);
                self.apply_effects(code, transition.effects);
                Ok(())
            }
            Err(e) => {
                connection.state = Some(snapshot);
                debug!("Ignoring stale input for {}: {}", code, e);
                Err(e)
            }
        }
    }

    fn apply_effects(&mut self, code: &DeviceCode, effects: Vec<ConnectionEffect>) {
        for effect in effects {
            match effect {
                ConnectionEffect::SendAccept => {
                    let from = self.store.current_identity();
                    self.send_control(code, &ControlMessage::PairAccept { from });
                }
                ConnectionEffect::SendReject => self.send_control(code, &ControlMessage::PairReject),
                ConnectionEffect::PersistTrust => {
                    self.store.save_trusted(code, None);
                }
                ConnectionEffect::OpenTransferLane => self.open_lane(code),
                ConnectionEffect::Notify(notice) => self.notify(code, notice),
                ConnectionEffect::CloseChannel { after_grace } => {
                    self.close_channel(code, after_grace)
                }
                ConnectionEffect::Discard => self.discard(code),
            }
        }
    }

    fn notify(&self, code: &DeviceCode, notice: PairingNotice) {
        let peer = code.clone();
        let event = match notice {
            PairingNotice::Prompt => {
                info!("{} wants to pair", peer);
                AppEvent::PairingRequest { from: peer }
            }
            PairingNotice::Connected => {
                info!("Connected to {}", peer);
                AppEvent::Connected { peer }
            }
            PairingNotice::Paired => {
                info!("Paired with {}", peer);
                AppEvent::Paired { peer }
            }
            PairingNotice::Rejected => {
                info!("{} rejected pairing", peer);
                AppEvent::Rejected { peer }
            }
            PairingNotice::Disconnected => {
                info!("Disconnected from {}", peer);
                AppEvent::Disconnected { peer }
            }
        };
        self.emit(event);
    }

    fn open_lane(&mut self, code: &DeviceCode) {
        let transfer = self.config.transfer.clone();
        let events = self.events.clone();
        if let Some(connection) = self.connections.get_mut(code) {
            if let Some(sink) = connection.sink.clone() {
                connection.lane = Some(TransferLane::spawn(code.clone(), sink, transfer, events));
            }
        }
    }

    fn close_channel(&self, code: &DeviceCode, after_grace: bool) {
        let Some(sink) = self.connections.get(code).and_then(|c| c.sink.clone()) else {
            return;
        };
        if !after_grace {
            sink.close();
            return;
        }
        let grace = self.config.pairing.reject_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            sink.close();
        });
    }

    /// Remove a connection, abandoning anything in flight on it
    fn discard(&mut self, code: &DeviceCode) {
        let Some(mut connection) = self.connections.remove(code) else {
            return;
        };
        if let Some(lane) = connection.lane.take() {
            lane.abort();
        }
        let dropped = connection.inbound.clear();
        if dropped > 0 {
            warn!("Dropped {} incomplete transfer(s) from {}", dropped, code);
        }
        if let Some(reply) = connection.dial_reply.take() {
            let _ = reply.send(Err(DialError::Aborted { code: code.clone() }));
        }
    }

    fn send_control(&self, code: &DeviceCode, message: &ControlMessage) {
        let Some(sink) = self.connections.get(code).and_then(|c| c.sink.as_ref()) else {
            debug!("No channel to {} for {}", code, message.kind());
            return;
        };
        let result = WireFrame::control(message)
            .map_err(|e| e.to_string())
            .and_then(|frame| sink.send(frame).map_err(|e| e.to_string()));
        if let Err(e) = result {
            warn!("Failed to send {} to {}: {}", message.kind(), code, e);
        }
    }

    fn spawn_pump(
        &self,
        id: ConnectionId,
        code: DeviceCode,
        mut events: mpsc::UnboundedReceiver<ChannelEvent>,
    ) {
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            loop {
                let event = events.recv().await.unwrap_or(ChannelEvent::Closed);
                let closed = event == ChannelEvent::Closed;
                let delivered = tx
                    .send(InternalEvent::Channel {
                        id,
                        code: code.clone(),
                        event,
                    })
                    .is_ok();
                if closed || !delivered {
                    break;
                }
            }
        });
    }

    fn teardown(&mut self) {
        let codes: Vec<DeviceCode> = self.connections.keys().cloned().collect();
        for code in codes {
            self.close_channel(&code, false);
            self.discard(&code);
        }
        self.incoming = None;
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn is_current(&self, code: &DeviceCode, id: ConnectionId) -> bool {
        self.connections.get(code).is_some_and(|c| c.id == id)
    }

    fn next_id(&mut self) -> ConnectionId {
        self.next_connection_id += 1;
        ConnectionId(self.next_connection_id)
    }

    fn emit(&self, event: AppEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

async fn next_incoming(
    incoming: &mut Option<mpsc::UnboundedReceiver<PeerChannel>>,
) -> Option<PeerChannel> {
    match incoming {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
