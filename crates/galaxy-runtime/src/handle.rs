//! Engine handle
//!
//! Cheap to clone. Every call is a command plus a oneshot reply, so calls
//! from any number of tasks are serialized by the core loop.

use galaxy_core::channel::utils::{AppEventReceiver, AppEventSender, CommandSender};
use galaxy_core::{
    Command, DeviceCode, GalaxyError, OutgoingFile, PeerSummary, Result,
    SendSummary, SessionStatus, TransferError, TrustedDevice,
};
use tokio::sync::oneshot;
use tracing::info;

pub struct EngineHandle {
    commands: CommandSender,
    events: AppEventSender,
    /// Subscribed before the core loop started, so it sees `Ready`
    first_events: Option<AppEventReceiver>,
}

impl Clone for EngineHandle {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            events: self.events.clone(),
            first_events: None,
        }
    }
}

impl EngineHandle {
    pub(crate) fn new(
        commands: CommandSender,
        events: AppEventSender,
        first_events: AppEventReceiver,
    ) -> Self {
        Self {
            commands,
            events,
            first_events: Some(first_events),
        }
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| GalaxyError::EngineStopped)?;
        response.await.map_err(|_| GalaxyError::EngineStopped)
    }

    // ------------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------------

    /// Open a channel to `code` and send the pairing request
    ///
    /// Resolves once the request is on the wire; the outcome of pairing
    /// arrives as a `Connected`, `Paired`, `Rejected` or `Disconnected` event.
    pub async fn dial(&self, code: &DeviceCode) -> Result<()> {
        let code = code.clone();
        self.request(|reply| Command::Dial { code, reply }).await??;
        Ok(())
    }

    /// Returns whether there was a connection to close
    pub async fn disconnect(&self, code: &DeviceCode) -> Result<bool> {
        let code = code.clone();
        self.request(|reply| Command::Disconnect { code, reply }).await
    }

    pub async fn accept_pairing(&self, code: &DeviceCode) -> Result<()> {
        let code = code.clone();
        self.request(|reply| Command::AcceptPairing { code, reply })
            .await??;
        Ok(())
    }

    pub async fn reject_pairing(&self, code: &DeviceCode) -> Result<()> {
        let code = code.clone();
        self.request(|reply| Command::RejectPairing { code, reply })
            .await??;
        Ok(())
    }

    /// Send files to a paired device, one after another
    ///
    /// Files that cannot be read are reported in the summary and skipped.
    /// If the connection closes mid-batch the whole call fails with
    /// `TransferError::ConnectionClosed`.
    pub async fn send_files(
        &self,
        code: &DeviceCode,
        files: Vec<OutgoingFile>,
    ) -> Result<SendSummary> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::SendFiles {
                code: code.clone(),
                files,
                reply,
            })
            .await
            .map_err(|_| GalaxyError::EngineStopped)?;
        match response.await {
            Ok(outcome) => Ok(outcome?),
            Err(_) => Err(TransferError::ConnectionClosed { code: code.clone() }.into()),
        }
    }

    pub async fn peers(&self) -> Result<Vec<PeerSummary>> {
        self.request(|reply| Command::Peers { reply }).await
    }

    /// Devices with a completed handshake
    pub async fn connected_peers(&self) -> Result<Vec<DeviceCode>> {
        Ok(self
            .peers()
            .await?
            .into_iter()
            .filter(|peer| peer.state == "Paired")
            .map(|peer| peer.code)
            .collect())
    }

    pub async fn is_connected(&self, code: &DeviceCode) -> Result<bool> {
        Ok(self.connected_peers().await?.contains(code))
    }

    // ------------------------------------------------------------------------
    // Session
    // ------------------------------------------------------------------------

    /// Start bring-up again from scratch, e.g. after going offline
    pub async fn restart(&self) -> Result<()> {
        self.request(|reply| Command::Restart { reply }).await
    }

    pub async fn current_identity(&self) -> Result<DeviceCode> {
        self.request(|reply| Command::CurrentIdentity { reply }).await
    }

    pub async fn status(&self) -> Result<SessionStatus> {
        self.request(|reply| Command::Status { reply }).await
    }

    // ------------------------------------------------------------------------
    // Trust
    // ------------------------------------------------------------------------

    pub async fn trusted_devices(&self) -> Result<Vec<TrustedDevice>> {
        self.request(|reply| Command::TrustedDevices { reply }).await
    }

    /// Returns false if the device was already trusted
    pub async fn save_trusted(&self, code: &DeviceCode, name: Option<String>) -> Result<bool> {
        let code = code.clone();
        self.request(|reply| Command::SaveTrusted { code, name, reply }).await
    }

    /// Forget a device and drop any connection to it
    pub async fn remove_trusted(&self, code: &DeviceCode) -> Result<bool> {
        let code = code.clone();
        self.request(|reply| Command::RemoveTrusted { code, reply }).await
    }

    // ------------------------------------------------------------------------
    // Events & Lifetime
    // ------------------------------------------------------------------------

    /// Take the receiver created before start-up (only once, only on the
    /// handle returned by the builder)
    pub fn take_app_event_receiver(&mut self) -> Option<AppEventReceiver> {
        self.first_events.take()
    }

    /// Subscribe to events emitted from now on
    pub fn subscribe(&self) -> AppEventReceiver {
        self.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Close every connection and stop the core loop
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down engine");
        match self.request(|reply| Command::Shutdown { reply }).await {
            Ok(()) | Err(GalaxyError::EngineStopped) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
