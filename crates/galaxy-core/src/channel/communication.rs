//! Command and event types
//!
//! `Command` flows from an `EngineHandle` into the core loop and always
//! carries a oneshot reply. `AppEvent` flows out of the core loop to every
//! subscriber of the event surface.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::errors::{DialError, PairingError, TransferError};
use crate::identity::TrustedDevice;
use crate::protocol::FileId;
use crate::types::DeviceCode;

// ----------------------------------------------------------------------------
// Outgoing Files
// ----------------------------------------------------------------------------

/// Where the bytes of an outgoing file come from
#[derive(Debug, Clone)]
pub enum FileSource {
    /// Read slice by slice from disk while sending
    Path(PathBuf),
    /// Already in memory
    Bytes(Arc<[u8]>),
}

#[derive(Debug, Clone)]
pub struct OutgoingFile {
    pub name: String,
    pub mime_type: String,
    pub source: FileSource,
}

impl OutgoingFile {
    pub fn from_path(path: impl Into<PathBuf>, mime_type: impl Into<String>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            name,
            mime_type: mime_type.into(),
            source: FileSource::Path(path),
        }
    }

    pub fn from_bytes(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        let bytes: Vec<u8> = bytes.into();
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            source: FileSource::Bytes(Arc::from(bytes)),
        }
    }
}

/// A file that could not be sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedFile {
    pub name: String,
    pub reason: String,
}

/// Outcome of a `send_files` batch that was not interrupted by a close
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendSummary {
    pub sent: Vec<FileId>,
    pub failed: Vec<FailedFile>,
}

// ----------------------------------------------------------------------------
// Commands (Handle → Core Loop)
// ----------------------------------------------------------------------------

#[derive(Debug)]
pub enum Command {
    Dial {
        code: DeviceCode,
        reply: oneshot::Sender<Result<(), DialError>>,
    },
    Disconnect {
        code: DeviceCode,
        reply: oneshot::Sender<bool>,
    },
    AcceptPairing {
        code: DeviceCode,
        reply: oneshot::Sender<Result<(), PairingError>>,
    },
    RejectPairing {
        code: DeviceCode,
        reply: oneshot::Sender<Result<(), PairingError>>,
    },
    /// Reply is dropped unanswered if the connection closes mid-batch
    SendFiles {
        code: DeviceCode,
        files: Vec<OutgoingFile>,
        reply: oneshot::Sender<Result<SendSummary, TransferError>>,
    },
    Restart {
        reply: oneshot::Sender<()>,
    },
    CurrentIdentity {
        reply: oneshot::Sender<DeviceCode>,
    },
    Status {
        reply: oneshot::Sender<SessionStatus>,
    },
    TrustedDevices {
        reply: oneshot::Sender<Vec<TrustedDevice>>,
    },
    SaveTrusted {
        code: DeviceCode,
        name: Option<String>,
        reply: oneshot::Sender<bool>,
    },
    RemoveTrusted {
        code: DeviceCode,
        reply: oneshot::Sender<bool>,
    },
    Peers {
        reply: oneshot::Sender<Vec<PeerSummary>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Connection table row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSummary {
    pub code: DeviceCode,
    pub state: &'static str,
}

// ----------------------------------------------------------------------------
// Application Events (Core Loop → Subscribers)
// ----------------------------------------------------------------------------

/// Local session status as shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Connecting,
    Online,
    Reconnecting,
    Offline,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionStatus::Connecting => "connecting",
            SessionStatus::Online => "online",
            SessionStatus::Reconnecting => "reconnecting",
            SessionStatus::Offline => "offline",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outbound,
    Inbound,
}

/// A fully reassembled inbound file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub file_id: FileId,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub payload: Arc<[u8]>,
    pub from: DeviceCode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    Status {
        status: SessionStatus,
    },
    /// Registered and reachable under this identity
    Ready {
        identity: DeviceCode,
    },
    /// Untrusted device asked to pair; answer with accept/reject
    PairingRequest {
        from: DeviceCode,
    },
    /// We accepted a pairing (automatically or explicitly)
    Connected {
        peer: DeviceCode,
    },
    /// The remote accepted our pairing request
    Paired {
        peer: DeviceCode,
    },
    Rejected {
        peer: DeviceCode,
    },
    Disconnected {
        peer: DeviceCode,
    },
    TransferStarted {
        peer: DeviceCode,
        file_id: FileId,
        name: String,
        size: u64,
        direction: Direction,
    },
    Progress {
        peer: DeviceCode,
        file_id: FileId,
        name: String,
        done: u64,
        total: u64,
        percent: u8,
        direction: Direction,
    },
    FileComplete(ReceivedFile),
    Error {
        message: String,
    },
}

impl AppEvent {
    pub fn error(message: impl Into<String>) -> Self {
        AppEvent::Error {
            message: message.into(),
        }
    }

    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            AppEvent::Status { .. } => "status",
            AppEvent::Ready { .. } => "ready",
            AppEvent::PairingRequest { .. } => "pairing-request",
            AppEvent::Connected { .. } => "connected",
            AppEvent::Paired { .. } => "paired",
            AppEvent::Rejected { .. } => "rejected",
            AppEvent::Disconnected { .. } => "disconnected",
            AppEvent::TransferStarted { .. } => "transfer-started",
            AppEvent::Progress { .. } => "progress",
            AppEvent::FileComplete(_) => "file-complete",
            AppEvent::Error { .. } => "error",
        }
    }
}
