//! Error types for the Galaxy protocol
//!
//! Each concern (dialing, pairing, transfers, rendezvous, storage, wire
//! protocol) has its own error enum. [`GalaxyError`] unifies them for callers
//! that do not care which layer failed.

use thiserror::Error;

use crate::types::DeviceCode;

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Errors returned synchronously from a dial attempt
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DialError {
    #[error("Cannot dial our own device code")]
    SelfDial,
    #[error("A connection to {code} already exists")]
    Duplicate { code: DeviceCode },
    #[error("Session is not online (currently {state})")]
    NotReady { state: String },
    #[error("Peer {code} is unavailable")]
    PeerUnavailable { code: DeviceCode },
    #[error("Dial aborted before the channel opened to {code}")]
    Aborted { code: DeviceCode },
    #[error("Rendezvous transport failure: {reason}")]
    Transport { reason: String },
}

/// Errors from local pairing decisions
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PairingError {
    #[error("No pairing request pending from {code}")]
    NoPendingRequest { code: DeviceCode },
    #[error("Connection to {code} is in state {state}, expected Pending")]
    InvalidState { code: DeviceCode, state: String },
}

/// Errors from the transfer engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("No paired connection to {code}")]
    NotPaired { code: DeviceCode },
    #[error("Connection to {code} closed during transfer")]
    ConnectionClosed { code: DeviceCode },
    #[error("Failed to read {name}: {reason}")]
    FileRead { name: String, reason: String },
}

/// Errors reported by a rendezvous collaborator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RendezvousError {
    #[error("Device code {code} is already registered")]
    IdUnavailable { code: DeviceCode },
    #[error("Peer {code} is not reachable")]
    PeerUnavailable { code: DeviceCode },
    #[error("Rendezvous transport error: {reason}")]
    Transport { reason: String },
    #[error("Registration timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },
    #[error("Channel is closed")]
    Closed,
}

/// Errors from persistent storage backends
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage unavailable: {reason}")]
    Unavailable { reason: String },
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from parsing codes and wire frames
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Invalid device code {input:?}: {reason}")]
    InvalidCode { input: String, reason: String },
    #[error("Malformed control message: {reason}")]
    Malformed { reason: String },
}

// ----------------------------------------------------------------------------
// Main Error Type
// ----------------------------------------------------------------------------

/// Unified error type for the Galaxy engine
#[derive(Debug, Error)]
pub enum GalaxyError {
    #[error("Dial error: {0}")]
    Dial(#[from] DialError),

    #[error("Pairing error: {0}")]
    Pairing(#[from] PairingError),

    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("Rendezvous error: {0}")]
    Rendezvous(#[from] RendezvousError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    #[error("Engine is not running")]
    EngineStopped,
}

impl GalaxyError {
    /// Create a configuration error
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Whether the error came from an operation on a closed connection
    pub fn is_connection_closed(&self) -> bool {
        matches!(
            self,
            GalaxyError::Transfer(TransferError::ConnectionClosed { .. })
        )
    }
}

/// Result type alias for Galaxy operations
pub type Result<T> = std::result::Result<T, GalaxyError>;

impl From<RendezvousError> for DialError {
    fn from(err: RendezvousError) -> Self {
        match err {
            RendezvousError::PeerUnavailable { code } => DialError::PeerUnavailable { code },
            other => DialError::Transport {
                reason: other.to_string(),
            },
        }
    }
}
