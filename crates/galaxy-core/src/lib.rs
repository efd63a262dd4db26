//! Galaxy Core
//!
//! Types shared by the Galaxy peer session and transfer engine:
//! device codes and the identity & trust store, the wire protocol, the
//! per-connection state machine, transfer bookkeeping, the rendezvous
//! collaborator traits, configuration and errors.
//!
//! The engine itself lives in `galaxy-runtime`.

pub mod channel;
pub mod config;
pub mod errors;
pub mod identity;
pub mod protocol;
pub mod rendezvous;
pub mod types;

pub use channel::{
    AppEvent, Command, Direction, FailedFile, FileSource, OutgoingFile, PeerSummary,
    ReceivedFile, SendSummary, SessionStatus,
};
pub use config::{
    ChannelConfig, GalaxyConfig, IdentityConfig, LifecycleConfig, PairingConfig, TransferConfig,
};
pub use errors::{
    DialError, GalaxyError, PairingError, ProtocolError, RendezvousError, Result, StorageError,
    TransferError,
};
pub use identity::{
    create_test_storage, FileStorage, IdentityStore, MemoryStorage, Storage, TrustedDevice,
};
pub use protocol::{ControlMessage, FileId, WireFrame};
pub use rendezvous::{ChannelEvent, ChannelSink, PeerChannel, Registration, Rendezvous};
pub use types::{DeviceCode, Timestamp};
