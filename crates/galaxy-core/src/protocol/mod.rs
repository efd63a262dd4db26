//! Wire protocol, connection state machine and transfer bookkeeping

pub mod connection_state;
pub mod file_transfer;
pub mod frame;
pub mod message;

pub use connection_state::{
    AuditEntry, Awaiting, CloseReason, ConnectionEffect, ConnectionEvent, ConnectionState,
    PairingNotice, StateTransition, StateTransitionError,
};
pub use file_transfer::{
    chunk_count, chunk_range, percent, ChunkProgress, CompletedFile, FileId, FileMetadata,
    InboundTransfer, InboundTransfers, OutboundProgress,
};
pub use frame::{InboundFrame, WireFrame};
pub use message::ControlMessage;
