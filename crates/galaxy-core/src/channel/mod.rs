//! Channel schema between engine handles, the core loop and subscribers

pub mod communication;
pub mod utils;

pub use communication::{
    AppEvent, Command, Direction, FailedFile, FileSource, OutgoingFile, PeerSummary,
    ReceivedFile, SendSummary, SessionStatus,
};
