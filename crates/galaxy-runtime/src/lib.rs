//! Galaxy Runtime
//!
//! The peer session and transfer engine. One core task owns the identity
//! store, the session lifecycle and every connection; callers talk to it
//! through an [`EngineHandle`] and watch the [`AppEvent`] broadcast.
//!
//! ```text
//! EngineHandle --Command--> core loop --AppEvent--> subscribers
//!                              |  ^
//!                   spawn      v  | internal events
//!      registration / dial / pump / transfer lane tasks
//! ```

mod engine;

pub mod builder;
pub mod handle;
pub mod lifecycle;
pub mod transfer;

pub use builder::{create_test_engine, EngineBuilder};
pub use handle::EngineHandle;
pub use lifecycle::{BringUpStep, LifecycleManager, LifecycleState};

// Re-export core types for convenience
pub use galaxy_core::{
    channel::utils::{AppEventReceiver, AppEventSender},
    AppEvent, DeviceCode, Direction, FailedFile, GalaxyConfig, GalaxyError, OutgoingFile,
    PeerSummary, ReceivedFile, Result, SendSummary, SessionStatus, TrustedDevice,
};
