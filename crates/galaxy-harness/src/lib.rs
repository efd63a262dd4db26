//! Galaxy Harness
//!
//! In-memory stand-in for the rendezvous service plus helpers for driving
//! engines in tests and demos:
//! - [`MemoryRendezvous`]: registration table with fault injection
//! - [`QueueGauge`]: controllable queued-bytes counter behind every link
//! - [`events`]: wait helpers over an engine's event stream

pub mod events;
pub mod link;
pub mod rendezvous;

pub use events::{collect_until, next_event_matching, EventWaitError, DEFAULT_EVENT_TIMEOUT};
pub use link::{memory_link, MemoryLink, MemorySink, QueueGauge};
pub use rendezvous::MemoryRendezvous;
