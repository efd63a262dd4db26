//! Device identity and trust management
//!
//! - `code`: pure device-code generator
//! - `storage`: key/value persistence backends
//! - `trust`: trusted-device records
//! - `store`: the identity & trust store the engine owns

pub mod code;
pub mod storage;
pub mod store;
pub mod trust;

pub use code::generate_code;
pub use storage::{create_test_storage, FileStorage, MemoryStorage, Storage};
pub use store::{IdentityRecord, IdentityStore};
pub use trust::TrustedDevice;
