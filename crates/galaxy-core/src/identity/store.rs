//! Identity & trust store
//!
//! Owns this device's persistent code and the list of trusted remote codes.
//! Storage failures never propagate: the store logs a warning and continues
//! with in-memory state for the rest of the session.

use rand_core::OsRng;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::IdentityConfig;
use crate::errors::StorageError;
use crate::identity::code::generate_code;
use crate::identity::storage::Storage;
use crate::identity::trust::TrustedDevice;
use crate::types::{DeviceCode, Timestamp};

const IDENTITY_KEY: &str = "identity";
const TRUSTED_KEY: &str = "trusted_devices";

/// Persisted identity record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRecord {
    pub code: DeviceCode,
    pub created_at: Timestamp,
}

pub struct IdentityStore {
    storage: Box<dyn Storage>,
    config: IdentityConfig,
    device_name_prefix: String,
    identity: Option<DeviceCode>,
    trusted: Vec<TrustedDevice>,
    degraded: bool,
}

impl IdentityStore {
    /// Open the store, loading any persisted identity and trusted devices
    pub fn open(storage: Box<dyn Storage>, config: IdentityConfig) -> Self {
        let mut store = Self {
            storage,
            config,
            device_name_prefix: "Device".to_string(),
            identity: None,
            trusted: Vec::new(),
            degraded: false,
        };

        if let Some(record) = store.load::<IdentityRecord>(IDENTITY_KEY) {
            debug!("Loaded persisted identity {}", record.code);
            store.identity = Some(record.code);
        }
        if let Some(trusted) = store.load::<Vec<TrustedDevice>>(TRUSTED_KEY) {
            store.trusted = trusted;
        }

        store
    }

    /// Set the display-name prefix used for new trusted devices
    pub fn with_device_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.device_name_prefix = prefix.into();
        self
    }

    /// Whether storage failed and the store is running memory-only
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    // ------------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------------

    /// Persisted identity, generated and persisted on first use
    pub fn current_identity(&mut self) -> DeviceCode {
        match &self.identity {
            Some(code) => code.clone(),
            None => self.regenerate_identity(),
        }
    }

    /// Discard the current identity and persist a fresh one
    pub fn regenerate_identity(&mut self) -> DeviceCode {
        let code = generate_code(&self.config, &mut OsRng);
        let record = IdentityRecord {
            code: code.clone(),
            created_at: Timestamp::now(),
        };
        self.persist(IDENTITY_KEY, &record);

        match self.identity.replace(code.clone()) {
            Some(old) => info!("Regenerated identity {} -> {}", old, code),
            None => info!("Generated identity {}", code),
        }
        code
    }

    // ------------------------------------------------------------------------
    // Trust
    // ------------------------------------------------------------------------

    pub fn is_trusted(&self, code: &DeviceCode) -> bool {
        self.trusted.iter().any(|d| &d.code == code)
    }

    /// Record a device as trusted; returns false if it was already present
    ///
    /// Without a name the device is called "Device N" where N is its position
    /// in the list.
    pub fn save_trusted(&mut self, code: &DeviceCode, name: Option<String>) -> bool {
        if self.is_trusted(code) {
            return false;
        }

        let name = name.unwrap_or_else(|| {
            format!("{} {}", self.device_name_prefix, self.trusted.len() + 1)
        });
        info!("Trusting device {} as {:?}", code, name);
        self.trusted.push(TrustedDevice::new(code.clone(), name));
        self.persist_trusted();
        true
    }

    /// Forget a trusted device; returns false if it was unknown
    pub fn remove_trusted(&mut self, code: &DeviceCode) -> bool {
        let before = self.trusted.len();
        self.trusted.retain(|d| &d.code != code);
        if self.trusted.len() == before {
            return false;
        }
        info!("Removed trusted device {}", code);
        self.persist_trusted();
        true
    }

    /// Trusted devices in the order they were first paired
    pub fn list_trusted(&self) -> &[TrustedDevice] {
        &self.trusted
    }

    pub fn trusted_device(&self, code: &DeviceCode) -> Option<&TrustedDevice> {
        self.trusted.iter().find(|d| &d.code == code)
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    fn persist_trusted(&mut self) {
        let trusted = self.trusted.clone();
        self.persist(TRUSTED_KEY, &trusted);
    }

    fn load<T: DeserializeOwned>(&mut self, key: &str) -> Option<T> {
        if self.degraded {
            return None;
        }
        let result = self.storage.retrieve(key).and_then(|data| match data {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(StorageError::from),
            None => Ok(None),
        });
        match result {
            Ok(value) => value,
            Err(e) => {
                self.degrade(key, &e);
                None
            }
        }
    }

    fn persist<T: Serialize>(&mut self, key: &str, value: &T) {
        if self.degraded {
            return;
        }
        let result = serde_json::to_vec(value)
            .map_err(StorageError::from)
            .and_then(|bytes| self.storage.store(key, bytes));
        if let Err(e) = result {
            self.degrade(key, &e);
        }
    }

    fn degrade(&mut self, key: &str, error: &StorageError) {
        warn!(
            "Storage failed for {:?} ({}); continuing with in-memory state",
            key, error
        );
        self.degraded = true;
    }
}

impl std::fmt::Debug for IdentityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityStore")
            .field("identity", &self.identity)
            .field("trusted", &self.trusted.len())
            .field("degraded", &self.degraded)
            .finish()
    }
}
