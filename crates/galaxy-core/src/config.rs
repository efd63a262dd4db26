//! Centralized Configuration Management
//!
//! All tunables for identity generation, session bring-up, pairing, transfers
//! and internal channels. Every struct has a production `Default` and a
//! `testing()` preset with short delays.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Alphabet without visually confusable characters (no 0/O, 1/I)
pub const DEFAULT_CODE_ALPHABET: &str = "ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

// ----------------------------------------------------------------------------
// Identity Configuration
// ----------------------------------------------------------------------------

/// Shape of generated device codes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Fixed prefix prepended to every code
    pub prefix: String,
    /// Number of random characters after the prefix
    pub length: usize,
    /// Characters a code may be drawn from
    pub alphabet: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            prefix: "GT-".to_string(),
            length: 6,
            alphabet: DEFAULT_CODE_ALPHABET.to_string(),
        }
    }
}

// ----------------------------------------------------------------------------
// Lifecycle Configuration
// ----------------------------------------------------------------------------

/// Registration retry and backoff policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Maximum transport-failure retries per bring-up round
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_retry_delay: Duration,
    /// Exponential backoff multiplier
    pub backoff_multiplier: f32,
    /// Upper bound on any single retry delay
    pub max_retry_delay: Duration,
    /// How long a single register call may take
    pub registration_timeout: Duration,
    /// Total time a bring-up round may take before it is abandoned
    pub bring_up_window: Duration,
    /// Identity regenerations allowed after a round is exhausted
    pub max_regenerations: u32,
    /// Pause before registering a regenerated identity
    pub regeneration_delay: Duration,
    /// Pause before registering a fresh code after a conflict
    pub conflict_retry_delay: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_retry_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_retry_delay: Duration::from_secs(5),
            registration_timeout: Duration::from_secs(8),
            bring_up_window: Duration::from_secs(60),
            max_regenerations: 1,
            regeneration_delay: Duration::from_secs(1),
            conflict_retry_delay: Duration::from_millis(500),
        }
    }
}

impl LifecycleConfig {
    /// Create configuration optimized for testing (fast retries)
    pub fn testing() -> Self {
        Self {
            max_retries: 2,
            initial_retry_delay: Duration::from_millis(10),
            backoff_multiplier: 2.0,
            max_retry_delay: Duration::from_millis(40),
            registration_timeout: Duration::from_millis(500),
            bring_up_window: Duration::from_secs(5),
            max_regenerations: 1,
            regeneration_delay: Duration::from_millis(10),
            conflict_retry_delay: Duration::from_millis(10),
        }
    }
}

// ----------------------------------------------------------------------------
// Pairing Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PairingConfig {
    /// Delay between sending a rejection and closing the channel
    pub reject_grace: Duration,
    /// Display name prefix for newly trusted devices ("Device 3")
    pub device_name_prefix: String,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            reject_grace: Duration::from_millis(500),
            device_name_prefix: "Device".to_string(),
        }
    }
}

impl PairingConfig {
    pub fn testing() -> Self {
        Self {
            reject_grace: Duration::from_millis(20),
            ..Self::default()
        }
    }
}

// ----------------------------------------------------------------------------
// Transfer Configuration
// ----------------------------------------------------------------------------

/// Chunking and flow-control settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Maximum bytes per binary chunk frame
    pub chunk_size: usize,
    /// Queued bytes above which sending pauses
    pub high_water_mark: usize,
    /// Fallback re-check interval while paused
    pub drain_poll_interval: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
            high_water_mark: 4 * 1024 * 1024,
            drain_poll_interval: Duration::from_millis(50),
        }
    }
}

impl TransferConfig {
    pub fn testing() -> Self {
        Self {
            drain_poll_interval: Duration::from_millis(5),
            ..Self::default()
        }
    }
}

// ----------------------------------------------------------------------------
// Channel Configuration
// ----------------------------------------------------------------------------

/// Configuration for internal channel buffer sizes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Buffer size for Command channels (handle → engine)
    pub command_buffer_size: usize,
    /// Capacity of the AppEvent broadcast (engine → subscribers)
    pub app_event_buffer_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            command_buffer_size: 32,
            app_event_buffer_size: 256,
        }
    }
}

impl ChannelConfig {
    pub fn testing() -> Self {
        Self {
            command_buffer_size: 16,
            app_event_buffer_size: 1024,
        }
    }
}

// ----------------------------------------------------------------------------
// Main Configuration
// ----------------------------------------------------------------------------

/// Complete engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GalaxyConfig {
    pub identity: IdentityConfig,
    pub lifecycle: LifecycleConfig,
    pub pairing: PairingConfig,
    pub transfer: TransferConfig,
    pub channels: ChannelConfig,
}

impl GalaxyConfig {
    /// Create configuration optimized for testing
    pub fn testing() -> Self {
        Self {
            identity: IdentityConfig::default(),
            lifecycle: LifecycleConfig::testing(),
            pairing: PairingConfig::testing(),
            transfer: TransferConfig::testing(),
            channels: ChannelConfig::testing(),
        }
    }

    pub fn with_lifecycle(mut self, lifecycle: LifecycleConfig) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    pub fn with_transfer(mut self, transfer: TransferConfig) -> Self {
        self.transfer = transfer;
        self
    }

    /// Validate the configuration for consistency and feasibility
    pub fn validate(&self) -> Result<(), String> {
        if self.identity.length == 0 {
            return Err("Device code length cannot be zero".into());
        }
        if self.identity.alphabet.chars().count() < 2 {
            return Err("Device code alphabet needs at least two characters".into());
        }
        if self.lifecycle.backoff_multiplier < 1.0 {
            return Err("Backoff multiplier cannot be less than 1.0".into());
        }
        if self.lifecycle.conflict_retry_delay.is_zero() {
            return Err("Conflict retry delay cannot be zero".into());
        }
        if self.lifecycle.initial_retry_delay > self.lifecycle.max_retry_delay {
            return Err("Initial retry delay cannot be greater than max retry delay".into());
        }
        if self.transfer.chunk_size == 0 {
            return Err("Chunk size cannot be zero".into());
        }
        if self.transfer.drain_poll_interval.is_zero() {
            return Err("Drain poll interval cannot be zero".into());
        }
        if self.channels.command_buffer_size == 0 {
            return Err("Command buffer size cannot be zero".into());
        }
        if self.channels.app_event_buffer_size == 0 {
            return Err("App event buffer size cannot be zero".into());
        }
        Ok(())
    }
}
