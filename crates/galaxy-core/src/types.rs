//! Core types for the Galaxy protocol
//!
//! Newtypes for device codes and timestamps, validated at the edges so the
//! rest of the engine can pass them around freely.

use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::IdentityConfig;
use crate::errors::ProtocolError;

// ----------------------------------------------------------------------------
// Device Code
// ----------------------------------------------------------------------------

/// Short human-shareable code identifying a device to the rendezvous service
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceCode(String);

impl DeviceCode {
    /// Parse user input into a code, normalising case and surrounding whitespace
    pub fn parse(input: &str, config: &IdentityConfig) -> Result<Self, ProtocolError> {
        let normalized = input.trim().to_uppercase();
        let invalid = |reason: String| ProtocolError::InvalidCode {
            input: input.to_string(),
            reason,
        };

        let body = normalized
            .strip_prefix(config.prefix.as_str())
            .ok_or_else(|| invalid(format!("must start with {}", config.prefix)))?;

        if body.chars().count() != config.length {
            return Err(invalid(format!(
                "expected {} characters after the prefix",
                config.length
            )));
        }

        if let Some(bad) = body.chars().find(|c| !config.alphabet.contains(*c)) {
            return Err(invalid(format!("character {bad:?} is not allowed")));
        }

        Ok(Self(normalized))
    }

    /// Wrap a code without validation (wire input and tests)
    pub fn new_unchecked(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DeviceCode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s, &IdentityConfig::default())
    }
}

impl AsRef<str> for DeviceCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Milliseconds since the UNIX epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Current wall-clock time
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as u64)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

impl Add<u64> for Timestamp {
    type Output = Timestamp;

    fn add(self, other: u64) -> Timestamp {
        Timestamp(self.0.saturating_add(other))
    }
}

impl Sub for Timestamp {
    type Output = u64;

    fn sub(self, other: Timestamp) -> u64 {
        self.0.saturating_sub(other.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
