//! Trusted device records

use serde::{Deserialize, Serialize};

use crate::types::{DeviceCode, Timestamp};

/// A remote device we have completed pairing with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustedDevice {
    pub code: DeviceCode,
    pub name: String,
    pub first_paired: Timestamp,
}

impl TrustedDevice {
    pub fn new(code: DeviceCode, name: impl Into<String>) -> Self {
        Self {
            code,
            name: name.into(),
            first_paired: Timestamp::now(),
        }
    }
}
