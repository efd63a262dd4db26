//! Galaxy CLI configuration
//!
//! A TOML file with an `[engine]` table mirroring `GalaxyConfig` and an
//! optional `data_dir`. Missing keys fall back to defaults.

use std::path::PathBuf;

use galaxy_core::GalaxyConfig;
use serde::{Deserialize, Serialize};

use crate::error::{CliError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub engine: GalaxyConfig,
    pub data_dir: Option<PathBuf>,
}

impl CliConfig {
    pub fn load_from_file(path: &str) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.engine.validate().map_err(CliError::Config)?;
        Ok(config)
    }

    /// Configured data directory, else `<platform data dir>/galaxy`
    pub fn resolve_data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => dirs::data_dir()
                .map(|dir| dir.join("galaxy"))
                .ok_or_else(|| CliError::Config("no data directory on this platform".into())),
        }
    }
}
