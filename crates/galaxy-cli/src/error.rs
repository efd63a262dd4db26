//! Error handling for the Galaxy CLI

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Galaxy error: {0}")]
    Galaxy(#[from] galaxy_core::GalaxyError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Demo failed: {0}")]
    Demo(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> Self {
        CliError::Demo(err.to_string())
    }
}

impl From<galaxy_core::ProtocolError> for CliError {
    fn from(err: galaxy_core::ProtocolError) -> Self {
        CliError::Galaxy(err.into())
    }
}
