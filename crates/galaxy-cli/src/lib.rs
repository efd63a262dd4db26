//! Galaxy CLI library
//!
//! Argument parsing, configuration loading and command handlers for the
//! `galaxy` binary.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;

pub use cli::{Cli, Commands, IdentityAction, TrustedAction};
pub use commands::CommandDispatcher;
pub use config::CliConfig;
pub use error::{CliError, Result};
