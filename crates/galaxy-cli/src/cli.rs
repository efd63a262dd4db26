//! Command-line interface definitions and parsing

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Directory holding the identity and trusted devices
    #[arg(short, long, global = true)]
    pub data_dir: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show or replace this device's code
    Identity {
        #[command(subcommand)]
        action: IdentityAction,
    },
    /// Manage trusted devices
    Trusted {
        #[command(subcommand)]
        action: TrustedAction,
    },
    /// Pair two local engines and send a file between them
    Demo {
        /// File to send
        #[arg(short, long)]
        file: PathBuf,
        /// MIME type announced to the receiver
        #[arg(short, long, default_value = "application/octet-stream")]
        mime: String,
    },
}

#[derive(Subcommand)]
pub enum IdentityAction {
    Show,
    /// Discard the current code and generate a new one
    Regenerate,
}

#[derive(Subcommand)]
pub enum TrustedAction {
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    Add {
        /// Device code, e.g. GT-ABC234
        code: String,
        /// Display name (defaults to "Device N")
        #[arg(short, long)]
        name: Option<String>,
    },
    Remove {
        code: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trusted_add() {
        let cli = Cli::parse_from(["galaxy", "-v", "trusted", "add", "gt-abc234", "--name", "Phone"]);
        assert!(cli.verbose);
        match cli.command {
            Commands::Trusted {
                action: TrustedAction::Add { code, name },
            } => {
                assert_eq!(code, "gt-abc234");
                assert_eq!(name.as_deref(), Some("Phone"));
            }
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn test_parse_demo_defaults_mime() {
        let cli = Cli::parse_from(["galaxy", "demo", "--file", "a.bin", "-d", "/tmp/g"]);
        assert_eq!(cli.data_dir.as_deref(), Some("/tmp/g"));
        match cli.command {
            Commands::Demo { file, mime } => {
                assert_eq!(file, PathBuf::from("a.bin"));
                assert_eq!(mime, "application/octet-stream");
            }
            _ => panic!("wrong command"),
        }
    }
}
