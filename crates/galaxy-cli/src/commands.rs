//! Command handlers for the Galaxy CLI

use std::path::Path;
use std::time::Duration;

use galaxy_core::{DeviceCode, FileStorage, IdentityStore};
use galaxy_harness::{next_event_matching, MemoryRendezvous};
use galaxy_runtime::{
    AppEvent, AppEventReceiver, Direction, EngineBuilder, EngineHandle, OutgoingFile,
    ReceivedFile,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::cli::{Cli, Commands, IdentityAction, TrustedAction};
use crate::config::CliConfig;
use crate::error::{CliError, Result};

const DEMO_STEP_TIMEOUT: Duration = Duration::from_secs(30);

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    pub async fn execute(cli: Cli, config: CliConfig) -> Result<()> {
        match cli.command {
            Commands::Identity { action } => {
                let mut store = Self::open_store(&config)?;
                Self::handle_identity(&mut store, action);
                Ok(())
            }
            Commands::Trusted { action } => {
                let mut store = Self::open_store(&config)?;
                Self::handle_trusted(&mut store, &config, action)
            }
            Commands::Demo { file, mime } => Self::handle_demo(&config, &file, mime).await,
        }
    }

    /// Identity store backed by the data directory
    fn open_store(config: &CliConfig) -> Result<IdentityStore> {
        let dir = config.resolve_data_dir()?;
        std::fs::create_dir_all(&dir)?;
        let store = IdentityStore::open(
            Box::new(FileStorage::new(dir)),
            config.engine.identity.clone(),
        )
        .with_device_name_prefix(config.engine.pairing.device_name_prefix.clone());
        if store.is_degraded() {
            warn!("Could not read stored identity; changes will not be saved");
        }
        Ok(store)
    }

    // ------------------------------------------------------------------------
    // Identity & Trust
    // ------------------------------------------------------------------------

    fn handle_identity(store: &mut IdentityStore, action: IdentityAction) {
        match action {
            IdentityAction::Show => println!("{}", store.current_identity()),
            IdentityAction::Regenerate => {
                let code = store.regenerate_identity();
                println!("New device code: {}", code);
            }
        }
    }

    fn handle_trusted(
        store: &mut IdentityStore,
        config: &CliConfig,
        action: TrustedAction,
    ) -> Result<()> {
        match action {
            TrustedAction::List { json } => {
                let devices = store.list_trusted();
                if json {
                    println!("{}", serde_json::to_string_pretty(devices)?);
                } else if devices.is_empty() {
                    println!("No trusted devices");
                } else {
                    for device in devices {
                        println!("{}  {}", device.code, device.name);
                    }
                }
            }
            TrustedAction::Add { code, name } => {
                let code = DeviceCode::parse(&code, &config.engine.identity)?;
                if store.save_trusted(&code, name) {
                    println!("Trusted {}", code);
                } else {
                    println!("{} is already trusted", code);
                }
            }
            TrustedAction::Remove { code } => {
                let code = DeviceCode::parse(&code, &config.engine.identity)?;
                if store.remove_trusted(&code) {
                    println!("Removed {}", code);
                } else {
                    println!("{} was not trusted", code);
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Demo
    // ------------------------------------------------------------------------

    /// Two engines on an in-memory rendezvous: pair them, send `path`
    async fn handle_demo(config: &CliConfig, path: &Path, mime: String) -> Result<()> {
        let expected = tokio::fs::read(path).await?;
        let hub = MemoryRendezvous::new();

        let (sender, mut sender_events, sender_code) = start_engine(&hub, config).await?;
        let (receiver, receiver_events, receiver_code) = start_engine(&hub, config).await?;
        println!("Sender {} -> receiver {}", sender_code, receiver_code);

        let receiving = tokio::spawn(receive_file(receiver.clone(), receiver_events));

        sender.dial(&receiver_code).await?;
        let peer = receiver_code.clone();
        next_event_matching(&mut sender_events, DEMO_STEP_TIMEOUT, |e| {
            matches!(e, AppEvent::Paired { peer: p } if *p == peer)
        })
        .await
        .map_err(|e| CliError::Demo(format!("pairing did not complete: {}", e)))?;
        println!("Paired");

        let summary = sender
            .send_files(&receiver_code, vec![OutgoingFile::from_path(path, mime)])
            .await?;
        if let Some(failed) = summary.failed.first() {
            return Err(CliError::Demo(format!(
                "could not send {}: {}",
                failed.name, failed.reason
            )));
        }

        let received = tokio::time::timeout(DEMO_STEP_TIMEOUT, receiving)
            .await
            .map_err(|_| CliError::Demo("file never arrived".into()))?
            .map_err(|e| CliError::Demo(e.to_string()))??;

        if received.payload[..] != expected[..] {
            return Err(anyhow::anyhow!(
                "payload mismatch: sent {} bytes, received {}",
                expected.len(),
                received.payload.len()
            )
            .into());
        }
        println!(
            "Received {} ({} bytes, {}) intact",
            received.name, received.size, received.mime_type
        );

        sender.shutdown().await?;
        receiver.shutdown().await?;
        Ok(())
    }
}

async fn start_engine(
    hub: &MemoryRendezvous,
    config: &CliConfig,
) -> Result<(EngineHandle, AppEventReceiver, DeviceCode)> {
    let mut handle = EngineBuilder::new(hub.clone())
        .with_config(config.engine.clone())
        .build_and_start()
        .await?;
    let mut events = handle
        .take_app_event_receiver()
        .ok_or_else(|| CliError::Demo("event receiver already taken".into()))?;

    let ready = next_event_matching(&mut events, DEMO_STEP_TIMEOUT, |e| {
        matches!(e, AppEvent::Ready { .. })
    })
    .await
    .map_err(|e| CliError::Demo(format!("engine did not come online: {}", e)))?;
    match ready {
        AppEvent::Ready { identity } => Ok((handle, events, identity)),
        other => Err(CliError::Demo(format!("unexpected event {}", other.kind()))),
    }
}

/// Accept the first pairing prompt, report progress and return the file
async fn receive_file(receiver: EngineHandle, mut events: AppEventReceiver) -> Result<ReceivedFile> {
    loop {
        match events.recv().await {
            Ok(AppEvent::PairingRequest { from }) => {
                info!("{} wants to pair; accepting", from);
                receiver.accept_pairing(&from).await?;
            }
            Ok(AppEvent::Progress {
                name,
                done,
                total,
                percent,
                direction: Direction::Inbound,
                ..
            }) => println!("  {} chunk {}/{} ({}%)", name, done, total, percent),
            Ok(AppEvent::FileComplete(file)) => return Ok(file),
            Ok(AppEvent::Error { message }) => warn!("{}", message),
            Ok(_) => {}
            Err(RecvError::Lagged(n)) => warn!("Missed {} events", n),
            Err(RecvError::Closed) => return Err(CliError::Demo("receiver stopped".into())),
        }
    }
}
