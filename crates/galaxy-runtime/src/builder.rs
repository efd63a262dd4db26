//! Engine builder

use std::sync::Arc;

use galaxy_core::channel::utils::{create_app_event_channel, create_command_channel};
use galaxy_core::{
    GalaxyConfig, GalaxyError, IdentityStore, MemoryStorage, Rendezvous, Result, Storage,
};
use tracing::info;

use crate::engine::Engine;
use crate::handle::EngineHandle;

// ----------------------------------------------------------------------------
// Engine Builder
// ----------------------------------------------------------------------------

/// Wires a rendezvous service, storage and configuration into a running engine
pub struct EngineBuilder {
    rendezvous: Arc<dyn Rendezvous>,
    config: GalaxyConfig,
    storage: Option<Box<dyn Storage>>,
}

impl EngineBuilder {
    pub fn new(rendezvous: impl Rendezvous) -> Self {
        Self::from_shared(Arc::new(rendezvous))
    }

    pub fn from_shared(rendezvous: Arc<dyn Rendezvous>) -> Self {
        Self {
            rendezvous,
            config: GalaxyConfig::default(),
            storage: None,
        }
    }

    pub fn with_config(mut self, config: GalaxyConfig) -> Self {
        self.config = config;
        self
    }

    /// Defaults to in-memory storage, which forgets everything on exit
    pub fn with_storage(mut self, storage: impl Storage + 'static) -> Self {
        self.storage = Some(Box::new(storage));
        self
    }

    /// Validate the configuration, load the identity and start the core loop
    pub async fn build_and_start(self) -> Result<EngineHandle> {
        self.config.validate().map_err(GalaxyError::config)?;

        let storage = self
            .storage
            .unwrap_or_else(|| Box::new(MemoryStorage::new()));
        let store = IdentityStore::open(storage, self.config.identity.clone())
            .with_device_name_prefix(self.config.pairing.device_name_prefix.clone());
        if store.is_degraded() {
            info!("Identity storage unavailable; running without persistence");
        }

        let (command_sender, command_receiver) = create_command_channel(&self.config.channels);
        let (event_sender, first_events) = create_app_event_channel(&self.config.channels);

        let engine = Engine::new(
            self.config,
            self.rendezvous,
            store,
            command_receiver,
            event_sender.clone(),
        );
        tokio::spawn(engine.run());

        info!("Engine started");
        Ok(EngineHandle::new(command_sender, event_sender, first_events))
    }
}

// ----------------------------------------------------------------------------
// Convenience Functions
// ----------------------------------------------------------------------------

/// Start an engine with in-memory storage and fast test timings
pub async fn create_test_engine(rendezvous: impl Rendezvous) -> Result<EngineHandle> {
    EngineBuilder::new(rendezvous)
        .with_config(GalaxyConfig::testing())
        .build_and_start()
        .await
}
