use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use super::controller::{EngineHandle, PlaybackEngine};
use super::headless::{HeadlessScriptHost, HeadlessSurface, UnavailableEmbeddedApi};
use super::resource::ResourceRegistry;
use super::stream_fetcher::{HttpStreamClient, StreamClient};
use super::traits::{EmbeddedPlayerApi, MediaSurface, ScriptHost};
use crate::config::Config;

/// The host capabilities an engine drives.
pub struct EngineHosts {
    pub surface: Box<dyn MediaSurface>,
    pub script_host: Arc<dyn ScriptHost>,
    pub embedded_api: Arc<dyn EmbeddedPlayerApi>,
    pub stream_client: Arc<dyn StreamClient>,
    pub registry: ResourceRegistry,
}

impl EngineHosts {
    /// Hosts for running outside a page: real HTTP transport, a simulated
    /// media surface and no embedded player vendor.
    pub fn headless(config: &Config) -> Result<Self> {
        info!("Creating headless playback hosts");
        let registry = ResourceRegistry::new();
        Ok(Self {
            surface: Box::new(HeadlessSurface::new(registry.clone())),
            script_host: Arc::new(HeadlessScriptHost::new()),
            embedded_api: Arc::new(UnavailableEmbeddedApi),
            stream_client: Arc::new(HttpStreamClient::new(&config.network)?),
            registry,
        })
    }
}

/// Builds an engine and spawns its event loop on the current runtime.
pub fn spawn_engine(config: &Config, hosts: EngineHosts) -> EngineHandle {
    let (handle, engine) = PlaybackEngine::new(config, hosts);
    tokio::spawn(engine.run());
    handle
}
