//! Host implementations for running the engine without a page or a window.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace};
use url::Url;

use super::resource::ResourceRegistry;
use super::traits::{
    EmbedOptions, EmbeddedEvent, EmbeddedPlayer, EmbeddedPlayerApi, MediaSurface, ScriptHost,
};
use crate::models::ContainerId;

/// Media surface that validates sources and simulates a playback clock.
pub struct HeadlessSurface {
    registry: ResourceRegistry,
    loaded: Option<String>,
    base_position: f64,
    playing_since: Option<Instant>,
}

impl HeadlessSurface {
    pub fn new(registry: ResourceRegistry) -> Self {
        Self {
            registry,
            loaded: None,
            base_position: 0.0,
            playing_since: None,
        }
    }

    pub fn loaded_url(&self) -> Option<&str> {
        self.loaded.as_deref()
    }

    fn position(&self) -> f64 {
        match self.playing_since {
            Some(since) => self.base_position + since.elapsed().as_secs_f64(),
            None => self.base_position,
        }
    }

    fn require_loaded(&self) -> Result<()> {
        if self.loaded.is_none() {
            return Err(anyhow!("No media loaded"));
        }
        Ok(())
    }
}

#[async_trait]
impl MediaSurface for HeadlessSurface {
    async fn load_media(&mut self, url: &str) -> Result<()> {
        if url.starts_with("blob:") {
            let data = self
                .registry
                .resolve(url)
                .ok_or_else(|| anyhow!("Resource {} is not live", url))?;
            debug!("Headless surface loaded {} ({} bytes)", url, data.len());
        } else {
            Url::parse(url).map_err(|e| anyhow!("Invalid media URL {}: {}", url, e))?;
            debug!("Headless surface loaded {}", url);
        }

        self.loaded = Some(url.to_string());
        self.base_position = 0.0;
        self.playing_since = None;
        Ok(())
    }

    async fn play(&mut self) -> Result<()> {
        self.require_loaded()?;
        if self.playing_since.is_none() {
            self.playing_since = Some(Instant::now());
        }
        Ok(())
    }

    async fn pause(&mut self) -> Result<()> {
        self.base_position = self.position();
        self.playing_since = None;
        Ok(())
    }

    async fn seek(&mut self, position_seconds: f64) -> Result<()> {
        self.require_loaded()?;
        trace!("Headless surface seek to {:.2}s", position_seconds);
        self.base_position = position_seconds.max(0.0);
        if self.playing_since.is_some() {
            self.playing_since = Some(Instant::now());
        }
        Ok(())
    }

    async fn get_position(&self) -> Option<f64> {
        self.loaded.as_ref().map(|_| self.position())
    }

    async fn is_paused(&self) -> bool {
        self.playing_since.is_none()
    }

    async fn unload(&mut self) -> Result<()> {
        self.loaded = None;
        self.base_position = 0.0;
        self.playing_since = None;
        Ok(())
    }
}

/// Script registry standing in for a page document.
#[derive(Default)]
pub struct HeadlessScriptHost {
    scripts: Mutex<HashSet<String>>,
}

impl HeadlessScriptHost {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ScriptHost for HeadlessScriptHost {
    fn has_script(&self, src: &str) -> bool {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(src)
    }

    fn inject_script(&self, src: &str) -> Result<()> {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(src.to_string());
        Ok(())
    }
}

/// Vendor API that never loads. Embedded backends time out and fall back.
#[derive(Debug, Default)]
pub struct UnavailableEmbeddedApi;

impl EmbeddedPlayerApi for UnavailableEmbeddedApi {
    fn is_ready(&self) -> bool {
        false
    }

    fn create_player(
        &self,
        _container: &ContainerId,
        _options: &EmbedOptions,
        _events: mpsc::UnboundedSender<EmbeddedEvent>,
    ) -> Result<Box<dyn EmbeddedPlayer>> {
        Err(anyhow!("Embedded player API is not available in headless mode"))
    }
}
