use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::models::{ContainerId, EmbeddedVideoId};

/// Direct media element used for authenticated streams and plain file URLs.
/// Positions are media-local seconds.
#[async_trait]
pub trait MediaSurface: Send + Sync {
    async fn load_media(&mut self, url: &str) -> Result<()>;
    /// May be rejected by the host (autoplay restrictions).
    async fn play(&mut self) -> Result<()>;
    async fn pause(&mut self) -> Result<()>;
    async fn seek(&mut self, position_seconds: f64) -> Result<()>;
    async fn get_position(&self) -> Option<f64>;
    async fn is_paused(&self) -> bool;
    async fn unload(&mut self) -> Result<()>;
}

/// The page document vendor scripts are injected into. Scripts are never removed.
pub trait ScriptHost: Send + Sync {
    fn has_script(&self, src: &str) -> bool;
    fn inject_script(&self, src: &str) -> Result<()>;
}

/// Vendor player API, available once its script has finished loading.
pub trait EmbeddedPlayerApi: Send + Sync {
    fn is_ready(&self) -> bool;

    /// Mounts a player in `container`. Lifecycle callbacks arrive on `events`.
    fn create_player(
        &self,
        container: &ContainerId,
        options: &EmbedOptions,
        events: mpsc::UnboundedSender<EmbeddedEvent>,
    ) -> Result<Box<dyn EmbeddedPlayer>>;
}

/// One mounted vendor player. Times are seconds into the video.
pub trait EmbeddedPlayer: Send {
    fn play(&mut self) -> Result<()>;
    fn pause(&mut self) -> Result<()>;
    fn seek_to(&mut self, seconds: f64, allow_seek_ahead: bool) -> Result<()>;
    /// Fails while the player is loading or seeking.
    fn current_time(&self) -> Result<f64>;
    /// May fail when called mid-initialization.
    fn destroy(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddedPlayerState {
    Unstarted,
    Ended,
    Playing,
    Paused,
    Buffering,
    Cued,
}

impl EmbeddedPlayerState {
    /// Maps the vendor's numeric state codes.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -1 => Some(Self::Unstarted),
            0 => Some(Self::Ended),
            1 => Some(Self::Playing),
            2 => Some(Self::Paused),
            3 => Some(Self::Buffering),
            5 => Some(Self::Cued),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbeddedEvent {
    Ready,
    StateChange(EmbeddedPlayerState),
    Error(i32),
}

/// Construction parameters for a vendor player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedOptions {
    pub video_id: EmbeddedVideoId,
    pub start_seconds: u64,
    pub autoplay: bool,
    pub origin: String,
}

#[derive(Serialize)]
struct PlayerVars<'a> {
    start: u64,
    autoplay: u8,
    controls: u8,
    modestbranding: u8,
    rel: u8,
    playsinline: u8,
    origin: &'a str,
}

impl EmbedOptions {
    pub fn new(video_id: EmbeddedVideoId, start_seconds: f64, autoplay: bool, origin: &str) -> Self {
        Self {
            video_id,
            start_seconds: start_seconds.max(0.0).floor() as u64,
            autoplay,
            origin: origin.to_string(),
        }
    }

    /// The vendor's `playerVars` object.
    pub fn player_vars(&self) -> serde_json::Value {
        let vars = PlayerVars {
            start: self.start_seconds,
            autoplay: u8::from(self.autoplay),
            controls: 1,
            modestbranding: 1,
            rel: 0,
            playsinline: 1,
            origin: &self.origin,
        };
        serde_json::to_value(vars).unwrap_or_default()
    }
}
