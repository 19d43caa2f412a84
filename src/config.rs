use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::models::Credential;

/// Environment variable consulted when no API key is configured.
pub const API_KEY_ENV: &str = "TOURPLAY_API_KEY";

/// Fastest allowed position report cadence (2 Hz).
pub const MIN_POSITION_INTERVAL: Duration = Duration::from_millis(500);
/// Fastest allowed readiness poll.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub playback: PlaybackConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub embedded: EmbeddedConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default = "default_true")]
    pub autoplay: bool,

    /// Milliseconds between position reports while playing
    #[serde(default = "default_position_interval")]
    pub position_interval_ms: u64,

    /// Seconds of drift tolerated from the embedded player before seeking
    #[serde(default = "default_embedded_tolerance")]
    pub embedded_drift_tolerance: f64,

    /// Seconds of drift tolerated from the direct media surface before seeking
    #[serde(default = "default_direct_tolerance")]
    pub direct_drift_tolerance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_timeout")]
    pub connection_timeout: u64,

    #[serde(default = "default_max_stream_bytes")]
    pub max_stream_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Base for relative stream URLs, e.g. a local proxy in front of the
    /// retrieval service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default = "default_partition_header")]
    pub partition_header: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddedConfig {
    #[serde(default = "default_script_url")]
    pub script_url: String,

    #[serde(default = "default_poll_interval")]
    pub api_poll_interval_ms: u64,

    #[serde(default = "default_ready_timeout")]
    pub api_ready_timeout_secs: u64,

    /// Page origin handed to the vendor player
    #[serde(default = "default_origin")]
    pub origin: String,
}

impl Config {
    /// Loads the platform config file, then applies the environment key.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        Ok(Self::load_from(&config_path)?.with_env_credential())
    }

    /// Loads the file at `path`, writing a default config there if it is missing.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            debug!("Loading config from {:?}", path);
            let contents = fs::read_to_string(path).context("Failed to read config file")?;
            let config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            info!("Config loaded successfully");
            Ok(config)
        } else {
            info!("No config file found, using defaults");
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents).context("Failed to write config file")?;

        debug!("Config saved to {:?}", path);
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("Failed to get config directory")?;
        Ok(config_dir.join("tourplay").join("config.toml"))
    }

    /// Configured API key. A blank key counts as missing.
    pub fn credential(&self) -> Option<Credential> {
        self.stream
            .api_key
            .as_deref()
            .map(Credential::new)
            .filter(|credential| !credential.is_empty())
    }

    /// Fills a missing or blank API key from `TOURPLAY_API_KEY`.
    pub fn with_env_credential(mut self) -> Self {
        self.fill_credential(std::env::var(API_KEY_ENV).ok());
        self
    }

    fn fill_credential(&mut self, fallback: Option<String>) {
        if self.credential().is_some() {
            return;
        }
        if let Some(key) = fallback.filter(|key| !key.trim().is_empty()) {
            debug!("Using API key from {}", API_KEY_ENV);
            self.stream.api_key = Some(key);
        }
    }
}

impl PlaybackConfig {
    pub fn position_interval(&self) -> Duration {
        Duration::from_millis(self.position_interval_ms).max(MIN_POSITION_INTERVAL)
    }
}

impl NetworkConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout)
    }
}

impl EmbeddedConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.api_poll_interval_ms).max(MIN_POLL_INTERVAL)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.api_ready_timeout_secs)
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            autoplay: default_true(),
            position_interval_ms: default_position_interval(),
            embedded_drift_tolerance: default_embedded_tolerance(),
            direct_drift_tolerance: default_direct_tolerance(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connection_timeout: default_timeout(),
            max_stream_bytes: default_max_stream_bytes(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            partition_header: default_partition_header(),
            api_key: None,
        }
    }
}

impl Default for EmbeddedConfig {
    fn default() -> Self {
        Self {
            script_url: default_script_url(),
            api_poll_interval_ms: default_poll_interval(),
            api_ready_timeout_secs: default_ready_timeout(),
            origin: default_origin(),
        }
    }
}

// Default value functions
fn default_true() -> bool { true }
fn default_position_interval() -> u64 { 500 }
fn default_embedded_tolerance() -> f64 { 2.0 }
fn default_direct_tolerance() -> f64 { 1.0 }
fn default_timeout() -> u64 { 30 }
fn default_max_stream_bytes() -> u64 { 512 * 1024 * 1024 }
fn default_partition_header() -> String { "partition".to_string() }
fn default_script_url() -> String { "https://www.youtube.com/iframe_api".to_string() }
fn default_poll_interval() -> u64 { 200 }
fn default_ready_timeout() -> u64 { 15 }
fn default_origin() -> String { "http://localhost".to_string() }
