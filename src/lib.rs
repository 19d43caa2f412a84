//! Playback synchronization for property-tour clips: picks a backend for a
//! clip, keeps it positioned inside the requested window and reports progress.

pub mod config;
pub mod models;
pub mod player;
pub mod utils;

#[cfg(test)]
mod test_utils;

pub use config::Config;
pub use models::{EngineEvent, EngineState, PlaybackRequest, PlaybackSource, PlaybackWindow};
pub use player::{EngineHandle, EngineHosts, PlaybackEngine, spawn_engine};
pub use utils::PlaybackError;
