pub mod controller;
pub mod embedded;
pub mod factory;
pub mod headless;
pub mod reconciler;
pub mod resource;
pub mod sampler;
pub mod selector;
pub mod stream_fetcher;
pub mod traits;


pub use controller::{EngineCommand, EngineHandle, PlaybackEngine};
pub use factory::{EngineHosts, spawn_engine};
pub use headless::{HeadlessScriptHost, HeadlessSurface, UnavailableEmbeddedApi};
pub use resource::{ResourceHandle, ResourceRegistry};
pub use stream_fetcher::{HttpStreamClient, StreamClient, StreamFetcher};
pub use traits::{EmbeddedPlayer, EmbeddedPlayerApi, MediaSurface, ScriptHost};
