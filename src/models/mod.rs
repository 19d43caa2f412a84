mod identifiers;
pub mod playback;

pub use identifiers::{ContainerId, EmbeddedVideoId};
pub use playback::{
    BackendKind, BackendState, BackendStates, Credential, EngineEvent, EngineState,
    PlaybackRequest, PlaybackSource, PlaybackWindow, PositionReport, StreamDescriptor,
};
