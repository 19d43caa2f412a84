use serde::{Deserialize, Serialize};
use std::fmt;

use super::EmbeddedVideoId;

/// Where and how to fetch an authenticated clip stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Absolute URL, or a path resolved against the configured stream base URL.
    pub url: String,
    #[serde(default)]
    pub partition: Option<String>,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// Logical clip time at which the stream data begins. Chunk streams start
    /// at the chunk offset, so media-local zero maps to this value.
    #[serde(default)]
    pub origin_seconds: f64,
}

impl StreamDescriptor {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            partition: None,
            headers: Vec::new(),
            origin_seconds: 0.0,
        }
    }

    pub fn with_partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = Some(partition.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_origin(mut self, origin_seconds: f64) -> Self {
        self.origin_seconds = origin_seconds.max(0.0);
        self
    }

    pub fn to_media_time(&self, logical_seconds: f64) -> f64 {
        (logical_seconds - self.origin_seconds).max(0.0)
    }

    pub fn to_logical_time(&self, media_seconds: f64) -> f64 {
        media_seconds + self.origin_seconds
    }
}

/// Bearer token for the retrieval service.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// How to obtain video for one clip. Candidates are tried in the fixed order
/// stream, embedded player, direct file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSource {
    #[serde(default)]
    pub direct_url: Option<String>,
    #[serde(default)]
    pub stream: Option<StreamDescriptor>,
    #[serde(default)]
    pub embedded_id: Option<EmbeddedVideoId>,
}

impl PlaybackSource {
    pub fn with_direct_url(mut self, url: impl Into<String>) -> Self {
        self.direct_url = Some(url.into());
        self
    }

    pub fn with_stream(mut self, descriptor: StreamDescriptor) -> Self {
        self.stream = Some(descriptor);
        self
    }

    pub fn with_embedded_id(mut self, id: impl Into<EmbeddedVideoId>) -> Self {
        self.embedded_id = Some(id.into());
        self
    }

    pub fn offers(&self, kind: BackendKind) -> bool {
        match kind {
            BackendKind::AuthenticatedStream => self.stream.is_some(),
            BackendKind::Embedded => self.embedded_id.is_some(),
            BackendKind::DirectFile => self.direct_url.is_some(),
        }
    }

    pub fn is_empty(&self) -> bool {
        BackendKind::PRIORITY.iter().all(|kind| !self.offers(*kind))
    }
}

/// Desired start/end offsets of the current clip, in logical seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaybackWindow {
    pub start_seconds: f64,
    #[serde(default)]
    pub end_seconds: Option<f64>,
}

impl PlaybackWindow {
    pub fn new(start_seconds: f64, end_seconds: Option<f64>) -> Self {
        Self {
            start_seconds,
            end_seconds,
        }
        .normalized()
    }

    pub fn starting_at(start_seconds: f64) -> Self {
        Self::new(start_seconds, None)
    }

    /// Clamps negative or non-finite starts to zero and drops an end that does
    /// not lie after the start. The retrieval service sends `end == start`
    /// (or zero) when a chunk has no end.
    pub fn normalized(self) -> Self {
        let start = if self.start_seconds.is_finite() {
            self.start_seconds.max(0.0)
        } else {
            0.0
        };
        let end = self
            .end_seconds
            .filter(|end| end.is_finite() && *end > start);
        Self {
            start_seconds: start,
            end_seconds: end,
        }
    }

    pub fn has_reached_end(&self, position_seconds: f64) -> bool {
        self.end_seconds
            .is_some_and(|end| position_seconds >= end)
    }
}

impl Default for PlaybackWindow {
    fn default() -> Self {
        Self::starting_at(0.0)
    }
}

/// Everything the engine needs to present one clip.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackRequest {
    pub source: PlaybackSource,
    pub window: PlaybackWindow,
    pub autoplay: bool,
    pub credential: Option<Credential>,
}

impl PlaybackRequest {
    pub fn new(source: PlaybackSource, window: PlaybackWindow) -> Self {
        Self {
            source,
            window: window.normalized(),
            autoplay: true,
            credential: None,
        }
    }

    pub fn with_autoplay(mut self, autoplay: bool) -> Self {
        self.autoplay = autoplay;
        self
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    AuthenticatedStream,
    Embedded,
    DirectFile,
}

impl BackendKind {
    /// Highest priority first.
    pub const PRIORITY: [BackendKind; 3] = [
        BackendKind::AuthenticatedStream,
        BackendKind::Embedded,
        BackendKind::DirectFile,
    ];
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::AuthenticatedStream => write!(f, "authenticated stream"),
            BackendKind::Embedded => write!(f, "embedded player"),
            BackendKind::DirectFile => write!(f, "direct file"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendState {
    Idle,
    Loading,
    Ready,
    Error(String),
    Unavailable,
}

impl BackendState {
    /// Whether the selector may still pick this backend.
    pub fn is_candidate(&self) -> bool {
        !matches!(self, BackendState::Error(_) | BackendState::Unavailable)
    }
}

/// Per-backend states for the current source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendStates {
    pub stream: BackendState,
    pub embedded: BackendState,
    pub direct: BackendState,
}

impl BackendStates {
    pub fn unavailable() -> Self {
        Self {
            stream: BackendState::Unavailable,
            embedded: BackendState::Unavailable,
            direct: BackendState::Unavailable,
        }
    }

    /// Offered backends start `Idle`, the rest are `Unavailable`.
    pub fn for_source(source: &PlaybackSource) -> Self {
        let mut states = Self::unavailable();
        for kind in BackendKind::PRIORITY {
            if source.offers(kind) {
                *states.get_mut(kind) = BackendState::Idle;
            }
        }
        states
    }

    pub fn get(&self, kind: BackendKind) -> &BackendState {
        match kind {
            BackendKind::AuthenticatedStream => &self.stream,
            BackendKind::Embedded => &self.embedded,
            BackendKind::DirectFile => &self.direct,
        }
    }

    pub fn get_mut(&mut self, kind: BackendKind) -> &mut BackendState {
        match kind {
            BackendKind::AuthenticatedStream => &mut self.stream,
            BackendKind::Embedded => &mut self.embedded,
            BackendKind::DirectFile => &mut self.direct,
        }
    }
}

impl Default for BackendStates {
    fn default() -> Self {
        Self::unavailable()
    }
}

/// What the surrounding view should render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum EngineState {
    NoSource,
    Loading,
    Playing(BackendKind),
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionReport {
    pub current_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    StateChanged { state: EngineState },
    Position(PositionReport),
    /// The active backend failed and a lower-priority one took over.
    FellBack { from: BackendKind, to: BackendKind },
}
