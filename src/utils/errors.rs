use std::time::Duration;
use thiserror::Error;

/// Failures of the authenticated stream fetch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("stream request returned HTTP {0}")]
    HttpError(u16),

    #[error("stream response had no content")]
    EmptyContent,

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid stream URL: {0}")]
    InvalidUrl(String),

    #[error("stream exceeded the {limit} byte limit")]
    TooLarge { limit: u64 },

    #[error("stream fetch cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for StreamError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            StreamError::Network("request timed out".to_string())
        } else {
            StreamError::Network(error.to_string())
        }
    }
}

/// Failures while bringing up the embedded player API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("failed to inject player script: {0}")]
    ScriptInjection(String),

    #[error("player API not ready after {0:?}")]
    Timeout(Duration),

    #[error("wait for player API cancelled")]
    Cancelled,

    #[error("failed to create embedded player: {0}")]
    Instantiate(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("fetch failed: {0}")]
    FetchFailed(StreamError),

    #[error("stream was empty")]
    EmptyStream,

    #[error("embedded player error (code {0})")]
    EmbeddedPlayerError(i32),

    #[error("embedded player unavailable: {0}")]
    EmbeddedApiUnavailable(LoadError),

    #[error("direct playback failed: {0}")]
    MediaFailed(String),

    #[error("no playback source configured")]
    NoSourceConfigured,

    #[error("playback engine is no longer running")]
    EngineClosed,
}

impl From<StreamError> for PlaybackError {
    fn from(error: StreamError) -> Self {
        match error {
            StreamError::EmptyContent => PlaybackError::EmptyStream,
            other => PlaybackError::FetchFailed(other),
        }
    }
}

impl From<LoadError> for PlaybackError {
    fn from(error: LoadError) -> Self {
        PlaybackError::EmbeddedApiUnavailable(error)
    }
}
