pub mod errors;

pub use errors::{LoadError, PlaybackError, StreamError};
