//! Error types for avatarsync-me

use avatarsync_core::Error as CoreError;
use thiserror::Error;

/// Avatar engine errors
#[derive(Error, Debug)]
pub enum AvatarError {
    /// Inbound stream data violated the message contract and was dropped
    #[error("Ingestion error: {0}")]
    Ingestion(String),

    /// The backend reported a failure for the current session
    #[error("Upstream stream error: {0}")]
    Upstream(String),

    #[error("Playback error: {0}")]
    Playback(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),
}

impl From<AvatarError> for CoreError {
    fn from(err: AvatarError) -> Self {
        CoreError::Engine(format!("Avatar error: {}", err))
    }
}
