use thiserror::Error;

use crate::audio_capture::AudioError;
use crate::config::ConfigError;
use crate::playback::PlaybackError;
use crate::server::ServerError;

pub type Result<T> = std::result::Result<T, EdgeError>;

/// Crate-wide error taxonomy.
///
/// `NetworkUnavailable` and `Validation` are handled where they happen, and
/// `AuthFailure` spends a PIN attempt. A `Server` error ends the current
/// flow; the device loop logs it and shows the menu again.
#[derive(Error, Debug)]
pub enum EdgeError {
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Authentication failed: {0}")]
    AuthFailure(String),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl From<ServerError> for EdgeError {
    fn from(err: ServerError) -> Self {
        if err.is_unreachable() {
            EdgeError::NetworkUnavailable(err.to_string())
        } else {
            EdgeError::Server(err.to_string())
        }
    }
}
