//! Error types for harmonia-session
//!
//! Defines module-specific error types using thiserror for clear error
//! propagation. Nothing in the session engine is fatal to the overall
//! session: the worst-case degraded mode is local playback without
//! cross-device sync or presence.

use thiserror::Error;

/// Main error type for the session engine
#[derive(Error, Debug)]
pub enum Error {
    /// Audio output device errors
    #[error("Audio device error: {0}")]
    Device(String),

    /// Playback start refused by the output device (autoplay-policy class);
    /// recoverable, caught at the command site
    #[error("Playback rejected: {0}")]
    PlaybackRejected(String),

    /// Session store channel errors
    #[error("Channel error: {0}")]
    Channel(String),

    /// HTTP transport errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Wire frame encode/decode errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Errors from the common library
    #[error(transparent)]
    Common(#[from] harmonia_common::Error),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience Result type using the session engine Error
pub type Result<T> = std::result::Result<T, Error>;
