//! Cabin Voice Error Types
//!
//! Centralized error handling. Every failure is caught at the boundary where it
//! happens and degraded to a retry or a skip; nothing here is fatal to the
//! recognition loop.

use thiserror::Error;

/// Central error type for the recognition engine
#[derive(Error, Debug)]
pub enum VoiceError {
    /// Handshake or socket failure against the ASR service
    #[error("ASR connection error: {0}")]
    Connection(String),

    /// Malformed frame from the ASR service
    #[error("Protocol decode error: {0}")]
    ProtocolDecode(String),

    /// Audio input device could not be opened or read
    #[error("Audio device error: {0}")]
    Device(String),

    /// Speech output engine failure
    #[error("Playback error: {0}")]
    Playback(String),

    /// A navigation window closed without a parsable destination
    #[error("No destination in '{0}'")]
    NoDestination(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Lock poisoned: {0}")]
    Lock(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for engine operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Helper to convert Mutex poison errors
impl<T> From<std::sync::PoisonError<T>> for VoiceError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        VoiceError::Lock(err.to_string())
    }
}
