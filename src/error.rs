//! Error types for the signaling handshake and the echo relay

/// Result type alias using the crate [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while negotiating or relaying
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Signaling payload could not be parsed into an offer
    #[error("Malformed offer: {0}")]
    MalformedOffer(String),

    /// Signaling endpoint returned something that is not an answer
    #[error("Malformed answer: {0}")]
    MalformedAnswer(String),

    /// Description applied or data sent out of order
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Candidate discovery or the signaling round trip did not finish in time
    #[error("Handshake timed out: {0}")]
    HandshakeTimeout(String),

    /// A new session displaced the one holding the single channel slot
    #[error("Channel of session {displaced} overwritten by session {current}")]
    ChannelOverwritten { displaced: String, current: String },

    /// No session registered under this id
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Channel is not open (closed, or never opened)
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Signaling endpoint answered with a non-success status
    #[error("Signaling endpoint answered {status}: {message}")]
    Signaling { status: u16, message: String },

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    Transport(#[from] webrtc::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Short machine-readable code, used in HTTP error bodies
    pub fn code(&self) -> &'static str {
        match self {
            Error::MalformedOffer(_) => "malformed_offer",
            Error::MalformedAnswer(_) => "malformed_answer",
            Error::InvalidState(_) => "invalid_state",
            Error::HandshakeTimeout(_) => "handshake_timeout",
            Error::ChannelOverwritten { .. } => "channel_overwritten",
            Error::SessionNotFound(_) => "session_not_found",
            Error::ChannelClosed(_) => "channel_closed",
            Error::InvalidConfig(_) => "invalid_config",
            Error::Signaling { .. } => "signaling",
            Error::Transport(_) => "transport",
            Error::Http(_) => "http",
            Error::Json(_) => "json",
            Error::Io(_) => "io",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::HandshakeTimeout(_))
    }
}
