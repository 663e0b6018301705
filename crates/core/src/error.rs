//! Error types for the core library.

use thiserror::Error;

/// Main error type for the core library.
#[derive(Error, Debug)]
pub enum Error {
    /// Bad credentials. Requires re-entry, never retried.
    #[error("invalid credentials for login id '{0}'")]
    Auth(String),

    /// No signaling candidate accepted our registration.
    #[error("no signaling server reachable: {0}")]
    SignalingUnavailable(String),

    /// The remote link did not open in time.
    #[error("dial to {0} timed out")]
    DialTimeout(String),

    /// The remote link failed explicitly.
    #[error("dial error: {0}")]
    Dial(String),

    /// The link is closed. An expected steady-state event.
    #[error("link closed: {0}")]
    LinkClosed(String),

    /// Local storage failed to read or write.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Automatic reconnection gave up.
    #[error("reconnect gave up after {0} attempts")]
    ReconnectExhausted(u32),

    /// Outbound message rejected before sending.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Malformed wire frame.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// The session actor is gone.
    #[error("session closed")]
    SessionClosed,
}

impl Error {
    /// Whether the user has to act on this error.
    ///
    /// Everything transport- or timing-related is handled inside the
    /// session; only bad credentials and exhausted reconnects bubble up.
    pub fn is_actionable(&self) -> bool {
        matches!(self, Error::Auth(_) | Error::ReconnectExhausted(_))
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<sled::Error> for Error {
    fn from(err: sled::Error) -> Self {
        Error::Persistence(err.to_string())
    }
}
