use crate::config::ConfigError;
use std::time::Duration;
use thiserror::Error;

/// Categorizes errors for observer decision-making.
///
/// A lightweight, cloneable view of [`Error`] that travels inside
/// [`TerminalFailure`](crate::TerminalFailure) notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// WebSocket protocol error
    WebSocket,
    /// Connection could not be established (refused, DNS, TLS, ...)
    ConnectionFailed,
    /// Connection attempt exceeded the connect timeout
    Timeout,
    /// Server closed the stream
    Closed,
    /// Keepalive detected a dead connection
    HealthCheckFailed,
    /// Other error
    Other,
}

/// Errors that can occur in ws-event-sync
#[derive(Error, Debug)]
pub enum Error {
    /// WebSocket protocol error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Connection could not be established
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection attempt timed out
    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),

    /// The server ended the stream
    #[error("Connection closed: {}", .0.as_deref().unwrap_or("stream ended"))]
    Closed(Option<String>),

    /// Health check failed
    #[error("Health check failed: {0}")]
    HealthCheckFailed(String),

    /// Invalid endpoint URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// `connect()` was called outside a Tokio runtime
    #[error("connect() must be called from within a Tokio runtime")]
    NoRuntime,
}

impl Error {
    /// Get the kind of this error for decision-making.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::WebSocket(_) => ErrorKind::WebSocket,
            Error::ConnectionFailed(_) => ErrorKind::ConnectionFailed,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::Closed(_) => ErrorKind::Closed,
            Error::HealthCheckFailed(_) => ErrorKind::HealthCheckFailed,
            Error::InvalidUrl(_) | Error::Config(_) | Error::NoRuntime => ErrorKind::Other,
        }
    }
}
