//! Error types for the realtime crate.

use std::time::Duration;

use tokio_tungstenite::tungstenite;

/// Errors from realtime sessions and their transport.
#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    Closed,

    #[error("reconnect attempts exhausted")]
    Exhausted,

    #[error("no tokio runtime available")]
    NoRuntime,
}

/// Errors from loading or resolving configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("TOML encode error: {0}")]
    Encode(#[from] toml::ser::Error),

    #[error("no realtime endpoint configured")]
    MissingEndpoint,

    #[error("unsupported endpoint scheme: {0}")]
    UnsupportedScheme(String),
}

/// Errors from credential store operations.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
