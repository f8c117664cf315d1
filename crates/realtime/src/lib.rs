//! Realtime connection manager for the LearnHub client.
//!
//! Owns one authenticated, self-healing event-stream connection per
//! [`ConnectionManager`], rebuilt whenever the credential rotates.

pub mod config;
pub mod credential;
pub mod error;
pub mod manager;
pub mod transport;
pub mod types;
pub mod ws;

#[cfg(test)]
pub(crate) mod testing;

pub use config::RealtimeConfig;
pub use credential::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use error::{ConfigError, CredentialError, RealtimeError};
pub use manager::{ConnectionManager, StateListener};
pub use transport::{Connection, EventHandler, Session, Transport};
pub use types::{
    AuthPayload, ConnectionState, DisconnectReason, Envelope, EventKind, ReconnectConfig,
    SessionEvent, SessionOptions,
};
pub use uuid::Uuid;
pub use ws::WsTransport;
