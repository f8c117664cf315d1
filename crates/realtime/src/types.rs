//! Public types shared by the manager and the transports.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// WebSocket close code a server uses to reject the session's credential.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Lifecycle state of a realtime connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection has been constructed (or it was torn down).
    Uninitialized,
    /// Constructed without a credential; no handshake attempted.
    Dormant,
    /// Handshake in progress.
    Handshaking,
    /// Handshake completed and the link is up.
    Connected,
    /// Link lost, waiting for the next reconnection attempt.
    Reconnecting { attempt: u32 },
    /// Reconnection attempts exhausted. Terminal for this connection.
    Failed,
    /// Terminated locally by rotation or teardown.
    Closed,
}

impl ConnectionState {
    /// Returns `true` if no further transitions will happen on their own.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }
}

/// Why an established link went down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The server sent a close frame.
    ServerClosed { code: u16, reason: String },
    /// The session was closed locally.
    ClientClosed,
    /// Nothing arrived within the read deadline.
    PingTimeout,
    /// The stream ended without a close frame.
    TransportClose,
    /// The transport reported an error.
    TransportError(String),
}

impl DisconnectReason {
    /// Whether the reconnection loop should run after this disconnect.
    ///
    /// A server close with [`CLOSE_POLICY_VIOLATION`] means the credential
    /// was rejected; retrying with the same credential cannot succeed.
    pub fn should_reconnect(&self) -> bool {
        match self {
            Self::ClientClosed => false,
            Self::ServerClosed { code, .. } => *code != CLOSE_POLICY_VIOLATION,
            Self::PingTimeout | Self::TransportClose | Self::TransportError(_) => true,
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServerClosed { code, reason } if reason.is_empty() => {
                write!(f, "server disconnect ({code})")
            }
            Self::ServerClosed { code, reason } => write!(f, "server disconnect ({code}): {reason}"),
            Self::ClientClosed => f.write_str("client disconnect"),
            Self::PingTimeout => f.write_str("ping timeout"),
            Self::TransportClose => f.write_str("transport close"),
            Self::TransportError(e) => write!(f, "transport error: {e}"),
        }
    }
}

/// Application event carried over the link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Envelope {
    /// Creates an envelope from any serializable payload.
    pub fn new<T: Serialize>(event: &str, data: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event: event.to_string(),
            data: serde_json::to_value(data)?,
        })
    }
}

/// Handshake auth payload. The token is empty when no credential exists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthPayload {
    pub token: String,
}

/// Observer categories a session dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connect,
    ConnectError,
    Disconnect,
    StateChange,
    Reconnect,
    Message,
}

/// Something that happened on a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(ConnectionState),
    Connected,
    ConnectError { message: String },
    Disconnected { reason: DisconnectReason },
    Reconnecting { attempt: u32, delay: Duration },
    /// The attempt ceiling was reached. Delivered to disconnect observers.
    ReconnectFailed { attempts: u32 },
    Message(Envelope),
}

impl SessionEvent {
    /// The observer category this event is delivered to.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::StateChanged(_) => EventKind::StateChange,
            Self::Connected => EventKind::Connect,
            Self::ConnectError { .. } => EventKind::ConnectError,
            Self::Disconnected { .. } | Self::ReconnectFailed { .. } => EventKind::Disconnect,
            Self::Reconnecting { .. } => EventKind::Reconnect,
            Self::Message(_) => EventKind::Message,
        }
    }
}

/// Options a transport opens a session with.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Resolved `ws://` or `wss://` origin.
    pub endpoint: String,
    /// Request path appended to the endpoint.
    pub path: String,
    /// Start the handshake as soon as the session is opened.
    pub auto_connect: bool,
    /// Never share a live session opened with the same URL and credential.
    pub force_new: bool,
    pub reconnect: ReconnectConfig,
    pub handshake_timeout: Duration,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    pub auth: AuthPayload,
}

impl SessionOptions {
    /// Full URL of the WebSocket upgrade request.
    pub fn url(&self) -> String {
        format!(
            "{}{}?EIO=4&transport=websocket",
            self.endpoint.trim_end_matches('/'),
            self.path
        )
    }

    /// Read deadline: nothing for this long means the link is dead.
    pub fn read_deadline(&self) -> Duration {
        self.ping_interval + self.ping_timeout
    }
}

/// Bounded reconnection policy with exponential backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Attempts after the first failure before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    /// Randomization factor in `[0, 1)`.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    5
}

fn default_min_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    5_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.5
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            max_attempts: default_max_attempts(),
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
            jitter: default_jitter(),
        }
    }
}

impl ReconnectConfig {
    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Calculates the delay for a given attempt number (1-based),
    /// randomized by `±jitter` and capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let base = self.min_delay().as_secs_f64() * self.backoff_factor.powi(exp);
        let max = self.max_delay().as_secs_f64();
        let capped = base.min(max);
        let jitter = capped * self.jitter.clamp(0.0, 1.0);
        let offset = (std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos() as f64
            / 1_000_000_000.0)
            * 2.0
            - 1.0; // [-1.0, 1.0)
        let with_jitter = (capped + jitter * offset).min(max).max(0.05);
        Duration::from_secs_f64(with_jitter)
    }
}
