//! WebSocket transport.
//!
//! Each session owns one driver task that performs the handshake, runs the
//! read/write/ping pumps while the link is up, and applies the bounded
//! reconnection policy when it goes down.

mod driver;
mod pumps;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::RealtimeError;
use crate::transport::{Dispatcher, EventHandler, Session, Transport};
use crate::types::{ConnectionState, Envelope, EventKind, SessionOptions};

/// Event name of the auth frame sent right after the upgrade.
pub const AUTH_EVENT: &str = "auth";

/// Maximum inbound message size in bytes (1 MB).
pub const WS_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Outbound frames buffered per link.
const OUTBOUND_CAPACITY: usize = 256;

/// Opens sessions over `tokio-tungstenite`.
///
/// Sessions opened without `force_new` are shared: a second open with the
/// same URL and credential returns the live session instead of dialing again.
pub struct WsTransport {
    runtime: Handle,
    shared_sessions: Mutex<HashMap<(String, String), Weak<WsSession>>>,
}

impl WsTransport {
    /// Creates a transport bound to the current tokio runtime.
    pub fn new() -> Result<Self, RealtimeError> {
        let runtime = Handle::try_current().map_err(|_| RealtimeError::NoRuntime)?;
        Ok(Self::with_handle(runtime))
    }

    pub fn with_handle(runtime: Handle) -> Self {
        Self {
            runtime,
            shared_sessions: Mutex::new(HashMap::new()),
        }
    }

    fn new_session(&self, options: SessionOptions) -> Arc<WsSession> {
        Arc::new(WsSession {
            shared: Arc::new(Shared {
                options,
                dispatcher: Dispatcher::new(ConnectionState::Dormant),
                outbound: Mutex::new(None),
                cancel: CancellationToken::new(),
            }),
            runtime: self.runtime.clone(),
        })
    }
}

impl Transport for WsTransport {
    fn open(&self, options: SessionOptions) -> Arc<dyn Session> {
        if options.force_new {
            return self.new_session(options);
        }

        let key = (options.url(), options.auth.token.clone());
        let mut sessions = self
            .shared_sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        sessions.retain(|_, weak| {
            weak.upgrade()
                .is_some_and(|s| !s.shared.dispatcher.is_closed())
        });
        if let Some(live) = sessions.get(&key).and_then(Weak::upgrade) {
            debug!(url = %key.0, "reusing live realtime session");
            return live;
        }

        let session = self.new_session(options);
        sessions.insert(key, Arc::downgrade(&session));
        session
    }
}

/// State shared between a session handle and its driver task.
pub(crate) struct Shared {
    pub(crate) options: SessionOptions,
    pub(crate) dispatcher: Dispatcher,
    /// Write channel of the live link, if any.
    outbound: Mutex<Option<mpsc::Sender<tungstenite::Message>>>,
    pub(crate) cancel: CancellationToken,
}

impl Shared {
    pub(crate) fn set_outbound(&self, tx: Option<mpsc::Sender<tungstenite::Message>>) {
        *self.outbound.lock().unwrap_or_else(PoisonError::into_inner) = tx;
    }
}

/// A session over a WebSocket link.
pub struct WsSession {
    shared: Arc<Shared>,
    runtime: Handle,
}

impl Session for WsSession {
    fn on(&self, kind: EventKind, handler: EventHandler) {
        self.shared.dispatcher.register(kind, handler);
    }

    fn connect(&self) {
        if self.shared.dispatcher.begin_handshake() {
            self.runtime.spawn(driver::drive(self.shared.clone()));
        }
    }

    fn send(&self, envelope: Envelope) -> Result<(), RealtimeError> {
        if self.shared.dispatcher.state() != ConnectionState::Connected {
            return Err(RealtimeError::NotConnected);
        }
        let json = serde_json::to_string(&envelope)?;
        let guard = self
            .shared
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let tx = guard.as_ref().ok_or(RealtimeError::NotConnected)?;
        tx.try_send(tungstenite::Message::Text(json.into()))
            .map_err(|_| RealtimeError::Closed)
    }

    fn close(&self) {
        if self.shared.dispatcher.close() {
            self.shared.cancel.cancel();
            self.shared.set_outbound(None);
            debug!(url = %self.shared.options.url(), "realtime session closed");
        }
    }

    fn state(&self) -> ConnectionState {
        self.shared.dispatcher.state()
    }

    fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.dispatcher.subscribe()
    }
}

impl Drop for WsSession {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}
