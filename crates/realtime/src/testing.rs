//! In-memory transport for tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;

use crate::error::RealtimeError;
use crate::transport::{Dispatcher, EventHandler, Session, Transport};
use crate::types::{
    AuthPayload, ConnectionState, DisconnectReason, Envelope, EventKind, ReconnectConfig,
    SessionEvent, SessionOptions,
};

/// Session options pointing at a local endpoint.
pub(crate) fn options(token: Option<&str>) -> SessionOptions {
    SessionOptions {
        endpoint: "ws://127.0.0.1:9".into(),
        path: "/socket.io".into(),
        auto_connect: token.is_some(),
        force_new: true,
        reconnect: ReconnectConfig::default(),
        handshake_timeout: Duration::from_secs(20),
        ping_interval: Duration::from_secs(25),
        ping_timeout: Duration::from_secs(20),
        auth: AuthPayload {
            token: token.unwrap_or_default().into(),
        },
    }
}

/// Transport that records every session it opens.
#[derive(Default)]
pub(crate) struct FakeTransport {
    sessions: Mutex<Vec<Arc<FakeSession>>>,
    auto_connect: Mutex<Option<bool>>,
}

impl FakeTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Overrides `auto_connect` on every session opened from now on.
    pub(crate) fn force_auto_connect(&self, value: bool) {
        *self.auto_connect.lock().unwrap() = Some(value);
    }

    pub(crate) fn opened(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub(crate) fn session(&self, index: usize) -> Arc<FakeSession> {
        self.sessions.lock().unwrap()[index].clone()
    }

    pub(crate) fn last(&self) -> Option<Arc<FakeSession>> {
        self.sessions.lock().unwrap().last().cloned()
    }

    /// Handshake attempts across all sessions.
    pub(crate) fn handshakes(&self) -> u32 {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.handshakes.load(Ordering::SeqCst))
            .sum()
    }
}

impl Transport for FakeTransport {
    fn open(&self, mut options: SessionOptions) -> Arc<dyn Session> {
        if let Some(value) = *self.auto_connect.lock().unwrap() {
            options.auto_connect = value;
        }
        let session = Arc::new(FakeSession {
            options,
            dispatcher: Dispatcher::new(ConnectionState::Dormant),
            handshakes: AtomicU32::new(0),
            closes: AtomicU32::new(0),
            sent: Mutex::new(Vec::new()),
        });
        self.sessions.lock().unwrap().push(session.clone());
        session
    }
}

/// Session whose lifecycle is driven by the test.
pub(crate) struct FakeSession {
    pub(crate) options: SessionOptions,
    dispatcher: Dispatcher,
    handshakes: AtomicU32,
    closes: AtomicU32,
    pub(crate) sent: Mutex<Vec<Envelope>>,
}

impl FakeSession {
    pub(crate) fn handshakes(&self) -> u32 {
        self.handshakes.load(Ordering::SeqCst)
    }

    pub(crate) fn closes(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.dispatcher.is_closed()
    }

    pub(crate) fn handler_count(&self, kind: EventKind) -> usize {
        self.dispatcher.handler_count(kind)
    }

    pub(crate) fn complete_handshake(&self) {
        self.dispatcher.transition(ConnectionState::Connected);
        self.dispatcher.emit(SessionEvent::Connected);
    }

    pub(crate) fn fail_handshake(&self, message: &str) {
        self.dispatcher.emit(SessionEvent::ConnectError {
            message: message.into(),
        });
    }

    pub(crate) fn drop_link(&self, reason: DisconnectReason) {
        self.dispatcher.emit(SessionEvent::Disconnected { reason });
        self.dispatcher
            .transition(ConnectionState::Reconnecting { attempt: 1 });
    }

    pub(crate) fn exhaust(&self, attempts: u32) {
        self.dispatcher
            .emit(SessionEvent::ReconnectFailed { attempts });
        self.dispatcher.transition(ConnectionState::Failed);
    }

    pub(crate) fn deliver(&self, envelope: Envelope) {
        self.dispatcher.emit(SessionEvent::Message(envelope));
    }
}

impl Session for FakeSession {
    fn on(&self, kind: EventKind, handler: EventHandler) {
        self.dispatcher.register(kind, handler);
    }

    fn connect(&self) {
        if self.dispatcher.begin_handshake() {
            self.handshakes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn send(&self, envelope: Envelope) -> Result<(), RealtimeError> {
        if self.dispatcher.state() != ConnectionState::Connected {
            return Err(RealtimeError::NotConnected);
        }
        self.sent.lock().unwrap().push(envelope);
        Ok(())
    }

    fn close(&self) {
        if self.dispatcher.close() {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn state(&self) -> ConnectionState {
        self.dispatcher.state()
    }

    fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.dispatcher.subscribe()
    }
}
