//! Transport capability interface.
//!
//! A [`Transport`] opens [`Session`]s; the reconnection policy lives inside
//! the session, so tests can substitute a transport that never touches the
//! network.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::RealtimeError;
use crate::types::{ConnectionState, Envelope, EventKind, SessionEvent, SessionOptions};

/// Observer callback for session events.
pub type EventHandler = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// Opens realtime sessions.
pub trait Transport: Send + Sync {
    /// Constructs a dormant session. Nothing touches the network until
    /// [`Session::connect`] is called.
    fn open(&self, options: SessionOptions) -> Arc<dyn Session>;
}

/// One duplex event-stream session.
pub trait Session: Send + Sync {
    /// Registers an observer for one kind of event.
    fn on(&self, kind: EventKind, handler: EventHandler);

    /// Starts the handshake. No-op unless the session is dormant or has
    /// given up reconnecting; a failed session restarts with a fresh
    /// attempt budget.
    fn connect(&self);

    /// Queues an outbound event.
    fn send(&self, envelope: Envelope) -> Result<(), RealtimeError>;

    /// Terminates the session, cancelling any handshake, link or backoff
    /// timer. Observers are dropped first so nothing fires afterwards.
    fn close(&self);

    fn state(&self) -> ConnectionState;

    fn watch_state(&self) -> watch::Receiver<ConnectionState>;
}

/// Observer registry and state cell shared by session implementations.
pub(crate) struct Dispatcher {
    handlers: Mutex<Vec<(EventKind, EventHandler)>>,
    state_tx: watch::Sender<ConnectionState>,
    closed: AtomicBool,
}

impl Dispatcher {
    pub(crate) fn new(initial: ConnectionState) -> Self {
        let (state_tx, _) = watch::channel(initial);
        Self {
            handlers: Mutex::new(Vec::new()),
            state_tx,
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn register(&self, kind: EventKind, handler: EventHandler) {
        if self.is_closed() {
            return;
        }
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((kind, handler));
    }

    /// Delivers an event to matching observers, outside the registry lock.
    pub(crate) fn emit(&self, event: SessionEvent) {
        if self.is_closed() {
            return;
        }
        let kind = event.kind();
        let matching: Vec<EventHandler> = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, h)| h.clone())
            .collect();
        for handler in matching {
            handler(&event);
        }
    }

    /// Records a new state and notifies state-change observers.
    ///
    /// `Closed` is final: the check and the write happen under the state
    /// cell's lock, so a racing [`close`](Self::close) always wins.
    pub(crate) fn transition(&self, state: ConnectionState) {
        let applied = self.state_tx.send_if_modified(|current| {
            if *current == ConnectionState::Closed {
                return false;
            }
            *current = state.clone();
            true
        });
        if applied {
            self.emit(SessionEvent::StateChanged(state));
        }
    }

    /// Moves a dormant or failed session to `Handshaking`. Returns `false`
    /// when the session is in any other state.
    pub(crate) fn begin_handshake(&self) -> bool {
        let started = self.state_tx.send_if_modified(|current| {
            if !matches!(current, ConnectionState::Dormant | ConnectionState::Failed) {
                return false;
            }
            *current = ConnectionState::Handshaking;
            true
        });
        if started {
            self.emit(SessionEvent::StateChanged(ConnectionState::Handshaking));
        }
        started
    }

    /// Marks the session closed. Returns `false` if it already was.
    pub(crate) fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.state_tx.send_replace(ConnectionState::Closed);
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        true
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    #[cfg(test)]
    pub(crate) fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(k, _)| *k == kind)
            .count()
    }
}

/// Shared handle to the realtime connection.
///
/// Clones refer to the same session; equality is instance identity.
#[derive(Clone)]
pub struct Connection {
    id: Uuid,
    session: Arc<dyn Session>,
}

impl Connection {
    pub(crate) fn new(session: Arc<dyn Session>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Registers an additional observer on this connection.
    pub fn on(&self, kind: EventKind, handler: EventHandler) {
        self.session.on(kind, handler);
    }

    /// Sends an application event.
    pub fn emit<T: Serialize>(&self, event: &str, data: &T) -> Result<(), RealtimeError> {
        self.session.send(Envelope::new(event, data)?)
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.session.watch_state()
    }

    /// Waits until the connection is up.
    ///
    /// Fails with [`RealtimeError::Exhausted`] once reconnection gives up and
    /// with [`RealtimeError::Closed`] if the connection is torn down. A
    /// dormant connection never resolves.
    pub async fn wait_connected(&self) -> Result<(), RealtimeError> {
        let mut rx = self.session.watch_state();
        let state = rx
            .wait_for(|s| *s == ConnectionState::Connected || s.is_terminal())
            .await
            .map_err(|_| RealtimeError::Closed)?
            .clone();
        match state {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Failed => Err(RealtimeError::Exhausted),
            _ => Err(RealtimeError::Closed),
        }
    }

    pub(crate) fn connect(&self) {
        self.session.connect();
    }

    pub(crate) fn close(&self) {
        self.session.close();
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Connection {}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}
