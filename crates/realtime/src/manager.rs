//! Connection manager owning the process's realtime connection.
//!
//! Hands every caller the same authenticated connection, attaches the
//! diagnostic observers once per connection, and tears the connection down
//! whenever the credential changes.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::config::RealtimeConfig;
use crate::credential::CredentialStore;
use crate::error::ConfigError;
use crate::transport::{Connection, Transport};
use crate::types::{ConnectionState, EventKind, SessionEvent};

/// Callback invoked with the connection id and its new state.
pub type StateListener = Arc<dyn Fn(Uuid, &ConnectionState) + Send + Sync>;

#[derive(Default)]
struct ManagerState {
    current: Option<Connection>,
    handlers_attached: bool,
}

/// Owner of zero or one live realtime connection.
pub struct ConnectionManager {
    config: RealtimeConfig,
    endpoint: String,
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialStore>,
    state: Mutex<ManagerState>,
    /// Id of the reachable connection; observers of any other id are stale.
    current_id: Arc<RwLock<Option<Uuid>>>,
    listeners: Arc<Mutex<Vec<StateListener>>>,
}

impl ConnectionManager {
    /// Creates a manager. No connection is opened until
    /// [`get_connection`](Self::get_connection) or
    /// [`rotate_credential`](Self::rotate_credential) is called.
    pub fn new(
        config: RealtimeConfig,
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self, ConfigError> {
        let endpoint = config.resolve_endpoint()?;
        debug!(endpoint = %endpoint, path = %config.path, "realtime manager initialized");
        Ok(Self {
            config,
            endpoint,
            transport,
            credentials,
            state: Mutex::new(ManagerState::default()),
            current_id: Arc::new(RwLock::new(None)),
            listeners: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Returns the shared connection, constructing it if needed.
    ///
    /// Reads the credential from the store. Without a credential the
    /// connection is dormant and no handshake is attempted. A connection that
    /// gave up reconnecting is restarted in place while a credential is
    /// stored. Network failures are reported through the observers, never
    /// returned here.
    pub fn get_connection(&self) -> Connection {
        let (conn, auto_connect) = {
            let mut state = self.lock_state();
            if state.handlers_attached
                && let Some(conn) = &state.current
            {
                if conn.state() != ConnectionState::Failed
                    || self.credentials.read(&self.config.credential_key).is_none()
                {
                    return conn.clone();
                }
                info!(connection = %conn.id(), "retrying failed realtime connection");
                (conn.clone(), true)
            } else {
                let token = self.credentials.read(&self.config.credential_key);
                self.establish(&mut state, token.as_deref())
            }
        };
        self.start(&conn, auto_connect);
        conn
    }

    /// Replaces the credential.
    ///
    /// Terminates the current connection. With a new token a fresh
    /// connection authenticated with it is opened immediately; with `None`
    /// the manager stays torn down until the next `get_connection`.
    pub fn rotate_credential(&self, token: Option<&str>) {
        let established = {
            let mut state = self.lock_state();
            self.discard(&mut state);
            token
                .filter(|t| !t.is_empty())
                .map(|t| self.establish(&mut state, Some(t)))
        };

        match established {
            Some((conn, auto_connect)) => {
                info!(connection = %conn.id(), "credential rotated, realtime connection reopened");
                self.start(&conn, auto_connect);
            }
            None => info!("credential cleared, realtime connection torn down"),
        }
    }

    /// Closes the current connection and resets the manager.
    pub fn teardown(&self) {
        let mut state = self.lock_state();
        self.discard(&mut state);
    }

    /// Subscribes to state changes of the current and all future
    /// connections. Changes from a discarded connection are never delivered.
    pub fn on_state_change(&self, listener: StateListener) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// The current connection, if one exists. Never constructs one.
    pub fn current(&self) -> Option<Connection> {
        self.lock_state().current.clone()
    }

    /// State of the current connection, or `Uninitialized`.
    pub fn state(&self) -> ConnectionState {
        self.lock_state()
            .current
            .as_ref()
            .map_or(ConnectionState::Uninitialized, Connection::state)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn lock_state(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_current_id(&self, id: Option<Uuid>) {
        *self
            .current_id
            .write()
            .unwrap_or_else(PoisonError::into_inner) = id;
    }

    /// Makes the current connection unreachable, then closes it.
    fn discard(&self, state: &mut ManagerState) {
        self.set_current_id(None);
        state.handlers_attached = false;
        if let Some(old) = state.current.take() {
            debug!(connection = %old.id(), "closing realtime connection");
            old.close();
        }
    }

    /// Constructs the new current connection with observers attached and
    /// returns it with its auto-connect flag. The caller starts it once the
    /// state lock is released, since starting notifies state listeners
    /// synchronously.
    fn establish(&self, state: &mut ManagerState, token: Option<&str>) -> (Connection, bool) {
        if state.current.is_some() {
            self.discard(state);
        }

        let options = self.config.session_options(&self.endpoint, token);
        let auto_connect = options.auto_connect;
        let conn = Connection::new(self.transport.open(options));
        self.set_current_id(Some(conn.id()));

        self.attach_observers(&conn);
        state.handlers_attached = true;
        state.current = Some(conn.clone());
        (conn, auto_connect)
    }

    fn start(&self, conn: &Connection, auto_connect: bool) {
        if auto_connect {
            debug!(connection = %conn.id(), url = %self.endpoint, "opening realtime connection");
            conn.connect();
        } else {
            debug!(connection = %conn.id(), "no credential, realtime connection left dormant");
        }
    }

    /// Registers the diagnostic observers and the state fan-out.
    fn attach_observers(&self, conn: &Connection) {
        let id = conn.id();

        conn.on(
            EventKind::ConnectError,
            Arc::new(move |event: &SessionEvent| {
                if let SessionEvent::ConnectError { message } = event {
                    warn!(connection = %id, error = %message, "realtime connect error");
                }
            }),
        );

        conn.on(
            EventKind::Connect,
            Arc::new(move |_: &SessionEvent| info!(connection = %id, "realtime connected")),
        );

        conn.on(
            EventKind::Disconnect,
            Arc::new(move |event: &SessionEvent| match event {
                SessionEvent::Disconnected { reason } => {
                    warn!(connection = %id, reason = %reason, "realtime disconnected");
                }
                SessionEvent::ReconnectFailed { attempts } => {
                    warn!(connection = %id, attempts, "realtime reconnect attempts exhausted");
                }
                _ => {}
            }),
        );

        conn.on(
            EventKind::Reconnect,
            Arc::new(move |event: &SessionEvent| {
                if let SessionEvent::Reconnecting { attempt, delay } = event {
                    debug!(
                        connection = %id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "realtime reconnect scheduled"
                    );
                }
            }),
        );

        let current_id = self.current_id.clone();
        let listeners = self.listeners.clone();
        conn.on(
            EventKind::StateChange,
            Arc::new(move |event: &SessionEvent| {
                let SessionEvent::StateChanged(new_state) = event else {
                    return;
                };
                let reachable =
                    *current_id.read().unwrap_or_else(PoisonError::into_inner) == Some(id);
                if !reachable {
                    trace!(connection = %id, state = ?new_state, "dropping state change from discarded connection");
                    return;
                }
                let snapshot: Vec<StateListener> = listeners
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                for listener in snapshot {
                    listener(id, new_state);
                }
            }),
        );
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.teardown();
    }
}
