//! Wires the connection manager to a credential file and logs its lifecycle.

use std::sync::Arc;

use learnhub_realtime::credential::default_credential_path;
use learnhub_realtime::{
    ConnectionManager, ConnectionState, CredentialStore, EventKind, FileCredentialStore,
    RealtimeConfig, SessionEvent, Uuid, WsTransport,
};

/// Access token handed over by a login flow, if any.
const ENV_ACCESS_TOKEN: &str = "LEARNHUB_ACCESS_TOKEN";

/// Runs until Ctrl-C.
pub async fn run(config: RealtimeConfig) -> anyhow::Result<()> {
    let credential_path = default_credential_path()
        .ok_or_else(|| anyhow::anyhow!("no config directory for the credential file"))?;
    let credentials = Arc::new(FileCredentialStore::open(credential_path)?);
    let credential_key = config.credential_key.clone();

    let transport = Arc::new(WsTransport::new()?);
    let manager = ConnectionManager::new(config, transport, credentials.clone())?;
    tracing::info!(endpoint = %manager.endpoint(), "realtime manager ready");

    manager.on_state_change(Arc::new(|id: Uuid, state: &ConnectionState| {
        tracing::info!(connection = %id, state = ?state, "realtime state changed");
    }));

    // A token from the environment behaves like a fresh login.
    if let Ok(token) = std::env::var(ENV_ACCESS_TOKEN)
        && !token.is_empty()
    {
        credentials.write(&credential_key, &token)?;
        manager.rotate_credential(Some(token.as_str()));
    }

    let conn = manager.get_connection();
    conn.on(
        EventKind::Message,
        Arc::new(|event: &SessionEvent| {
            if let SessionEvent::Message(envelope) = event {
                let data = serde_json::to_string(&envelope.data).unwrap_or_default();
                tracing::info!(event = %envelope.event, data = %data, "realtime event");
            }
        }),
    );

    if conn.state() == ConnectionState::Dormant {
        tracing::warn!(key = %credential_key, "no credential stored, connection is dormant");
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    manager.teardown();
    Ok(())
}
