//! Session driver: handshake, link lifetime and bounded reconnection.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite};
use tracing::{debug, info, warn};

use crate::error::RealtimeError;
use crate::types::{ConnectionState, DisconnectReason, Envelope, SessionEvent, SessionOptions};
use crate::ws::pumps::{ping::ping_pump, read::read_pump, write::write_pump};
use crate::ws::{AUTH_EVENT, OUTBOUND_CAPACITY, Shared, WS_MAX_MESSAGE_SIZE};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Runs a session until it is closed, rejected, or out of attempts.
pub(crate) async fn drive(shared: Arc<Shared>) {
    let opts = &shared.options;
    let cancel = shared.cancel.clone();
    let url = opts.url();
    let mut attempt: u32 = 0;

    loop {
        debug!(url = %url, attempt, "realtime handshake");
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return,
            r = handshake(opts) => r,
        };

        match outcome {
            Ok(stream) => {
                attempt = 0;
                let reason = run_link(stream, &shared).await;
                if cancel.is_cancelled() {
                    return;
                }
                info!(url = %url, reason = %reason, "realtime link lost");
                shared
                    .dispatcher
                    .emit(SessionEvent::Disconnected { reason: reason.clone() });
                if !reason.should_reconnect() {
                    shared.dispatcher.transition(ConnectionState::Failed);
                    return;
                }
            }
            Err(e) => {
                if cancel.is_cancelled() {
                    return;
                }
                debug!(url = %url, attempt, error = %e, "realtime handshake failed");
                shared.dispatcher.emit(SessionEvent::ConnectError {
                    message: e.to_string(),
                });
            }
        }

        if !opts.reconnect.enabled {
            shared.dispatcher.transition(ConnectionState::Failed);
            return;
        }

        attempt = attempt.saturating_add(1);
        if attempt > opts.reconnect.max_attempts {
            info!(url = %url, attempts = opts.reconnect.max_attempts, "giving up on realtime reconnect");
            shared.dispatcher.emit(SessionEvent::ReconnectFailed {
                attempts: opts.reconnect.max_attempts,
            });
            shared.dispatcher.transition(ConnectionState::Failed);
            return;
        }

        let delay = opts.reconnect.delay_for_attempt(attempt);
        shared
            .dispatcher
            .transition(ConnectionState::Reconnecting { attempt });
        shared
            .dispatcher
            .emit(SessionEvent::Reconnecting { attempt, delay });

        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(url = %url, "reconnect cancelled");
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }
        shared.dispatcher.transition(ConnectionState::Handshaking);
    }
}

/// Opens the WebSocket and sends the auth frame.
async fn handshake(opts: &SessionOptions) -> Result<WsStream, RealtimeError> {
    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
    ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);

    let connect = tokio_tungstenite::connect_async_with_config(opts.url(), Some(ws_config), false);
    let (mut stream, _) = tokio::time::timeout(opts.handshake_timeout, connect)
        .await
        .map_err(|_| RealtimeError::HandshakeTimeout(opts.handshake_timeout))??;

    let auth = Envelope::new(AUTH_EVENT, &opts.auth)?;
    stream
        .send(tungstenite::Message::Text(serde_json::to_string(&auth)?.into()))
        .await?;
    Ok(stream)
}

/// Runs the pumps over an established link until it goes down.
async fn run_link(stream: WsStream, shared: &Arc<Shared>) -> DisconnectReason {
    let opts = &shared.options;
    let (write, read) = stream.split();
    let (write_tx, write_rx) = mpsc::channel::<tungstenite::Message>(OUTBOUND_CAPACITY);
    let link_cancel = shared.cancel.child_token();

    shared.set_outbound(Some(write_tx.clone()));
    shared.dispatcher.transition(ConnectionState::Connected);
    shared.dispatcher.emit(SessionEvent::Connected);

    let writer = tokio::spawn(write_pump(write, write_rx, link_cancel.clone()));
    let pinger = tokio::spawn(ping_pump(
        write_tx.clone(),
        opts.ping_interval,
        link_cancel.clone(),
    ));

    let dispatch = shared.clone();
    let reason = read_pump(
        read,
        write_tx,
        opts.read_deadline(),
        move |envelope| dispatch.dispatcher.emit(SessionEvent::Message(envelope)),
        link_cancel.clone(),
    )
    .await;

    shared.set_outbound(None);
    link_cancel.cancel();
    if let Err(e) = writer.await {
        warn!("write pump ended abnormally: {e}");
    }
    pinger.abort();
    reason
}
