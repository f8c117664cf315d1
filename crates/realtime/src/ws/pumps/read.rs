//! Read pump: decodes inbound frames and detects dead links.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::types::{DisconnectReason, Envelope};
use crate::ws::WS_MAX_MESSAGE_SIZE;

/// Close code reported when the peer's close frame carries no status.
const CLOSE_NO_STATUS: u16 = 1005;

/// Reads frames until the link goes down and returns why it did.
///
/// Any inbound frame resets the read deadline; if nothing arrives within
/// `deadline` the link is considered dead.
pub(crate) async fn read_pump<S, F>(
    mut read: S,
    write_tx: mpsc::Sender<tungstenite::Message>,
    deadline: Duration,
    on_message: F,
    cancel: CancellationToken,
) -> DisconnectReason
where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
    F: Fn(Envelope),
{
    let read_deadline = tokio::time::sleep(deadline);
    tokio::pin!(read_deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return DisconnectReason::ClientClosed,

            () = &mut read_deadline => {
                warn!("no frame within {deadline:?}, link considered dead");
                return DisconnectReason::PingTimeout;
            }

            msg = read.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => return DisconnectReason::TransportError(e.to_string()),
                    None => return DisconnectReason::TransportClose,
                };
                read_deadline.as_mut().reset(tokio::time::Instant::now() + deadline);

                match msg {
                    tungstenite::Message::Text(text) => handle_text(text.as_str(), &on_message),
                    tungstenite::Message::Ping(data) => {
                        trace!("received ping, sending pong");
                        let _ = write_tx.send(tungstenite::Message::Pong(data)).await;
                    }
                    tungstenite::Message::Pong(_) => trace!("received pong"),
                    tungstenite::Message::Close(frame) => {
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.as_str().to_string()))
                            .unwrap_or((CLOSE_NO_STATUS, String::new()));
                        return DisconnectReason::ServerClosed { code, reason };
                    }
                    tungstenite::Message::Binary(data) => {
                        debug!(len = data.len(), "ignoring binary frame");
                    }
                    tungstenite::Message::Frame(_) => {}
                }
            }
        }
    }
}

/// Decodes a text frame and hands it to the callback.
fn handle_text<F: Fn(Envelope)>(text: &str, on_message: &F) {
    if text.len() > WS_MAX_MESSAGE_SIZE {
        warn!(len = text.len(), "dropping oversized frame");
        return;
    }
    match serde_json::from_str::<Envelope>(text) {
        Ok(envelope) => {
            trace!(event = %envelope.event, "realtime event");
            on_message(envelope);
        }
        Err(e) => warn!("dropping malformed frame: {e}"),
    }
}
