//! Write pump: serialises outbound frames onto the socket.

use std::time::Duration;

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Time allowed to write a single frame.
const WRITE_WAIT: Duration = Duration::from_secs(10);

/// Forwards queued frames to the sink. Sends a Close frame on the way out.
pub(crate) async fn write_pump<S>(
    mut write: S,
    mut write_rx: mpsc::Receiver<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = write_rx.recv() => {
                let Some(msg) = msg else { break };
                match tokio::time::timeout(WRITE_WAIT, write.send(msg)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        error!("realtime write error: {e}");
                        break;
                    }
                    Err(_) => {
                        error!("realtime write timed out after {WRITE_WAIT:?}");
                        break;
                    }
                }
            }
        }
    }

    if let Err(e) = write.send(tungstenite::Message::Close(None)).await {
        debug!("close frame not sent: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::sink;

    fn channel_sink(
        tx: mpsc::Sender<tungstenite::Message>,
    ) -> impl SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin {
        Box::pin(sink::unfold(tx, |tx, msg: tungstenite::Message| async move {
            let _ = tx.send(msg).await;
            Ok::<_, tungstenite::Error>(tx)
        }))
    }

    #[tokio::test]
    async fn write_pump_forwards_in_order_then_closes() {
        let (sink_tx, mut sink_rx) = mpsc::channel(16);
        let (write_tx, write_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        write_tx
            .send(tungstenite::Message::Text("one".into()))
            .await
            .unwrap();
        write_tx
            .send(tungstenite::Message::Text("two".into()))
            .await
            .unwrap();
        drop(write_tx);

        write_pump(channel_sink(sink_tx), write_rx, cancel).await;

        assert_eq!(
            sink_rx.recv().await,
            Some(tungstenite::Message::Text("one".into()))
        );
        assert_eq!(
            sink_rx.recv().await,
            Some(tungstenite::Message::Text("two".into()))
        );
        assert!(matches!(
            sink_rx.recv().await,
            Some(tungstenite::Message::Close(None))
        ));
    }

    #[tokio::test]
    async fn write_pump_stops_on_cancel() {
        let (sink_tx, mut sink_rx) = mpsc::channel(16);
        let (_write_tx, write_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let c = cancel.clone();
        let handle = tokio::spawn(async move {
            write_pump(channel_sink(sink_tx), write_rx, c).await;
        });

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("should stop")
            .expect("no panic");

        assert!(matches!(
            sink_rx.recv().await,
            Some(tungstenite::Message::Close(_))
        ));
    }
}
