//! Writer half shared by robot links and user notification sessions.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::stream::SplitSink;
use futures::SinkExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Drain `rx` into the socket, pinging every `heartbeat`. Stops when the
/// queue closes, a write fails, or `stop` is cancelled (sending a Close
/// frame). Cancels `stop` on the way out so the reader notices.
pub async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<String>,
    heartbeat: Duration,
    stop: CancellationToken,
) {
    let mut ping = tokio::time::interval(heartbeat);
    ping.tick().await; // consume first immediate tick

    loop {
        tokio::select! {
            _ = stop.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            frame = rx.recv() => {
                let Some(text) = frame else { break };
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            _ = ping.tick() => {
                if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
                trace!("sent ping");
            }
        }
    }
    stop.cancel();
}
