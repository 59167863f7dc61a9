//! The user notification WebSocket.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::StreamExt;
use tracing::{debug, info, instrument, warn};

use growbot_core::ids::UserId;
use growbot_core::messages::{Envelope, Notification};

use crate::auth::AuthUser;
use crate::fanout::NotificationSession;
use crate::server::AppState;
use crate::socket::write_loop;

/// `GET /stream`. Server to client only; the session starts with the user's
/// scheduled actions.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| run(socket, user, state))
}

#[instrument(skip_all, fields(user_id = %user))]
async fn run(socket: WebSocket, user: UserId, state: AppState) {
    let (session, rx) = NotificationSession::channel(user, state.config.max_send_queue);
    state.fanout.add_session(session.clone());
    info!(session_id = %session.id(), "user session opened");

    let stop = state.shutdown.child_token();
    let (sink, mut stream) = socket.split();
    let writer = tokio::spawn(write_loop(
        sink,
        rx,
        state.config.heartbeat_interval,
        stop.clone(),
    ));

    match state.persistence.get_user_actions(user).await {
        Ok(actions) => {
            let initial = Notification::Events(actions);
            session.try_send(Envelope::new(initial.event_type(), initial.payload()).encode());
        }
        Err(e) => warn!(error = %e, "failed to load scheduled actions"),
    }

    loop {
        let frame = tokio::select! {
            _ = stop.cancelled() => break,
            frame = stream.next() => frame,
        };
        match frame {
            Some(Ok(Message::Text(text))) => {
                debug!(len = text.len(), "unexpected frame on user session");
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!(error = %e, "user session read failed");
                break;
            }
        }
    }

    state.fanout.remove_session(&session);
    stop.cancel();
    if tokio::time::timeout(Duration::from_secs(1), writer).await.is_err() {
        debug!("writer did not stop in time");
    }
    info!(session_id = %session.id(), "user session closed");
}
