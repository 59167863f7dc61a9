//! The robot link WebSocket: one task per connected robot.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use tracing::{debug, info, instrument, warn};

use growbot_core::ids::RobotId;
use growbot_core::messages::InboundMessage;

use crate::api::ApiError;
use crate::link::{LinkRegistry, RobotLink};
use crate::metrics::{ROBOT_LINKS_TOTAL, ROBOT_PROTOCOL_ERRORS_TOTAL};
use crate::server::AppState;
use crate::socket::write_loop;

const WRITER_DRAIN: Duration = Duration::from_secs(1);

/// `GET /stream/{robot_id}`. Robots authenticate by id alone.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(robot): Path<RobotId>,
    State(state): State<AppState>,
) -> Response {
    match state.persistence.robot_exists(robot).await {
        Ok(true) => ws.on_upgrade(move |socket| run(socket, robot, state)),
        Ok(false) => ApiError::RobotNotFound.into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// Unregisters the link however the connection task ends.
struct Registration {
    links: Arc<LinkRegistry>,
    link: Arc<RobotLink>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.links.unregister(&self.link);
        self.link.close();
    }
}

#[instrument(skip_all, fields(robot_id = %robot))]
async fn run(socket: WebSocket, robot: RobotId, state: AppState) {
    if let Err(e) = state.inbound.mark_seen(robot).await {
        warn!(error = %e, "failed to record robot as seen");
    }

    let (link, rx) = RobotLink::channel(robot, state.config.max_send_queue);
    state.links.register(link.clone());
    let registration = Registration {
        links: state.links.clone(),
        link: link.clone(),
    };
    metrics::counter!(ROBOT_LINKS_TOTAL).increment(1);
    info!(link_id = %link.id(), "robot connected");

    let (sink, mut stream) = socket.split();
    let writer = tokio::spawn(write_loop(
        sink,
        rx,
        state.config.heartbeat_interval,
        link.close_token(),
    ));

    match state.delivery.push_pending(robot, false).await {
        Ok(delivery) => debug!(?delivery, "initial push"),
        Err(e) => warn!(error = %e, "initial push failed"),
    }

    let shutdown = state.shutdown.token();
    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = link.closed() => {
                debug!("link closed");
                break;
            }
            frame = stream.next() => frame,
        };
        match frame {
            Some(Ok(Message::Text(text))) => handle_frame(&state, robot, text.as_str()).await,
            Some(Ok(Message::Binary(bytes))) => {
                debug!(len = bytes.len(), "ignoring binary frame on robot link");
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!(error = %e, "robot link read failed");
                break;
            }
        }
    }

    drop(registration);
    if tokio::time::timeout(WRITER_DRAIN, writer).await.is_err() {
        debug!("writer did not stop in time");
    }
    info!(
        link_id = %link.id(),
        connected_secs = link.connected_at().elapsed().as_secs(),
        dropped = link.dropped_count(),
        "robot disconnected"
    );
}

/// Frames are handled one at a time, in arrival order.
async fn handle_frame(state: &AppState, robot: RobotId, text: &str) {
    if let Err(e) = state.inbound.mark_seen(robot).await {
        warn!(error = %e, "failed to record robot as seen");
    }

    let message = match InboundMessage::parse(text) {
        Ok(message) => message,
        Err(e) => {
            metrics::counter!(ROBOT_PROTOCOL_ERRORS_TOTAL, "kind" => e.error_kind()).increment(1);
            warn!(error = %e, "dropping malformed frame");
            return;
        }
    };

    let kind = message.kind().to_string();
    match state.inbound.handle(robot, message).await {
        Ok(handled) => debug!(%kind, ?handled, "frame handled"),
        Err(e) => warn!(%kind, error = %e, "frame handling failed"),
    }
}
