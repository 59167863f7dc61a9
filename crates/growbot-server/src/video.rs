//! Video producer socket and MJPEG viewer endpoint.

use axum::body::Body;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use tracing::{debug, info, instrument};

use growbot_core::ids::RobotId;

use crate::api::{require_owned_robot, ApiError};
use crate::auth::AuthUser;
use crate::mjpeg;
use crate::relay::FrameSource;
use crate::server::AppState;

/// `GET /stream-video/{robot_id}`: the robot's camera feed.
pub async fn producer_handler(
    ws: WebSocketUpgrade,
    Path(robot): Path<RobotId>,
    State(state): State<AppState>,
) -> Response {
    match state.persistence.robot_exists(robot).await {
        Ok(true) => ws.on_upgrade(move |socket| run_producer(socket, robot, state)),
        Ok(false) => ApiError::RobotNotFound.into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

#[instrument(skip_all, fields(robot_id = %robot))]
async fn run_producer(mut socket: WebSocket, robot: RobotId, state: AppState) {
    let relay = state.relays.get_or_create(robot);
    info!("video producer connected");

    let shutdown = state.shutdown.token();
    let mut frames = 0u64;
    loop {
        let message = tokio::select! {
            _ = shutdown.cancelled() => break,
            message = socket.recv() => message,
        };
        match message {
            Some(Ok(Message::Text(text))) => {
                // Decode failures are logged and counted by the relay.
                if state.relays.update(robot, text.as_str()).is_ok() {
                    frames += 1;
                }
            }
            Some(Ok(Message::Binary(jpeg))) => {
                state.relays.update_bytes(robot, jpeg);
                frames += 1;
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!(error = %e, "video read failed");
                break;
            }
        }
    }
    info!(frames, viewers = relay.subscriber_count(), "video producer disconnected");
}

/// `GET /robot/{robot_id}/video`: multipart MJPEG for the robot's owner.
pub async fn viewer_handler(
    AuthUser(user): AuthUser,
    Path(robot): Path<RobotId>,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    require_owned_robot(&state, user, robot).await?;

    let frames: FrameSource = Box::pin(
        state
            .relays
            .subscribe(robot)
            .take_until(state.shutdown.token().cancelled_owned()),
    );
    debug!(robot_id = %robot, user_id = %user, "video viewer attached");

    Response::builder()
        .header(CONTENT_TYPE, mjpeg::content_type())
        .header(CACHE_CONTROL, "no-cache, no-store, must-revalidate")
        .body::<Body>(mjpeg::body(frames))
        .map_err(|e| ApiError::Internal(e.to_string()))
}
