//! HTTP commands and queries for robots the caller owns.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info};

use growbot_core::errors::{DispatchError, PersistenceError};
use growbot_core::ids::{RobotId, UserId};
use growbot_core::messages::Command;
use growbot_core::records::NewEvent;

use crate::auth::AuthUser;
use crate::server::AppState;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Unauthorized")]
    NotOwner,
    #[error("Robot not found")]
    RobotNotFound,
    #[error("Robot not connected")]
    NotConnected,
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("Internal server error")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized | Self::NotOwner => StatusCode::UNAUTHORIZED,
            Self::RobotNotFound | Self::NotConnected | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(detail) = &self {
            error!(error = %detail, "request failed");
        }
        let body = json!({ "status": "error", "message": self.to_string() });
        (self.status(), Json(body)).into_response()
    }
}

impl From<PersistenceError> for ApiError {
    fn from(e: PersistenceError) -> Self {
        match e {
            PersistenceError::NotFound(what) => Self::NotFound(format!("Not found: {what}")),
            PersistenceError::Backend(detail) => Self::Internal(detail),
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::NotConnected(_) => Self::NotConnected,
            DispatchError::SendFailed { .. } => Self::Internal(e.to_string()),
            DispatchError::InvalidSetting { .. } => Self::BadRequest(e.to_string()),
            DispatchError::Persistence(inner) => inner.into(),
        }
    }
}

fn success() -> Json<Value> {
    Json(json!({ "status": "success" }))
}

/// Unknown robot is 404; a robot owned by someone else is 401.
pub async fn require_owned_robot(
    state: &AppState,
    user: UserId,
    robot: RobotId,
) -> Result<(), ApiError> {
    if !state.persistence.robot_exists(robot).await? {
        return Err(ApiError::RobotNotFound);
    }
    match state.persistence.get_owning_user(robot).await? {
        Some(owner) if owner == user => Ok(()),
        _ => Err(ApiError::NotOwner),
    }
}

#[derive(Debug, Deserialize)]
pub struct MoveRequest {
    pub direction: String,
}

#[derive(Debug, Deserialize)]
pub struct DemoRequest {
    pub procedure: String,
}

#[derive(Debug, Deserialize)]
pub struct SettingRequest {
    pub key: String,
    #[serde(default)]
    pub value: Value,
}

pub async fn move_robot(
    AuthUser(user): AuthUser,
    Path(robot): Path<RobotId>,
    State(state): State<AppState>,
    Json(req): Json<MoveRequest>,
) -> Result<Json<Value>, ApiError> {
    require_owned_robot(&state, user, robot).await?;
    state.dispatcher.send(robot, Command::Move(req.direction))?;
    Ok(success())
}

pub async fn start_demo(
    AuthUser(user): AuthUser,
    Path(robot): Path<RobotId>,
    State(state): State<AppState>,
    Json(req): Json<DemoRequest>,
) -> Result<Json<Value>, ApiError> {
    require_owned_robot(&state, user, robot).await?;
    state.dispatcher.send(robot, Command::DemoStart(req.procedure))?;
    Ok(success())
}

pub async fn patch_settings(
    AuthUser(user): AuthUser,
    Path(robot): Path<RobotId>,
    State(state): State<AppState>,
    Json(req): Json<SettingRequest>,
) -> Result<Json<Value>, ApiError> {
    require_owned_robot(&state, user, robot).await?;
    state
        .dispatcher
        .patch_setting(robot, &req.key, req.value)
        .await?;
    Ok(success())
}

pub async fn robot_status(
    AuthUser(user): AuthUser,
    Path(robot): Path<RobotId>,
    State(state): State<AppState>,
) -> Result<Json<Value>, ApiError> {
    require_owned_robot(&state, user, robot).await?;
    Ok(Json(json!({ "online": state.links.is_online(robot) })))
}

/// Store a schedule and push it straight to every connected robot it targets.
pub async fn create_event(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(event): Json<NewEvent>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if event.actions.is_empty() {
        return Err(ApiError::BadRequest("event has no actions".into()));
    }
    let mut targets: Vec<RobotId> = event.actions.iter().map(|a| a.robot_id).collect();
    targets.sort();
    targets.dedup();
    for robot in &targets {
        require_owned_robot(&state, user, *robot).await?;
    }

    let created = state.persistence.create_event(user, event).await?;
    info!(user_id = %user, event_id = %created.id, robots = created.robots.len(), "event created");
    state.delivery.push_to_all(&created.robots).await;

    Ok((StatusCode::CREATED, Json(json!({ "id": created.id }))))
}
