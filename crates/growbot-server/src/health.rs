use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub robots_online: usize,
    pub relays: usize,
    pub user_sessions: usize,
}

impl HealthResponse {
    pub fn from_state(state: &AppState) -> Self {
        Self {
            status: if state.shutdown.is_shutting_down() {
                "shutting_down"
            } else {
                "ok"
            },
            uptime_secs: state.started_at.elapsed().as_secs(),
            robots_online: state.links.len(),
            relays: state.relays.len(),
            user_sessions: state.fanout.total_sessions(),
        }
    }
}

pub async fn health_handler(State(state): State<AppState>) -> Response {
    let health = HealthResponse::from_state(&state);
    let status = if health.status == "ok" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(health)).into_response()
}

/// Prometheus text exposition; 404 when no recorder was installed.
pub async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
