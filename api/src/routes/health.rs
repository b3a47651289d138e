use axum::extract::State;
use axum::{Json, Router, routing::get};
use chrono::Utc;

use crate::HealthResponse;
use crate::extract::ClientOrigin;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/health", get(health_check))
}

/// Health check endpoint
///
/// Reports the caller's pending form count and the number of conversation
/// sessions held in memory.
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check(
    State(state): State<AppState>,
    ClientOrigin(origin): ClientOrigin,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        pending_forms: state.forms.pending_count(state.forms.scope_for(&origin)),
        active_sessions: state.conversations.active_sessions(),
    })
}
