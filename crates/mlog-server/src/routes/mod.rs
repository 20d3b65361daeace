pub mod crew;
pub mod missions;
pub mod statistics;
pub mod upload;
pub mod users;

use crate::auth::bearer_claims;
use crate::AppState;
use axum::{extract::State, http::HeaderMap, Json};
use mlog_proto::HealthResponse;
use serde_json::{json, Value};
use std::sync::Arc;

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

pub async fn start_generation(State(state): State<Arc<AppState>>) -> Json<Value> {
    let status = state.generator.start().await;
    Json(json!({ "status": status.message() }))
}

pub async fn stop_generation(State(state): State<Arc<AppState>>) -> Json<Value> {
    let status = state.generator.stop().await;
    Json(json!({ "status": status.message() }))
}

/// Record a write in the action log when the caller is authenticated.
/// Anonymous writes are allowed and simply not attributed.
pub(crate) async fn record_action(state: &AppState, headers: &HeaderMap, action: &str, entity: &str) {
    let Some(claims) = bearer_claims(headers, &state.settings.auth.jwt_secret) else {
        return;
    };
    if let Err(e) = state.db.log_action(claims.sub, action, entity).await {
        tracing::warn!(error = ?e, user_id = claims.sub, action, entity, "failed to record action");
    }
}
