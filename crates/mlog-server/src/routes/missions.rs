use super::record_action;
use crate::error::{AppError, AppResult};
use crate::validation::{validate_mission, validate_mission_patch, MissionPayload};
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use mlog_proto::{Mission, MissionList, MissionQuery};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignCrewRequest {
    pub crew_member_id: i64,
    pub role_in_mission: String,
}

pub async fn list_missions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MissionQuery>,
) -> AppResult<Json<MissionList>> {
    let missions = state.db.list_missions(&query).await?;
    Ok(Json(MissionList { missions }))
}

pub async fn get_mission(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> AppResult<Json<Mission>> {
    state
        .db
        .get_mission(id)
        .await?
        .map(Json)
        .ok_or(AppError::NotFound("Mission"))
}

pub async fn create_mission(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<MissionPayload>,
) -> AppResult<(StatusCode, Json<Mission>)> {
    let draft = validate_mission(&payload).map_err(AppError::Validation)?;
    let mission = state.db.insert_mission(&draft).await?;
    tracing::info!(id = mission.id, name = %mission.name, "mission created");
    record_action(&state, &headers, "create", "mission").await;
    Ok((StatusCode::CREATED, Json(mission)))
}

pub async fn update_mission(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(payload): Json<MissionPayload>,
) -> AppResult<Json<Mission>> {
    let draft = validate_mission(&payload).map_err(AppError::Validation)?;
    let mission = state
        .db
        .replace_mission(id, &draft)
        .await?
        .ok_or(AppError::NotFound("Mission"))?;
    record_action(&state, &headers, "update", "mission").await;
    Ok(Json(mission))
}

pub async fn patch_mission(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(payload): Json<MissionPayload>,
) -> AppResult<Json<Mission>> {
    let patch = validate_mission_patch(&payload).map_err(AppError::Validation)?;
    let current = state
        .db
        .get_mission(id)
        .await?
        .ok_or(AppError::NotFound("Mission"))?;
    if patch.is_empty() {
        return Ok(Json(current));
    }
    let mission = state
        .db
        .replace_mission(id, &patch.apply_to(&current))
        .await?
        .ok_or(AppError::NotFound("Mission"))?;
    record_action(&state, &headers, "update", "mission").await;
    Ok(Json(mission))
}

pub async fn delete_mission(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> AppResult<StatusCode> {
    if !state.db.delete_mission(id).await? {
        return Err(AppError::NotFound("Mission"));
    }
    tracing::info!(id, "mission deleted");
    record_action(&state, &headers, "delete", "mission").await;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn assign_crew(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(payload): Json<AssignCrewRequest>,
) -> AppResult<(StatusCode, Json<Mission>)> {
    if state.db.get_mission(id).await?.is_none() {
        return Err(AppError::NotFound("Mission"));
    }
    if state.db.get_crew(payload.crew_member_id).await?.is_none() {
        return Err(AppError::NotFound("Crew member"));
    }
    let role = payload.role_in_mission.trim();
    if role.is_empty() {
        return Err(AppError::bad_request("roleInMission is required"));
    }
    state
        .db
        .upsert_assignment(id, payload.crew_member_id, role)
        .await?;
    record_action(&state, &headers, "update", "mission").await;
    let mission = state
        .db
        .get_mission(id)
        .await?
        .ok_or(AppError::NotFound("Mission"))?;
    Ok((StatusCode::CREATED, Json(mission)))
}

pub async fn unassign_crew(
    State(state): State<Arc<AppState>>,
    Path((mission_id, crew_member_id)): Path<(i64, i64)>,
    headers: HeaderMap,
) -> AppResult<StatusCode> {
    if state.db.get_mission(mission_id).await?.is_none() {
        return Err(AppError::NotFound("Mission"));
    }
    if !state.db.remove_assignment(mission_id, crew_member_id).await? {
        return Err(AppError::NotFound("Crew assignment"));
    }
    record_action(&state, &headers, "update", "mission").await;
    Ok(StatusCode::NO_CONTENT)
}
