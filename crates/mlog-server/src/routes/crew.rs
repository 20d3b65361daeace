use super::record_action;
use crate::error::{AppError, AppResult};
use crate::validation::{validate_crew, CrewPayload};
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use mlog_proto::{CrewMember, CrewMemberDetail, CrewPage, CrewQuery};
use std::sync::Arc;

pub async fn list_crew(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CrewQuery>,
) -> AppResult<Json<CrewPage>> {
    let (members, total) = state.db.list_crew(&query).await?;
    let mut crew_members = Vec::with_capacity(members.len());
    for member in members {
        let missions = state.db.crew_missions(member.id).await?;
        crew_members.push(CrewMemberDetail { member, missions });
    }
    let limit = query.limit();
    Ok(Json(CrewPage {
        crew_members,
        total,
        page: query.page(),
        total_pages: (total + limit - 1) / limit,
    }))
}

pub async fn get_crew(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> AppResult<Json<CrewMemberDetail>> {
    let member = state
        .db
        .get_crew(id)
        .await?
        .ok_or(AppError::NotFound("Crew member"))?;
    let missions = state.db.crew_missions(id).await?;
    Ok(Json(CrewMemberDetail { member, missions }))
}

pub async fn create_crew(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<CrewPayload>,
) -> AppResult<(StatusCode, Json<CrewMember>)> {
    let draft = validate_crew(&payload).map_err(AppError::Validation)?;
    let member = state.db.insert_crew(&draft).await?;
    tracing::info!(id = member.id, name = %member.name, "crew member created");
    record_action(&state, &headers, "create", "crew").await;
    Ok((StatusCode::CREATED, Json(member)))
}

pub async fn update_crew(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(payload): Json<CrewPayload>,
) -> AppResult<Json<CrewMember>> {
    let draft = validate_crew(&payload).map_err(AppError::Validation)?;
    let member = state
        .db
        .update_crew(id, &draft)
        .await?
        .ok_or(AppError::NotFound("Crew member"))?;
    record_action(&state, &headers, "update", "crew").await;
    Ok(Json(member))
}

pub async fn delete_crew(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> AppResult<StatusCode> {
    if !state.db.delete_crew(id).await? {
        return Err(AppError::NotFound("Crew member"));
    }
    record_action(&state, &headers, "delete", "crew").await;
    Ok(StatusCode::NO_CONTENT)
}
