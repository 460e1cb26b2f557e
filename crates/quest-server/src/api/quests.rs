//! Quest registry API handlers

use crate::error::QuestError;
use crate::models::*;
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct ListQuestsQuery {
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuestQuery {
    pub actor_id: String,
}

pub async fn create_quest(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateQuestRequest>,
) -> Result<(StatusCode, Json<Quest>), QuestError> {
    let quest = state.engine.create_quest(req).await?;
    Ok((StatusCode::CREATED, Json(quest)))
}

pub async fn list_quests(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuestsQuery>,
) -> Result<Json<Vec<Quest>>, QuestError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<QuestStatus>)
        .transpose()
        .map_err(QuestError::Validation)?;
    Ok(Json(state.engine.list_quests(status).await?))
}

pub async fn get_quest(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Quest>, QuestError> {
    Ok(Json(state.engine.get_quest(&id).await?))
}

pub async fn update_quest(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateQuestRequest>,
) -> Result<Json<Quest>, QuestError> {
    Ok(Json(state.engine.update_quest(&id, req).await?))
}

pub async fn delete_quest(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<DeleteQuestQuery>,
) -> Result<StatusCode, QuestError> {
    state.engine.delete_quest(&id, &query.actor_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn pause_quest(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<QuestActionRequest>,
) -> Result<Json<Quest>, QuestError> {
    Ok(Json(state.engine.pause_quest(&id, &req.actor_id).await?))
}

pub async fn resume_quest(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<QuestActionRequest>,
) -> Result<Json<Quest>, QuestError> {
    Ok(Json(state.engine.resume_quest(&id, &req.actor_id).await?))
}

pub async fn close_quest(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<QuestActionRequest>,
) -> Result<Json<Quest>, QuestError> {
    Ok(Json(state.engine.close_quest(&id, &req.actor_id).await?))
}

pub async fn get_eligibility(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Eligibility>, QuestError> {
    Ok(Json(state.engine.can_accept(&id).await?))
}
