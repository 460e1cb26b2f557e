//! Completion ledger API handlers

use crate::error::QuestError;
use crate::models::*;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

pub async fn complete_quest(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<CompleteQuestRequest>,
) -> Result<(StatusCode, Json<CompletionReceipt>), QuestError> {
    let receipt = state.engine.record_completion(&id, &req.user_id).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

pub async fn list_completions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Completion>>, QuestError> {
    Ok(Json(state.engine.list_completions(&id).await?))
}
