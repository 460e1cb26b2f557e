//! Winner selection and distribution API handlers

use crate::error::QuestError;
use crate::models::*;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;

/// Idempotent: returns the stored record when one exists
pub async fn compute_winners(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<WinnerRecord>, QuestError> {
    Ok(Json(state.engine.compute_winners(&id).await?))
}

pub async fn get_winners(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<WinnerRecord>, QuestError> {
    Ok(Json(state.engine.winner_record(&id).await?))
}

pub async fn mark_distributed(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<MarkDistributedRequest>,
) -> Result<Json<WinnerRecord>, QuestError> {
    Ok(Json(state.engine.mark_distributed(&id, req.proof).await?))
}
