//! Leaderboard and XP API handlers

use crate::error::QuestError;
use crate::models::*;
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

pub async fn get_leaderboard(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<Vec<LeaderboardEntry>>, QuestError> {
    let entries = state
        .engine
        .leaderboard_page(query.limit, query.offset)
        .await?;
    Ok(Json(entries))
}

pub async fn get_user_rank(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<LeaderboardEntry>, QuestError> {
    Ok(Json(state.engine.leaderboard_entry(&user_id).await?))
}

pub async fn get_user_xp(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<UserXp>, QuestError> {
    Ok(Json(state.engine.user_xp(&user_id).await?))
}
