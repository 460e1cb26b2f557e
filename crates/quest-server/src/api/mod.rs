//! API handlers

pub mod completions;
pub mod leaderboard;
pub mod quests;
pub mod winners;

use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub async fn health_check() -> &'static str {
    "OK"
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        // === QUEST REGISTRY ===
        .route(
            "/api/v1/quests",
            get(quests::list_quests).post(quests::create_quest),
        )
        .route(
            "/api/v1/quests/:id",
            get(quests::get_quest)
                .patch(quests::update_quest)
                .delete(quests::delete_quest),
        )
        .route("/api/v1/quests/:id/pause", post(quests::pause_quest))
        .route("/api/v1/quests/:id/resume", post(quests::resume_quest))
        .route("/api/v1/quests/:id/close", post(quests::close_quest))
        .route(
            "/api/v1/quests/:id/eligibility",
            get(quests::get_eligibility),
        )
        // === COMPLETION LEDGER ===
        .route(
            "/api/v1/quests/:id/complete",
            post(completions::complete_quest),
        )
        .route(
            "/api/v1/quests/:id/completions",
            get(completions::list_completions),
        )
        // === WINNERS & DISTRIBUTION ===
        .route(
            "/api/v1/quests/:id/winners",
            get(winners::get_winners).post(winners::compute_winners),
        )
        .route(
            "/api/v1/quests/:id/distribution",
            post(winners::mark_distributed),
        )
        // === XP & LEADERBOARD ===
        .route("/api/v1/leaderboard", get(leaderboard::get_leaderboard))
        .route(
            "/api/v1/leaderboard/:user_id",
            get(leaderboard::get_user_rank),
        )
        .route("/api/v1/users/:user_id/xp", get(leaderboard::get_user_xp))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
