//! HTTP-level tests for the quest API
//!
//! Drives the real router over an in-memory store.

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use quest_server::api;
use quest_server::clock::ManualClock;
use quest_server::config::EngineConfig;
use quest_server::engine::QuestEngine;
use quest_server::state::AppState;
use quest_server::store::MemoryStore;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

const START: i64 = 1_700_000_000_000;

fn app_with_clock() -> (Router, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(START));
    let engine = QuestEngine::with_clock(
        Arc::new(MemoryStore::new()),
        EngineConfig::default(),
        clock.clone(),
    );
    let state = Arc::new(AppState::new(engine));
    (api::router(state), clock)
}

fn app() -> Router {
    app_with_clock().0
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        })
    };
    (status, value)
}

async fn create_quest(app: &Router, body: Value) -> String {
    let (status, quest) = send(app, Method::POST, "/api/v1/quests", Some(body)).await;
    assert_eq!(status, StatusCode::CREATED, "{}", quest);
    quest["id"].as_str().unwrap().to_string()
}

async fn complete(app: &Router, quest_id: &str, user_id: &str) -> (StatusCode, Value) {
    send(
        app,
        Method::POST,
        &format!("/api/v1/quests/{}/complete", quest_id),
        Some(json!({ "user_id": user_id })),
    )
    .await
}

#[tokio::test]
async fn test_health() {
    let (status, body) = send(&app(), Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("OK".to_string()));
}

#[tokio::test]
async fn test_complete_and_read_back() {
    let app = app();
    let quest_id = create_quest(
        &app,
        json!({ "creator_id": "creator", "title": "Retweet", "reward_points": 600 }),
    )
    .await;

    let (status, receipt) = complete(&app, &quest_id, "alice").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(receipt["completion"]["points_awarded"], 600);
    assert_eq!(receipt["xp"]["total_points"], 600);
    assert_eq!(receipt["rank"], 1);

    let (status, body) = complete(&app, &quest_id, "alice").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "already_completed");

    complete(&app, &quest_id, "bob").await;
    let other = create_quest(
        &app,
        json!({ "creator_id": "creator", "title": "Quote", "reward_points": 600 }),
    )
    .await;
    let (_, receipt) = complete(&app, &other, "bob").await;
    assert_eq!(receipt["xp"]["level"], 2);

    let (status, page) = send(&app, Method::GET, "/api/v1/leaderboard?limit=10", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page[0]["user_id"], "bob");
    assert_eq!(page[0]["rank"], 1);
    assert_eq!(page[1]["user_id"], "alice");
    assert_eq!(page[1]["rank"], 2);

    let (_, entry) = send(&app, Method::GET, "/api/v1/leaderboard/alice", None).await;
    assert_eq!(entry["rank"], 2);

    let (status, page) = send(
        &app,
        Method::GET,
        "/api/v1/leaderboard?offset=18446744073709551615",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page, json!([]));

    let (_, ledger) = send(
        &app,
        Method::GET,
        &format!("/api/v1/quests/{}/completions", quest_id),
        None,
    )
    .await;
    assert_eq!(ledger.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_unknown_user_xp_is_zero_state() {
    let (status, xp) = send(&app(), Method::GET, "/api/v1/users/ghost/xp", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(xp["total_points"], 0);
    assert_eq!(xp["level"], 1);
}

#[tokio::test]
async fn test_error_mapping() {
    let app = app();

    let (status, body) = complete(&app, "missing", "alice").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/quests",
        Some(json!({ "creator_id": "creator", "title": "  ", "reward_points": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation");

    for body in [
        json!({ "creator_id": "creator", "title": "Retweet", "reward_points": 3_000_000_000u64 }),
        json!({
            "creator_id": "creator",
            "title": "Retweet",
            "reward_points": 1,
            "expires_at": 17_000_000_000_000_000i64
        }),
    ] {
        let (status, body) = send(&app, Method::POST, "/api/v1/quests", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation");
    }

    let (status, _) = send(&app, Method::GET, "/api/v1/quests?status=archived", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let quest_id = create_quest(
        &app,
        json!({
            "creator_id": "creator",
            "title": "Prize quest",
            "reward_points": 5,
            "prize_pool": { "amount": 100, "token": "USDC", "mode": "fcfs", "number_of_winners": 1 }
        }),
    )
    .await;

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/api/v1/quests/{}/winners", quest_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::PRECONDITION_FAILED);
    assert_eq!(body["error"], "not_eligible");

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/api/v1/quests/{}/distribution", quest_id),
        Some(json!({ "proof": "tx-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "no_winner_record");

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/api/v1/quests/{}/pause", quest_id),
        Some(json!({ "actor_id": "mallory" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");
}

#[tokio::test]
async fn test_capacity_close_and_settlement_flow() {
    let app = app();
    let quest_id = create_quest(
        &app,
        json!({
            "creator_id": "creator",
            "title": "First two",
            "reward_points": 10,
            "max_completions": 2,
            "prize_pool": { "amount": 500, "token": "USDC", "mode": "fcfs", "number_of_winners": 3 }
        }),
    )
    .await;

    complete(&app, &quest_id, "alice").await;
    let (_, receipt) = complete(&app, &quest_id, "bob").await;
    assert_eq!(receipt["quest_closed"], true);

    let (status, body) = complete(&app, &quest_id, "carol").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "capacity_reached");

    let (status, record) = send(
        &app,
        Method::GET,
        &format!("/api/v1/quests/{}/winners", quest_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["winners"], json!(["alice", "bob"]));
    assert_eq!(record["prize_per_winner"], 166);

    let (_, recomputed) = send(
        &app,
        Method::POST,
        &format!("/api/v1/quests/{}/winners", quest_id),
        None,
    )
    .await;
    assert_eq!(recomputed, record);

    let uri = format!("/api/v1/quests/{}/distribution", quest_id);
    let (status, paid) = send(&app, Method::POST, &uri, Some(json!({ "proof": "0xabc" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(paid["distributed"], true);
    assert_eq!(paid["distribution_proof"], "0xabc");

    let (_, again) = send(&app, Method::POST, &uri, Some(json!({ "proof": "0xdef" }))).await;
    assert_eq!(again, paid);
}

#[tokio::test]
async fn test_expiry_is_detected_lazily() {
    let (app, clock) = app_with_clock();
    let quest_id = create_quest(
        &app,
        json!({
            "creator_id": "creator",
            "title": "Weekend only",
            "reward_points": 10,
            "expires_at": START + 1_000
        }),
    )
    .await;

    let uri = format!("/api/v1/quests/{}/eligibility", quest_id);
    let (_, eligibility) = send(&app, Method::GET, &uri, None).await;
    assert_eq!(eligibility["ok"], true);

    clock.advance(2_000);
    let (status, body) = complete(&app, &quest_id, "alice").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "expired");

    let (_, quest) = send(&app, Method::GET, &format!("/api/v1/quests/{}", quest_id), None).await;
    assert_eq!(quest["status"], "expired");
    assert_eq!(quest["closed_at"], START + 1_000);

    let (_, listed) = send(&app, Method::GET, "/api/v1/quests?status=expired", None).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_edit_and_delete_by_creator() {
    let app = app();
    let quest_id = create_quest(
        &app,
        json!({ "creator_id": "creator", "title": "Draft", "reward_points": 50 }),
    )
    .await;
    complete(&app, &quest_id, "alice").await;

    let uri = format!("/api/v1/quests/{}", quest_id);
    let (status, quest) = send(
        &app,
        Method::PATCH,
        &uri,
        Some(json!({ "actor_id": "creator", "reward_points": 500, "title": "Final" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(quest["reward_points"], 500);
    assert_eq!(quest["title"], "Final");

    let (_, ledger) = send(&app, Method::GET, &format!("{}/completions", uri), None).await;
    assert_eq!(ledger[0]["points_awarded"], 50);

    let (status, _) = send(&app, Method::DELETE, &format!("{}?actor_id=alice", uri), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&app, Method::DELETE, &format!("{}?actor_id=creator", uri), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, xp) = send(&app, Method::GET, "/api/v1/users/alice/xp", None).await;
    assert_eq!(xp["total_points"], 50);
}
