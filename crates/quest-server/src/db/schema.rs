//! Database schema and migrations

use anyhow::Result;
use deadpool_postgres::Object;
use tracing::info;

pub async fn run_migrations(client: &Object) -> Result<()> {
    client.batch_execute(SCHEMA_SQL).await?;
    info!("Database migrations applied");
    Ok(())
}

const SCHEMA_SQL: &str = r#"
-- Quest settlement schema

CREATE TABLE IF NOT EXISTS quests (
    id VARCHAR(128) PRIMARY KEY,
    creator_id VARCHAR(128) NOT NULL,
    title VARCHAR(255) NOT NULL,
    reward_points INTEGER NOT NULL CHECK (reward_points >= 0),
    -- Prize pool, all four set or all NULL
    prize_amount BIGINT CHECK (prize_amount IS NULL OR prize_amount >= 0),
    prize_token VARCHAR(64),
    distribution_mode VARCHAR(16) CHECK (distribution_mode IN ('fcfs', 'raffle')),
    number_of_winners INTEGER CHECK (number_of_winners IS NULL OR number_of_winners > 0),
    -- NULL = unlimited
    max_completions INTEGER CHECK (max_completions IS NULL OR max_completions > 0),
    expires_at TIMESTAMPTZ,
    status VARCHAR(16) NOT NULL DEFAULT 'active'
        CHECK (status IN ('active', 'paused', 'completed', 'expired')),
    closed_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_quests_status ON quests(status);
CREATE INDEX IF NOT EXISTS idx_quests_expiry ON quests(expires_at) WHERE status = 'active';

-- Completion ledger, append-only
CREATE TABLE IF NOT EXISTS completions (
    sequence BIGSERIAL PRIMARY KEY,
    quest_id VARCHAR(128) NOT NULL REFERENCES quests(id) ON DELETE CASCADE,
    user_id VARCHAR(128) NOT NULL,
    points_awarded INTEGER NOT NULL,
    completed_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE(quest_id, user_id)
);

CREATE INDEX IF NOT EXISTS idx_completions_ledger ON completions(quest_id, completed_at, sequence);

CREATE TABLE IF NOT EXISTS user_xp (
    user_id VARCHAR(128) PRIMARY KEY,
    total_points BIGINT NOT NULL DEFAULT 0,
    quests_completed INTEGER NOT NULL DEFAULT 0,
    level INTEGER NOT NULL DEFAULT 1,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

-- Materialized ranks, rebuilt from user_xp
CREATE TABLE IF NOT EXISTS leaderboard (
    user_id VARCHAR(128) PRIMARY KEY,
    total_points BIGINT NOT NULL,
    level INTEGER NOT NULL,
    rank BIGINT NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_leaderboard_rank ON leaderboard(rank);

-- One record per quest, written once
CREATE TABLE IF NOT EXISTS winner_records (
    quest_id VARCHAR(128) PRIMARY KEY REFERENCES quests(id) ON DELETE CASCADE,
    winners TEXT[] NOT NULL DEFAULT '{}',
    prize_per_winner BIGINT NOT NULL,
    token VARCHAR(64) NOT NULL,
    mode VARCHAR(16) NOT NULL CHECK (mode IN ('fcfs', 'raffle')),
    computed_at TIMESTAMPTZ NOT NULL,
    distributed BOOLEAN NOT NULL DEFAULT FALSE,
    distribution_proof TEXT,
    distributed_at TIMESTAMPTZ
);

-- Audit trail
CREATE TABLE IF NOT EXISTS events (
    id BIGSERIAL PRIMARY KEY,
    event_type VARCHAR(64) NOT NULL,
    entity_type VARCHAR(64),
    entity_id VARCHAR(128),
    actor_id VARCHAR(128),
    payload JSONB,
    duration_ms BIGINT,
    success BOOLEAN NOT NULL DEFAULT TRUE,
    error_message TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id);
CREATE INDEX IF NOT EXISTS idx_events_created ON events(created_at DESC);
"#;
