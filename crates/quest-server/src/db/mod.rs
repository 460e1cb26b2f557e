//! PostgreSQL storage backend
//!
//! Every `QuestStore` call runs on one pooled connection; multi-statement
//! calls run in a transaction. `record_completion` locks the quest row so
//! capacity checks serialize per quest, and the `(quest_id, user_id)`
//! unique constraint is the final word on duplicates.

pub mod queries;
pub mod schema;

use crate::models::{
    Completion, LeaderboardEntry, Quest, QuestStatus, RejectReason, UserXp, WinnerRecord,
};
use crate::observability::AuditEntry;
use crate::registry::{self, Acceptance};
use crate::store::{CompletionOutcome, QuestEdit, QuestStore};
use crate::xp::LevelCurve;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use queries::{
    completion_from_row, leaderboard_from_row, quest_from_row, to_opt_ts, to_ts,
    user_xp_from_row, winner_record_from_row, PrizeColumns, COMPLETION_COLUMNS,
    LEADERBOARD_COLUMNS, QUEST_COLUMNS, WINNER_COLUMNS,
};
use tokio_postgres::NoTls;
use tracing::{debug, info};

pub type DbPool = Pool;

const DB_NAME: &str = "quest_platform";

/// Serializes concurrent leaderboard rebuilds
const RANK_REFRESH_LOCK: i64 = 0x5155_4553_5452_4e4b;

/// Connect to the quest database, creating it and applying migrations if
/// needed. A database name on `base_url` is ignored.
pub async fn init_db(base_url: &str) -> Result<DbPool> {
    let admin_pool = pool_from_config(database_config(base_url, "postgres")?).await?;
    let admin_client = admin_pool.get().await?;

    let row = admin_client
        .query_opt("SELECT 1 FROM pg_database WHERE datname = $1", &[&DB_NAME])
        .await?;

    if row.is_none() {
        admin_client
            .execute(&format!("CREATE DATABASE {}", DB_NAME), &[])
            .await?;
        info!("Created database: {}", DB_NAME);
    }

    let pool = pool_from_config(database_config(base_url, DB_NAME)?).await?;
    let client = pool.get().await?;
    schema::run_migrations(&client).await?;

    info!("Quest database initialized: {}", DB_NAME);
    Ok(pool)
}

/// Parse a connection string (URL or key=value form) and point it at `dbname`
pub fn database_config(url: &str, dbname: &str) -> Result<tokio_postgres::Config> {
    let mut config: tokio_postgres::Config = url
        .parse()
        .map_err(|e| anyhow!("invalid database url: {}", e))?;
    config.dbname(dbname);
    Ok(config)
}

async fn pool_from_config(config: tokio_postgres::Config) -> Result<DbPool> {
    let manager = Manager::from_config(
        config,
        NoTls,
        ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        },
    );
    let pool = Pool::builder(manager).runtime(Runtime::Tokio1).build()?;

    // Fail fast on an unreachable server
    let _ = pool.get().await?;

    Ok(pool)
}

pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        Ok(Self::new(init_db(database_url).await?))
    }
}

#[async_trait]
impl QuestStore for PgStore {
    async fn insert_quest(&self, quest: &Quest) -> Result<()> {
        let prize = PrizeColumns::from_pool(quest.prize_pool.as_ref())?;
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO quests (id, creator_id, title, reward_points, prize_amount, prize_token,
                    distribution_mode, number_of_winners, max_completions, expires_at, status,
                    closed_at, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
                &[
                    &quest.id,
                    &quest.creator_id,
                    &quest.title,
                    &i32::try_from(quest.reward_points)?,
                    &prize.amount,
                    &prize.token,
                    &prize.mode,
                    &prize.number_of_winners,
                    &quest.max_completions.map(i32::try_from).transpose()?,
                    &to_opt_ts(quest.expires_at)?,
                    &quest.status.as_str(),
                    &to_opt_ts(quest.closed_at)?,
                    &to_ts(quest.created_at)?,
                    &to_ts(quest.updated_at)?,
                ],
            )
            .await?;
        Ok(())
    }

    async fn get_quest(&self, quest_id: &str) -> Result<Option<Quest>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!("SELECT {} FROM quests WHERE id = $1", QUEST_COLUMNS),
                &[&quest_id],
            )
            .await?;
        row.as_ref().map(quest_from_row).transpose()
    }

    async fn list_quests(&self, status: Option<QuestStatus>) -> Result<Vec<Quest>> {
        let client = self.pool.get().await?;
        let rows = match status {
            Some(status) => {
                client
                    .query(
                        &format!(
                            "SELECT {} FROM quests WHERE status = $1 ORDER BY created_at, id",
                            QUEST_COLUMNS
                        ),
                        &[&status.as_str()],
                    )
                    .await?
            }
            None => {
                client
                    .query(
                        &format!("SELECT {} FROM quests ORDER BY created_at, id", QUEST_COLUMNS),
                        &[],
                    )
                    .await?
            }
        };
        rows.iter().map(quest_from_row).collect()
    }

    async fn update_quest(&self, quest: &Quest) -> Result<QuestEdit> {
        let prize = PrizeColumns::from_pool(quest.prize_pool.as_ref())?;
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        // Same lock order as record_completion, so the ledger count holds
        let status: Option<String> = tx
            .query_opt("SELECT status FROM quests WHERE id = $1 FOR UPDATE", &[&quest.id])
            .await?
            .map(|row| row.get(0));
        let Some(status) = status else {
            return Ok(QuestEdit::Missing);
        };
        if status
            .parse::<QuestStatus>()
            .map_err(|e| anyhow!(e))?
            .is_closed()
        {
            return Ok(QuestEdit::Closed);
        }

        let completions = tx
            .query_one(
                "SELECT COUNT(*) FROM completions WHERE quest_id = $1",
                &[&quest.id],
            )
            .await?
            .get::<_, i64>(0) as u64;
        if !registry::capacity_allows(quest.max_completions, completions) {
            return Ok(QuestEdit::CapacityBelowLedger { completions });
        }

        tx.execute(
            "UPDATE quests SET
                title = $2,
                reward_points = $3,
                prize_amount = $4,
                prize_token = $5,
                distribution_mode = $6,
                number_of_winners = $7,
                max_completions = $8,
                expires_at = $9,
                updated_at = $10
             WHERE id = $1",
            &[
                &quest.id,
                &quest.title,
                &i32::try_from(quest.reward_points)?,
                &prize.amount,
                &prize.token,
                &prize.mode,
                &prize.number_of_winners,
                &quest.max_completions.map(i32::try_from).transpose()?,
                &to_opt_ts(quest.expires_at)?,
                &to_ts(quest.updated_at)?,
            ],
        )
        .await?;
        tx.commit().await?;
        Ok(QuestEdit::Applied)
    }

    async fn delete_quest(&self, quest_id: &str) -> Result<bool> {
        let client = self.pool.get().await?;
        let deleted = client
            .execute("DELETE FROM quests WHERE id = $1", &[&quest_id])
            .await?;
        Ok(deleted > 0)
    }

    async fn transition_quest(
        &self,
        quest_id: &str,
        from: &[QuestStatus],
        to: QuestStatus,
        closed_at: Option<i64>,
        now: i64,
    ) -> Result<Option<Quest>> {
        let client = self.pool.get().await?;
        let from: Vec<&str> = from.iter().map(|s| s.as_str()).collect();
        let row = client
            .query_opt(
                &format!(
                    "UPDATE quests SET status = $2, closed_at = COALESCE(closed_at, $3), updated_at = $4
                     WHERE id = $1 AND status = ANY($5)
                     RETURNING {}",
                    QUEST_COLUMNS
                ),
                &[
                    &quest_id,
                    &to.as_str(),
                    &to_opt_ts(closed_at)?,
                    &to_ts(now)?,
                    &from,
                ],
            )
            .await?;
        row.as_ref().map(quest_from_row).transpose()
    }

    async fn expire_due_quests(&self, now: i64) -> Result<Vec<String>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "UPDATE quests SET status = 'expired',
                    closed_at = COALESCE(closed_at, expires_at),
                    updated_at = $1
                 WHERE status = 'active' AND expires_at IS NOT NULL AND expires_at <= $1
                 RETURNING id",
                &[&to_ts(now)?],
            )
            .await?;
        let mut ids: Vec<String> = rows.iter().map(|row| row.get(0)).collect();
        ids.sort();
        Ok(ids)
    }

    async fn count_completions(&self, quest_id: &str) -> Result<u64> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "SELECT COUNT(*) FROM completions WHERE quest_id = $1",
                &[&quest_id],
            )
            .await?;
        Ok(row.get::<_, i64>(0) as u64)
    }

    async fn record_completion(
        &self,
        quest_id: &str,
        user_id: &str,
        now: i64,
        curve: LevelCurve,
    ) -> Result<CompletionOutcome> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let row = tx
            .query_opt(
                &format!("SELECT {} FROM quests WHERE id = $1 FOR UPDATE", QUEST_COLUMNS),
                &[&quest_id],
            )
            .await?;
        let Some(row) = row else {
            return Ok(CompletionOutcome::Rejected(RejectReason::NotFound));
        };
        let quest = quest_from_row(&row)?;

        let count: i64 = tx
            .query_one(
                "SELECT COUNT(*) FROM completions WHERE quest_id = $1",
                &[&quest_id],
            )
            .await?
            .get(0);

        if let Acceptance::Reject(reason) = registry::can_accept(Some(&quest), count as u64, now) {
            if reason == RejectReason::Expired {
                tx.execute(
                    "UPDATE quests SET status = 'expired',
                        closed_at = COALESCE(closed_at, expires_at, $2),
                        updated_at = $2
                     WHERE id = $1 AND status = 'active'",
                    &[&quest_id, &to_ts(now)?],
                )
                .await?;
                tx.commit().await?;
                debug!(quest_id, "Quest expired on completion attempt");
            }
            return Ok(CompletionOutcome::Rejected(reason));
        }

        let inserted = tx
            .query_opt(
                "INSERT INTO completions (quest_id, user_id, points_awarded, completed_at)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (quest_id, user_id) DO NOTHING
                 RETURNING sequence",
                &[
                    &quest_id,
                    &user_id,
                    &i32::try_from(quest.reward_points)?,
                    &to_ts(now)?,
                ],
            )
            .await?;
        let Some(inserted) = inserted else {
            return Ok(CompletionOutcome::Rejected(RejectReason::AlreadyCompleted));
        };

        let completion = Completion {
            quest_id: quest_id.to_string(),
            user_id: user_id.to_string(),
            sequence: inserted.get(0),
            points_awarded: quest.reward_points,
            completed_at: now,
        };

        // Additive upsert so two first completions by a new user cannot race
        let xp_row = tx
            .query_one(
                "INSERT INTO user_xp (user_id, total_points, quests_completed, level, updated_at)
                 VALUES ($1, $2, 1, 1, $3)
                 ON CONFLICT (user_id) DO UPDATE SET
                    total_points = user_xp.total_points + EXCLUDED.total_points,
                    quests_completed = user_xp.quests_completed + 1,
                    updated_at = GREATEST(user_xp.updated_at, EXCLUDED.updated_at)
                 RETURNING user_id, total_points, quests_completed, level, updated_at",
                &[&user_id, &(completion.points_awarded as i64), &to_ts(now)?],
            )
            .await?;
        let mut xp = user_xp_from_row(&xp_row);
        xp.level = curve.level(xp.total_points);
        tx.execute(
            "UPDATE user_xp SET level = $2 WHERE user_id = $1",
            &[&user_id, &(xp.level as i32)],
        )
        .await?;

        let closed = registry::fills_capacity(&quest, count as u64);
        if closed {
            tx.execute(
                "UPDATE quests SET status = 'completed', closed_at = COALESCE(closed_at, $2), updated_at = $2
                 WHERE id = $1",
                &[&quest_id, &to_ts(now)?],
            )
            .await?;
        }

        tx.commit().await?;

        Ok(CompletionOutcome::Recorded {
            completion,
            xp,
            closed,
        })
    }

    async fn list_completions(&self, quest_id: &str) -> Result<Vec<Completion>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM completions WHERE quest_id = $1 ORDER BY completed_at, sequence",
                    COMPLETION_COLUMNS
                ),
                &[&quest_id],
            )
            .await?;
        Ok(rows.iter().map(completion_from_row).collect())
    }

    async fn get_user_xp(&self, user_id: &str) -> Result<Option<UserXp>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT user_id, total_points, quests_completed, level, updated_at
                 FROM user_xp WHERE user_id = $1",
                &[&user_id],
            )
            .await?;
        Ok(row.as_ref().map(user_xp_from_row))
    }

    async fn refresh_ranks(&self) -> Result<()> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        tx.execute("SELECT pg_advisory_xact_lock($1)", &[&RANK_REFRESH_LOCK])
            .await?;
        tx.execute(
            "INSERT INTO leaderboard (user_id, total_points, level, rank, updated_at)
             SELECT user_id, total_points, level,
                    ROW_NUMBER() OVER (ORDER BY total_points DESC, updated_at ASC, user_id ASC),
                    updated_at
             FROM user_xp
             ON CONFLICT (user_id) DO UPDATE SET
                total_points = EXCLUDED.total_points,
                level = EXCLUDED.level,
                rank = EXCLUDED.rank,
                updated_at = EXCLUDED.updated_at",
            &[],
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn leaderboard_page(&self, limit: usize, offset: usize) -> Result<Vec<LeaderboardEntry>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM leaderboard ORDER BY rank ASC LIMIT $1 OFFSET $2",
                    LEADERBOARD_COLUMNS
                ),
                &[
                    &i64::try_from(limit).unwrap_or(i64::MAX),
                    &i64::try_from(offset).unwrap_or(i64::MAX),
                ],
            )
            .await?;
        Ok(rows.iter().map(leaderboard_from_row).collect())
    }

    async fn leaderboard_entry(&self, user_id: &str) -> Result<Option<LeaderboardEntry>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!("SELECT {} FROM leaderboard WHERE user_id = $1", LEADERBOARD_COLUMNS),
                &[&user_id],
            )
            .await?;
        Ok(row.as_ref().map(leaderboard_from_row))
    }

    async fn get_winner_record(&self, quest_id: &str) -> Result<Option<WinnerRecord>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!("SELECT {} FROM winner_records WHERE quest_id = $1", WINNER_COLUMNS),
                &[&quest_id],
            )
            .await?;
        row.as_ref().map(winner_record_from_row).transpose()
    }

    async fn insert_winner_record(&self, record: &WinnerRecord) -> Result<WinnerRecord> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO winner_records (quest_id, winners, prize_per_winner, token, mode,
                    computed_at, distributed, distribution_proof, distributed_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                 ON CONFLICT (quest_id) DO NOTHING",
                &[
                    &record.quest_id,
                    &record.winners,
                    &(record.prize_per_winner as i64),
                    &record.token,
                    &record.mode.as_str(),
                    &to_ts(record.computed_at)?,
                    &record.distributed,
                    &record.distribution_proof,
                    &to_opt_ts(record.distributed_at)?,
                ],
            )
            .await?;

        let row = client
            .query_one(
                &format!("SELECT {} FROM winner_records WHERE quest_id = $1", WINNER_COLUMNS),
                &[&record.quest_id],
            )
            .await?;
        winner_record_from_row(&row)
    }

    async fn unsettled_quests(&self) -> Result<Vec<String>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT q.id FROM quests q
                 LEFT JOIN winner_records w ON w.quest_id = q.id
                 WHERE q.status IN ('completed', 'expired')
                   AND q.prize_amount IS NOT NULL
                   AND w.quest_id IS NULL
                 ORDER BY q.id",
                &[],
            )
            .await?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    async fn mark_distributed(
        &self,
        quest_id: &str,
        proof: Option<&str>,
        now: i64,
    ) -> Result<Option<WinnerRecord>> {
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE winner_records SET distributed = TRUE, distribution_proof = $2, distributed_at = $3
                 WHERE quest_id = $1 AND distributed = FALSE",
                &[&quest_id, &proof, &to_ts(now)?],
            )
            .await?;

        let row = client
            .query_opt(
                &format!("SELECT {} FROM winner_records WHERE quest_id = $1", WINNER_COLUMNS),
                &[&quest_id],
            )
            .await?;
        row.as_ref().map(winner_record_from_row).transpose()
    }

    async fn log_event(&self, entry: &AuditEntry) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO events (event_type, entity_type, entity_id, actor_id, payload,
                    duration_ms, success, error_message)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
                &[
                    &entry.event_type.to_string(),
                    &entry.entity_type,
                    &entry.entity_id,
                    &entry.actor_id,
                    &entry.payload,
                    &entry.duration_ms.map(|d| d as i64),
                    &entry.success,
                    &entry.error_message,
                ],
            )
            .await?;
        Ok(())
    }
}
