//! Row mapping and column lists for the Postgres store

use crate::models::{
    Completion, DistributionMode, LeaderboardEntry, PrizePool, Quest, QuestStatus, UserXp,
    WinnerRecord,
};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use tokio_postgres::Row;

pub const QUEST_COLUMNS: &str = "id, creator_id, title, reward_points, prize_amount, prize_token, \
     distribution_mode, number_of_winners, max_completions, expires_at, status, closed_at, \
     created_at, updated_at";

pub const COMPLETION_COLUMNS: &str = "quest_id, user_id, sequence, points_awarded, completed_at";

pub const LEADERBOARD_COLUMNS: &str = "user_id, total_points, level, rank, updated_at";

pub const WINNER_COLUMNS: &str = "quest_id, winners, prize_per_winner, token, mode, computed_at, \
     distributed, distribution_proof, distributed_at";

// ============================================================================
// TIMESTAMPS
// ============================================================================

pub fn to_ts(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| anyhow!("timestamp {} is out of range", millis))
}

pub fn to_opt_ts(millis: Option<i64>) -> Result<Option<DateTime<Utc>>> {
    millis.map(to_ts).transpose()
}

fn millis(row: &Row, idx: usize) -> i64 {
    row.get::<_, DateTime<Utc>>(idx).timestamp_millis()
}

fn opt_millis(row: &Row, idx: usize) -> Option<i64> {
    row.get::<_, Option<DateTime<Utc>>>(idx)
        .map(|dt| dt.timestamp_millis())
}

// ============================================================================
// ROW MAPPERS
// ============================================================================

/// Prize pool columns as stored: amount, token, mode, winners
pub struct PrizeColumns {
    pub amount: Option<i64>,
    pub token: Option<String>,
    pub mode: Option<&'static str>,
    pub number_of_winners: Option<i32>,
}

impl PrizeColumns {
    pub fn from_pool(pool: Option<&PrizePool>) -> Result<Self> {
        Ok(match pool {
            Some(pool) => Self {
                amount: Some(i64::try_from(pool.amount)?),
                token: Some(pool.token.clone()),
                mode: Some(pool.mode.as_str()),
                number_of_winners: Some(i32::try_from(pool.number_of_winners)?),
            },
            None => Self {
                amount: None,
                token: None,
                mode: None,
                number_of_winners: None,
            },
        })
    }
}

pub fn quest_from_row(row: &Row) -> Result<Quest> {
    let prize_pool = match (
        row.get::<_, Option<i64>>(4),
        row.get::<_, Option<String>>(5),
        row.get::<_, Option<String>>(6),
        row.get::<_, Option<i32>>(7),
    ) {
        (Some(amount), Some(token), Some(mode), Some(number_of_winners)) => Some(PrizePool {
            amount: amount as u64,
            token,
            mode: mode.parse::<DistributionMode>().map_err(|e| anyhow!(e))?,
            number_of_winners: number_of_winners as u32,
        }),
        _ => None,
    };

    Ok(Quest {
        id: row.get(0),
        creator_id: row.get(1),
        title: row.get(2),
        reward_points: row.get::<_, i32>(3) as u32,
        prize_pool,
        max_completions: row.get::<_, Option<i32>>(8).map(|n| n as u32),
        expires_at: opt_millis(row, 9),
        status: row
            .get::<_, String>(10)
            .parse::<QuestStatus>()
            .map_err(|e| anyhow!(e))?,
        closed_at: opt_millis(row, 11),
        created_at: millis(row, 12),
        updated_at: millis(row, 13),
    })
}

pub fn completion_from_row(row: &Row) -> Completion {
    Completion {
        quest_id: row.get(0),
        user_id: row.get(1),
        sequence: row.get(2),
        points_awarded: row.get::<_, i32>(3) as u32,
        completed_at: millis(row, 4),
    }
}

/// Columns: user_id, total_points, quests_completed, level, updated_at
pub fn user_xp_from_row(row: &Row) -> UserXp {
    UserXp {
        user_id: row.get(0),
        total_points: row.get::<_, i64>(1) as u64,
        quests_completed: row.get::<_, i32>(2) as u32,
        level: row.get::<_, i32>(3) as u32,
        updated_at: millis(row, 4),
    }
}

pub fn leaderboard_from_row(row: &Row) -> LeaderboardEntry {
    LeaderboardEntry {
        user_id: row.get(0),
        total_points: row.get::<_, i64>(1) as u64,
        level: row.get::<_, i32>(2) as u32,
        rank: row.get::<_, i64>(3) as u32,
        updated_at: millis(row, 4),
    }
}

pub fn winner_record_from_row(row: &Row) -> Result<WinnerRecord> {
    Ok(WinnerRecord {
        quest_id: row.get(0),
        winners: row.get(1),
        prize_per_winner: row.get::<_, i64>(2) as u64,
        token: row.get(3),
        mode: row
            .get::<_, String>(4)
            .parse::<DistributionMode>()
            .map_err(|e| anyhow!(e))?,
        computed_at: millis(row, 5),
        distributed: row.get(6),
        distribution_proof: row.get(7),
        distributed_at: opt_millis(row, 8),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_conversion_keeps_millis() {
        let ts = to_ts(1_700_000_000_123).unwrap();
        assert_eq!(ts.timestamp_millis(), 1_700_000_000_123);
        assert_eq!(to_opt_ts(None).unwrap(), None);
    }

    #[test]
    fn test_out_of_range_timestamp_is_an_error() {
        assert!(to_ts(17_000_000_000_000_000).is_err());
        assert!(to_opt_ts(Some(i64::MIN)).is_err());
    }

    #[test]
    fn test_prize_columns() {
        let pool = PrizePool {
            amount: 500,
            token: "USDC".to_string(),
            mode: DistributionMode::Raffle,
            number_of_winners: 2,
        };
        let columns = PrizeColumns::from_pool(Some(&pool)).unwrap();
        assert_eq!(columns.amount, Some(500));
        assert_eq!(columns.mode, Some("raffle"));
        assert_eq!(columns.number_of_winners, Some(2));

        let empty = PrizeColumns::from_pool(None).unwrap();
        assert!(empty.amount.is_none() && empty.token.is_none());

        let oversized = PrizePool {
            number_of_winners: 3_000_000_000,
            ..pool
        };
        assert!(PrizeColumns::from_pool(Some(&oversized)).is_err());
    }
}
