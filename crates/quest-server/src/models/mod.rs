//! Data models for the quest settlement engine
//!
//! All timestamps are unix milliseconds (UTC).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// QUEST
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QuestStatus {
    Active,
    Paused,
    Completed,
    Expired,
}

impl QuestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestStatus::Active => "active",
            QuestStatus::Paused => "paused",
            QuestStatus::Completed => "completed",
            QuestStatus::Expired => "expired",
        }
    }

    /// Terminal for completion acceptance; precondition for winner computation.
    pub fn is_closed(&self) -> bool {
        matches!(self, QuestStatus::Completed | QuestStatus::Expired)
    }

    /// ACTIVE -> {PAUSED, COMPLETED, EXPIRED}, PAUSED -> ACTIVE.
    pub fn can_transition_to(&self, next: QuestStatus) -> bool {
        matches!(
            (self, next),
            (QuestStatus::Active, QuestStatus::Paused)
                | (QuestStatus::Active, QuestStatus::Completed)
                | (QuestStatus::Active, QuestStatus::Expired)
                | (QuestStatus::Paused, QuestStatus::Active)
        )
    }
}

impl fmt::Display for QuestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(QuestStatus::Active),
            "paused" => Ok(QuestStatus::Paused),
            "completed" => Ok(QuestStatus::Completed),
            "expired" => Ok(QuestStatus::Expired),
            other => Err(format!("unknown quest status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DistributionMode {
    /// First come, first served: earliest completions win
    Fcfs,
    /// Seeded sample without replacement over all completers
    Raffle,
}

impl DistributionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistributionMode::Fcfs => "fcfs",
            DistributionMode::Raffle => "raffle",
        }
    }
}

impl FromStr for DistributionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fcfs" => Ok(DistributionMode::Fcfs),
            "raffle" => Ok(DistributionMode::Raffle),
            other => Err(format!("unknown distribution mode: {}", other)),
        }
    }
}

/// Fixed prize pool paid out once the quest closes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrizePool {
    /// Total pool in the token's base units
    pub amount: u64,
    pub token: String,
    pub mode: DistributionMode,
    pub number_of_winners: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Quest {
    pub id: String,
    pub creator_id: String,
    pub title: String,
    pub reward_points: u32,
    pub prize_pool: Option<PrizePool>,
    /// None = unlimited
    pub max_completions: Option<u32>,
    pub expires_at: Option<i64>,
    pub status: QuestStatus,
    /// Set when the quest flips to COMPLETED or EXPIRED; seeds raffles
    pub closed_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateQuestRequest {
    pub creator_id: String,
    pub title: String,
    pub reward_points: u32,
    #[serde(default)]
    pub prize_pool: Option<PrizePool>,
    #[serde(default)]
    pub max_completions: Option<u32>,
    #[serde(default)]
    pub expires_at: Option<i64>,
}

/// Partial edit; only `Some` fields are written
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateQuestRequest {
    pub actor_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub reward_points: Option<u32>,
    #[serde(default)]
    pub prize_pool: Option<PrizePool>,
    #[serde(default)]
    pub max_completions: Option<u32>,
    #[serde(default)]
    pub expires_at: Option<i64>,
}

/// Body for pause / resume / close / delete
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestActionRequest {
    pub actor_id: String,
}

// ============================================================================
// ELIGIBILITY
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    NotFound,
    NotActive,
    Expired,
    CapacityReached,
    AlreadyCompleted,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::NotFound => "not_found",
            RejectReason::NotActive => "not_active",
            RejectReason::Expired => "expired",
            RejectReason::CapacityReached => "capacity_reached",
            RejectReason::AlreadyCompleted => "already_completed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Eligibility {
    pub quest_id: String,
    pub ok: bool,
    pub reason: Option<RejectReason>,
}

// ============================================================================
// COMPLETION LEDGER
// ============================================================================

/// Immutable record that a user completed a quest once
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Completion {
    pub quest_id: String,
    pub user_id: String,
    /// Ledger insertion order, breaks timestamp ties
    pub sequence: i64,
    /// Snapshot of the quest reward at completion time
    pub points_awarded: u32,
    pub completed_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteQuestRequest {
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionReceipt {
    pub completion: Completion,
    pub xp: UserXp,
    /// Leaderboard rank after the refresh, if visible yet
    pub rank: Option<u32>,
    /// True when this completion used the last slot and closed the quest
    pub quest_closed: bool,
}

// ============================================================================
// XP / LEADERBOARD
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserXp {
    pub user_id: String,
    pub total_points: u64,
    pub quests_completed: u32,
    pub level: u32,
    pub updated_at: i64,
}

impl UserXp {
    /// State reported for users with no completions yet
    pub fn zero(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            total_points: 0,
            quests_completed: 0,
            level: 1,
            updated_at: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeaderboardEntry {
    pub user_id: String,
    pub total_points: u64,
    pub level: u32,
    /// 1-based, dense
    pub rank: u32,
    pub updated_at: i64,
}

// ============================================================================
// WINNERS / DISTRIBUTION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WinnerRecord {
    pub quest_id: String,
    /// Winner user ids in selection order
    pub winners: Vec<String>,
    pub prize_per_winner: u64,
    pub token: String,
    pub mode: DistributionMode,
    pub computed_at: i64,
    pub distributed: bool,
    /// Opaque payout reference (e.g. transaction id)
    pub distribution_proof: Option<String>,
    pub distributed_at: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarkDistributedRequest {
    #[serde(default)]
    pub proof: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quest_status_round_trip() {
        for status in [
            QuestStatus::Active,
            QuestStatus::Paused,
            QuestStatus::Completed,
            QuestStatus::Expired,
        ] {
            assert_eq!(status.as_str().parse::<QuestStatus>().unwrap(), status);
        }
        assert!("archived".parse::<QuestStatus>().is_err());
    }

    #[test]
    fn test_quest_status_transitions() {
        assert!(QuestStatus::Active.can_transition_to(QuestStatus::Paused));
        assert!(QuestStatus::Active.can_transition_to(QuestStatus::Completed));
        assert!(QuestStatus::Active.can_transition_to(QuestStatus::Expired));
        assert!(QuestStatus::Paused.can_transition_to(QuestStatus::Active));

        assert!(!QuestStatus::Paused.can_transition_to(QuestStatus::Completed));
        assert!(!QuestStatus::Expired.can_transition_to(QuestStatus::Active));
        assert!(!QuestStatus::Completed.can_transition_to(QuestStatus::Expired));
        assert!(!QuestStatus::Active.can_transition_to(QuestStatus::Active));
    }

    #[test]
    fn test_closed_statuses() {
        assert!(QuestStatus::Completed.is_closed());
        assert!(QuestStatus::Expired.is_closed());
        assert!(!QuestStatus::Active.is_closed());
        assert!(!QuestStatus::Paused.is_closed());
    }

    #[test]
    fn test_distribution_mode_serde() {
        let json = serde_json::to_string(&DistributionMode::Raffle).unwrap();
        assert_eq!(json, "\"raffle\"");
        assert_eq!("fcfs".parse::<DistributionMode>(), Ok(DistributionMode::Fcfs));
    }

    #[test]
    fn test_user_xp_zero_state() {
        let xp = UserXp::zero("alice");
        assert_eq!(xp.total_points, 0);
        assert_eq!(xp.quests_completed, 0);
        assert_eq!(xp.level, 1);
    }

    #[test]
    fn test_create_request_optional_fields() {
        let json = r#"{
            "creator_id": "creator",
            "title": "Follow us",
            "reward_points": 50
        }"#;

        let request: CreateQuestRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.reward_points, 50);
        assert!(request.prize_pool.is_none());
        assert!(request.max_completions.is_none());
        assert!(request.expires_at.is_none());
    }

    #[test]
    fn test_reject_reason_codes() {
        assert_eq!(RejectReason::AlreadyCompleted.as_str(), "already_completed");
        let json = serde_json::to_string(&RejectReason::CapacityReached).unwrap();
        assert_eq!(json, "\"capacity_reached\"");
    }
}
