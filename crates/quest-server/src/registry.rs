//! Quest Registry - eligibility and lifecycle rules
//!
//! Pure decisions over a quest snapshot. Storage backends call these inside
//! their own transaction so that the check and the write are atomic.

use crate::error::{QuestError, Result};
use crate::models::{CreateQuestRequest, PrizePool, Quest, QuestStatus, RejectReason, UpdateQuestRequest};

const MAX_ID_LEN: usize = 128;
const MAX_TITLE_LEN: usize = 255;
const MAX_TOKEN_LEN: usize = 64;
/// Largest count or point value a quest may carry (Postgres INTEGER)
const MAX_QUEST_INT: u32 = i32::MAX as u32;
/// 9999-12-31T23:59:59.999Z
const MAX_TIMESTAMP_MILLIS: i64 = 253_402_300_799_999;

/// Outcome of `can_accept`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceptance {
    Accept,
    Reject(RejectReason),
}

impl Acceptance {
    pub fn is_ok(&self) -> bool {
        matches!(self, Acceptance::Accept)
    }

    pub fn reason(&self) -> Option<RejectReason> {
        match self {
            Acceptance::Accept => None,
            Acceptance::Reject(reason) => Some(*reason),
        }
    }
}

/// Decide whether a completion attempt may proceed.
///
/// Order: exists, ACTIVE, not expired, under capacity. An `Expired` result
/// obliges the caller to flip the quest to EXPIRED.
pub fn can_accept(quest: Option<&Quest>, completion_count: u64, now: i64) -> Acceptance {
    let Some(quest) = quest else {
        return Acceptance::Reject(RejectReason::NotFound);
    };

    if quest.status != QuestStatus::Active {
        // A quest closed by its last slot reports why it closed
        if quest.status == QuestStatus::Completed && at_capacity(quest, completion_count) {
            return Acceptance::Reject(RejectReason::CapacityReached);
        }
        return Acceptance::Reject(RejectReason::NotActive);
    }

    if is_past_expiry(quest, now) {
        return Acceptance::Reject(RejectReason::Expired);
    }

    if at_capacity(quest, completion_count) {
        return Acceptance::Reject(RejectReason::CapacityReached);
    }

    Acceptance::Accept
}

fn at_capacity(quest: &Quest, completion_count: u64) -> bool {
    quest
        .max_completions
        .map(|max| completion_count >= max as u64)
        .unwrap_or(false)
}

/// True when a capacity of `max_completions` still leaves room after
/// `completion_count` completions
pub fn capacity_allows(max_completions: Option<u32>, completion_count: u64) -> bool {
    max_completions
        .map(|max| max as u64 > completion_count)
        .unwrap_or(true)
}

pub fn is_past_expiry(quest: &Quest, now: i64) -> bool {
    quest.expires_at.map(|at| at <= now).unwrap_or(false)
}

/// True when accepting one more completion fills the quest
pub fn fills_capacity(quest: &Quest, count_before_insert: u64) -> bool {
    quest
        .max_completions
        .map(|max| count_before_insert + 1 >= max as u64)
        .unwrap_or(false)
}

/// `closed_at` recorded when a quest enters a closed status.
/// Expiry closes at the quest's own deadline so the value is reproducible.
pub fn closed_at_for(quest: &Quest, to: QuestStatus, now: i64) -> Option<i64> {
    match to {
        QuestStatus::Expired => Some(quest.expires_at.unwrap_or(now)),
        QuestStatus::Completed => Some(now),
        _ => None,
    }
}

pub fn check_transition(from: QuestStatus, to: QuestStatus) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(QuestError::InvalidTransition { from, to })
    }
}

pub fn check_owner(quest: &Quest, actor_id: &str) -> Result<()> {
    if quest.creator_id == actor_id {
        Ok(())
    } else {
        Err(QuestError::Forbidden(format!(
            "{} is not the creator of quest {}",
            actor_id, quest.id
        )))
    }
}

pub fn validate_id(kind: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(QuestError::Validation(format!("{} must not be empty", kind)));
    }
    if value.len() > MAX_ID_LEN {
        return Err(QuestError::Validation(format!(
            "{} exceeds {} characters",
            kind, MAX_ID_LEN
        )));
    }
    Ok(())
}

fn validate_title(title: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(QuestError::Validation("title must not be empty".to_string()));
    }
    if title.len() > MAX_TITLE_LEN {
        return Err(QuestError::Validation(format!(
            "title exceeds {} characters",
            MAX_TITLE_LEN
        )));
    }
    Ok(())
}

fn validate_prize_pool(pool: &PrizePool) -> Result<()> {
    if pool.number_of_winners == 0 {
        return Err(QuestError::Validation(
            "prize pool needs at least one winner".to_string(),
        ));
    }
    if pool.number_of_winners > MAX_QUEST_INT {
        return Err(QuestError::Validation("number_of_winners too large".to_string()));
    }
    if pool.amount > i64::MAX as u64 {
        return Err(QuestError::Validation("prize amount too large".to_string()));
    }
    if pool.token.trim().is_empty() || pool.token.len() > MAX_TOKEN_LEN {
        return Err(QuestError::Validation("invalid prize token".to_string()));
    }
    Ok(())
}

fn validate_capacity(max_completions: Option<u32>) -> Result<()> {
    if max_completions == Some(0) {
        return Err(QuestError::Validation(
            "max_completions must be positive".to_string(),
        ));
    }
    if max_completions.map(|m| m > MAX_QUEST_INT).unwrap_or(false) {
        return Err(QuestError::Validation("max_completions too large".to_string()));
    }
    Ok(())
}

fn validate_reward(points: u32) -> Result<()> {
    if points > MAX_QUEST_INT {
        return Err(QuestError::Validation("reward_points too large".to_string()));
    }
    Ok(())
}

fn validate_expiry(expires_at: i64, now: i64) -> Result<()> {
    if expires_at <= now {
        return Err(QuestError::Validation(
            "expires_at must be in the future".to_string(),
        ));
    }
    if expires_at > MAX_TIMESTAMP_MILLIS {
        return Err(QuestError::Validation("expires_at is out of range".to_string()));
    }
    Ok(())
}

pub fn validate_create(req: &CreateQuestRequest, now: i64) -> Result<()> {
    validate_id("creator_id", &req.creator_id)?;
    validate_title(&req.title)?;
    validate_reward(req.reward_points)?;
    validate_capacity(req.max_completions)?;
    if let Some(pool) = &req.prize_pool {
        validate_prize_pool(pool)?;
    }
    if let Some(at) = req.expires_at {
        validate_expiry(at, now)?;
    }
    Ok(())
}

/// Apply a partial edit to a quest snapshot. Past completions keep their
/// awarded points; only future completions see a new reward.
pub fn apply_update(quest: &mut Quest, req: &UpdateQuestRequest, now: i64) -> Result<()> {
    if quest.status.is_closed() {
        return Err(QuestError::NotEligible(format!(
            "quest is {} and can no longer be edited",
            quest.status
        )));
    }

    if let Some(title) = &req.title {
        validate_title(title)?;
        quest.title = title.clone();
    }
    if let Some(points) = req.reward_points {
        validate_reward(points)?;
        quest.reward_points = points;
    }
    if let Some(pool) = &req.prize_pool {
        validate_prize_pool(pool)?;
        quest.prize_pool = Some(pool.clone());
    }
    if req.max_completions.is_some() {
        validate_capacity(req.max_completions)?;
        quest.max_completions = req.max_completions;
    }
    if let Some(at) = req.expires_at {
        validate_expiry(at, now)?;
        quest.expires_at = Some(at);
    }
    quest.updated_at = now;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quest(status: QuestStatus) -> Quest {
        Quest {
            id: "q1".to_string(),
            creator_id: "creator".to_string(),
            title: "Join the server".to_string(),
            reward_points: 50,
            prize_pool: None,
            max_completions: None,
            expires_at: None,
            status,
            closed_at: None,
            created_at: 1_000,
            updated_at: 1_000,
        }
    }

    #[test]
    fn test_missing_quest() {
        assert_eq!(
            can_accept(None, 0, 10),
            Acceptance::Reject(RejectReason::NotFound)
        );
    }

    #[test]
    fn test_status_checked_before_expiry() {
        let mut q = quest(QuestStatus::Paused);
        q.expires_at = Some(5);
        assert_eq!(
            can_accept(Some(&q), 0, 10),
            Acceptance::Reject(RejectReason::NotActive)
        );
    }

    #[test]
    fn test_expiry_boundary() {
        let mut q = quest(QuestStatus::Active);
        q.expires_at = Some(10);
        assert!(can_accept(Some(&q), 0, 9).is_ok());
        assert_eq!(
            can_accept(Some(&q), 0, 10),
            Acceptance::Reject(RejectReason::Expired)
        );
    }

    #[test]
    fn test_capacity() {
        let mut q = quest(QuestStatus::Active);
        q.max_completions = Some(2);
        assert!(can_accept(Some(&q), 1, 10).is_ok());
        assert_eq!(
            can_accept(Some(&q), 2, 10).reason(),
            Some(RejectReason::CapacityReached)
        );
        assert!(fills_capacity(&q, 1));
        assert!(!fills_capacity(&q, 0));
    }

    #[test]
    fn test_full_quest_reports_capacity_after_close() {
        let mut q = quest(QuestStatus::Completed);
        q.max_completions = Some(1);
        assert_eq!(
            can_accept(Some(&q), 1, 10).reason(),
            Some(RejectReason::CapacityReached)
        );

        // Closed by hand before filling up
        assert_eq!(
            can_accept(Some(&q), 0, 10).reason(),
            Some(RejectReason::NotActive)
        );
    }

    #[test]
    fn test_unlimited_quest_never_fills() {
        let q = quest(QuestStatus::Active);
        assert!(can_accept(Some(&q), 1_000_000, 10).is_ok());
        assert!(!fills_capacity(&q, 1_000_000));
    }

    #[test]
    fn test_closed_at_uses_deadline_for_expiry() {
        let mut q = quest(QuestStatus::Active);
        q.expires_at = Some(500);
        assert_eq!(closed_at_for(&q, QuestStatus::Expired, 900), Some(500));
        assert_eq!(closed_at_for(&q, QuestStatus::Completed, 900), Some(900));
        assert_eq!(closed_at_for(&q, QuestStatus::Paused, 900), None);
    }

    #[test]
    fn test_owner_check() {
        let q = quest(QuestStatus::Active);
        assert!(check_owner(&q, "creator").is_ok());
        assert!(matches!(
            check_owner(&q, "mallory"),
            Err(QuestError::Forbidden(_))
        ));
    }

    #[test]
    fn test_validate_create() {
        let mut req = CreateQuestRequest {
            creator_id: "creator".to_string(),
            title: "Retweet".to_string(),
            reward_points: 10,
            prize_pool: None,
            max_completions: Some(0),
            expires_at: None,
        };
        assert!(validate_create(&req, 100).is_err());

        req.max_completions = Some(3);
        req.expires_at = Some(50);
        assert!(validate_create(&req, 100).is_err());

        req.expires_at = Some(500);
        assert!(validate_create(&req, 100).is_ok());
    }

    #[test]
    fn test_validate_create_bounds_stored_values() {
        let valid = CreateQuestRequest {
            creator_id: "creator".to_string(),
            title: "Retweet".to_string(),
            reward_points: 10,
            prize_pool: None,
            max_completions: None,
            expires_at: None,
        };

        let req = CreateQuestRequest {
            reward_points: 3_000_000_000,
            ..valid.clone()
        };
        assert!(matches!(
            validate_create(&req, 100),
            Err(QuestError::Validation(_))
        ));

        let req = CreateQuestRequest {
            expires_at: Some(17_000_000_000_000_000),
            ..valid.clone()
        };
        assert!(matches!(
            validate_create(&req, 100),
            Err(QuestError::Validation(_))
        ));

        let req = CreateQuestRequest {
            prize_pool: Some(PrizePool {
                amount: 100,
                token: "USDC".to_string(),
                mode: crate::models::DistributionMode::Fcfs,
                number_of_winners: 3_000_000_000,
            }),
            ..valid
        };
        assert!(matches!(
            validate_create(&req, 100),
            Err(QuestError::Validation(_))
        ));
    }

    #[test]
    fn test_update_bounds_reward() {
        let mut q = quest(QuestStatus::Active);
        let req = UpdateQuestRequest {
            actor_id: "creator".to_string(),
            reward_points: Some(u32::MAX),
            ..Default::default()
        };
        assert!(apply_update(&mut q, &req, 2_000).is_err());
        assert_eq!(q.reward_points, 50);
    }

    #[test]
    fn test_capacity_allows() {
        assert!(capacity_allows(None, 1_000));
        assert!(capacity_allows(Some(3), 2));
        assert!(!capacity_allows(Some(2), 2));
        assert!(!capacity_allows(Some(1), 2));
    }

    #[test]
    fn test_update_rejected_once_closed() {
        let mut q = quest(QuestStatus::Expired);
        let req = UpdateQuestRequest {
            actor_id: "creator".to_string(),
            reward_points: Some(500),
            ..Default::default()
        };
        assert!(apply_update(&mut q, &req, 2_000).is_err());
        assert_eq!(q.reward_points, 50);
    }

    #[test]
    fn test_update_applies_fields() {
        let mut q = quest(QuestStatus::Active);
        let req = UpdateQuestRequest {
            actor_id: "creator".to_string(),
            title: Some("Join and say hi".to_string()),
            reward_points: Some(500),
            ..Default::default()
        };
        apply_update(&mut q, &req, 2_000).unwrap();
        assert_eq!(q.reward_points, 500);
        assert_eq!(q.title, "Join and say hi");
        assert_eq!(q.updated_at, 2_000);
    }
}
