//! In-memory store
//!
//! All tables sit behind one mutex and every trait call is a single critical
//! section, which gives each call the atomicity of a database transaction.
//! The leaderboard is kept in a `RankIndex` and updated in the same critical
//! section as the XP row, so ranks are never stale here.

use super::{CompletionOutcome, QuestEdit, QuestStore};
use crate::models::{
    Completion, LeaderboardEntry, Quest, QuestStatus, RejectReason, UserXp, WinnerRecord,
};
use crate::observability::AuditEntry;
use crate::ranking::{RankIndex, RankKey};
use crate::registry::{self, Acceptance};
use crate::xp::LevelCurve;
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

#[derive(Default)]
struct Tables {
    quests: HashMap<String, Quest>,
    /// Per quest, in ledger order
    completions: HashMap<String, Vec<Completion>>,
    /// Uniqueness constraint on (quest_id, user_id)
    completed: HashSet<(String, String)>,
    user_xp: HashMap<String, UserXp>,
    ranks: RankIndex,
    /// Uniqueness constraint on quest_id
    winners: HashMap<String, WinnerRecord>,
    events: Vec<AuditEntry>,
    next_sequence: i64,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Audit events recorded so far
    pub fn events(&self) -> Vec<AuditEntry> {
        self.tables.lock().events.clone()
    }
}

fn close_quest(quest: &mut Quest, to: QuestStatus, closed_at: Option<i64>, now: i64) {
    quest.status = to;
    if quest.closed_at.is_none() {
        quest.closed_at = closed_at;
    }
    quest.updated_at = now;
}

fn entry_for(xp: &UserXp, rank: u32) -> LeaderboardEntry {
    LeaderboardEntry {
        user_id: xp.user_id.clone(),
        total_points: xp.total_points,
        level: xp.level,
        rank,
        updated_at: xp.updated_at,
    }
}

#[async_trait]
impl QuestStore for MemoryStore {
    async fn insert_quest(&self, quest: &Quest) -> Result<()> {
        let mut tables = self.tables.lock();
        if tables.quests.contains_key(&quest.id) {
            anyhow::bail!("quest {} already exists", quest.id);
        }
        tables.quests.insert(quest.id.clone(), quest.clone());
        Ok(())
    }

    async fn get_quest(&self, quest_id: &str) -> Result<Option<Quest>> {
        Ok(self.tables.lock().quests.get(quest_id).cloned())
    }

    async fn list_quests(&self, status: Option<QuestStatus>) -> Result<Vec<Quest>> {
        let tables = self.tables.lock();
        let mut quests: Vec<Quest> = tables
            .quests
            .values()
            .filter(|q| status.map_or(true, |s| q.status == s))
            .cloned()
            .collect();
        quests.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        Ok(quests)
    }

    async fn update_quest(&self, quest: &Quest) -> Result<QuestEdit> {
        let mut tables = self.tables.lock();
        let tables = &mut *tables;
        let completions = tables
            .completions
            .get(&quest.id)
            .map_or(0, |list| list.len() as u64);
        let Some(stored) = tables.quests.get_mut(&quest.id) else {
            return Ok(QuestEdit::Missing);
        };
        if stored.status.is_closed() {
            return Ok(QuestEdit::Closed);
        }
        if !registry::capacity_allows(quest.max_completions, completions) {
            return Ok(QuestEdit::CapacityBelowLedger { completions });
        }
        stored.title = quest.title.clone();
        stored.reward_points = quest.reward_points;
        stored.prize_pool = quest.prize_pool.clone();
        stored.max_completions = quest.max_completions;
        stored.expires_at = quest.expires_at;
        stored.updated_at = quest.updated_at;
        Ok(QuestEdit::Applied)
    }

    async fn delete_quest(&self, quest_id: &str) -> Result<bool> {
        let mut tables = self.tables.lock();
        let tables = &mut *tables;
        if tables.quests.remove(quest_id).is_none() {
            return Ok(false);
        }
        if let Some(completions) = tables.completions.remove(quest_id) {
            for completion in completions {
                tables
                    .completed
                    .remove(&(completion.quest_id, completion.user_id));
            }
        }
        tables.winners.remove(quest_id);
        Ok(true)
    }

    async fn transition_quest(
        &self,
        quest_id: &str,
        from: &[QuestStatus],
        to: QuestStatus,
        closed_at: Option<i64>,
        now: i64,
    ) -> Result<Option<Quest>> {
        let mut tables = self.tables.lock();
        let Some(quest) = tables.quests.get_mut(quest_id) else {
            return Ok(None);
        };
        if !from.contains(&quest.status) {
            return Ok(None);
        }
        close_quest(quest, to, closed_at, now);
        Ok(Some(quest.clone()))
    }

    async fn expire_due_quests(&self, now: i64) -> Result<Vec<String>> {
        let mut tables = self.tables.lock();
        let mut expired = Vec::new();
        for quest in tables.quests.values_mut() {
            if quest.status == QuestStatus::Active && registry::is_past_expiry(quest, now) {
                let closed_at = registry::closed_at_for(quest, QuestStatus::Expired, now);
                close_quest(quest, QuestStatus::Expired, closed_at, now);
                expired.push(quest.id.clone());
            }
        }
        expired.sort();
        Ok(expired)
    }

    async fn count_completions(&self, quest_id: &str) -> Result<u64> {
        let tables = self.tables.lock();
        Ok(tables
            .completions
            .get(quest_id)
            .map_or(0, |list| list.len() as u64))
    }

    async fn record_completion(
        &self,
        quest_id: &str,
        user_id: &str,
        now: i64,
        curve: LevelCurve,
    ) -> Result<CompletionOutcome> {
        let mut guard = self.tables.lock();
        let tables = &mut *guard;

        let count = tables
            .completions
            .get(quest_id)
            .map_or(0, |list| list.len() as u64);

        let Some(quest) = tables.quests.get_mut(quest_id) else {
            return Ok(CompletionOutcome::Rejected(RejectReason::NotFound));
        };

        if let Acceptance::Reject(reason) = registry::can_accept(Some(&*quest), count, now) {
            if reason == RejectReason::Expired {
                let closed_at = registry::closed_at_for(quest, QuestStatus::Expired, now);
                close_quest(quest, QuestStatus::Expired, closed_at, now);
            }
            return Ok(CompletionOutcome::Rejected(reason));
        }

        if !tables
            .completed
            .insert((quest_id.to_string(), user_id.to_string()))
        {
            return Ok(CompletionOutcome::Rejected(RejectReason::AlreadyCompleted));
        }

        let closed = registry::fills_capacity(quest, count);
        if closed {
            close_quest(quest, QuestStatus::Completed, Some(now), now);
        }

        tables.next_sequence += 1;
        let completion = Completion {
            quest_id: quest_id.to_string(),
            user_id: user_id.to_string(),
            sequence: tables.next_sequence,
            points_awarded: quest.reward_points,
            completed_at: now,
        };
        tables
            .completions
            .entry(quest_id.to_string())
            .or_default()
            .push(completion.clone());

        let xp = curve.apply_completion(
            tables.user_xp.remove(user_id),
            user_id,
            completion.points_awarded,
            now,
        );
        tables.user_xp.insert(user_id.to_string(), xp.clone());
        tables
            .ranks
            .upsert(RankKey::new(user_id, xp.total_points, xp.updated_at));

        Ok(CompletionOutcome::Recorded {
            completion,
            xp,
            closed,
        })
    }

    async fn list_completions(&self, quest_id: &str) -> Result<Vec<Completion>> {
        let tables = self.tables.lock();
        let mut completions = tables.completions.get(quest_id).cloned().unwrap_or_default();
        completions.sort_by_key(|c| (c.completed_at, c.sequence));
        Ok(completions)
    }

    async fn get_user_xp(&self, user_id: &str) -> Result<Option<UserXp>> {
        Ok(self.tables.lock().user_xp.get(user_id).cloned())
    }

    async fn refresh_ranks(&self) -> Result<()> {
        // The rank index is maintained inside record_completion
        Ok(())
    }

    async fn leaderboard_page(&self, limit: usize, offset: usize) -> Result<Vec<LeaderboardEntry>> {
        let tables = self.tables.lock();
        Ok(tables
            .ranks
            .page(offset, limit)
            .into_iter()
            .filter_map(|(rank, key)| {
                tables
                    .user_xp
                    .get(&key.user_id)
                    .map(|xp| entry_for(xp, rank))
            })
            .collect())
    }

    async fn leaderboard_entry(&self, user_id: &str) -> Result<Option<LeaderboardEntry>> {
        let tables = self.tables.lock();
        let Some(rank) = tables.ranks.rank_of(user_id) else {
            return Ok(None);
        };
        Ok(tables.user_xp.get(user_id).map(|xp| entry_for(xp, rank)))
    }

    async fn get_winner_record(&self, quest_id: &str) -> Result<Option<WinnerRecord>> {
        Ok(self.tables.lock().winners.get(quest_id).cloned())
    }

    async fn insert_winner_record(&self, record: &WinnerRecord) -> Result<WinnerRecord> {
        let mut tables = self.tables.lock();
        if !tables.quests.contains_key(&record.quest_id) {
            anyhow::bail!("quest {} does not exist", record.quest_id);
        }
        Ok(tables
            .winners
            .entry(record.quest_id.clone())
            .or_insert_with(|| record.clone())
            .clone())
    }

    async fn unsettled_quests(&self) -> Result<Vec<String>> {
        let tables = self.tables.lock();
        let mut ids: Vec<String> = tables
            .quests
            .values()
            .filter(|q| {
                q.status.is_closed()
                    && q.prize_pool.is_some()
                    && !tables.winners.contains_key(&q.id)
            })
            .map(|q| q.id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn mark_distributed(
        &self,
        quest_id: &str,
        proof: Option<&str>,
        now: i64,
    ) -> Result<Option<WinnerRecord>> {
        let mut tables = self.tables.lock();
        let Some(record) = tables.winners.get_mut(quest_id) else {
            return Ok(None);
        };
        if !record.distributed {
            record.distributed = true;
            record.distribution_proof = proof.map(|p| p.to_string());
            record.distributed_at = Some(now);
        }
        Ok(Some(record.clone()))
    }

    async fn log_event(&self, entry: &AuditEntry) -> Result<()> {
        self.tables.lock().events.push(entry.clone());
        Ok(())
    }
}
