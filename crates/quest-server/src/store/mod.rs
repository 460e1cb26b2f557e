//! Storage abstraction
//!
//! Every method is one atomic unit against the backing store. Backends
//! enforce the two uniqueness constraints (completion per (quest, user),
//! winner record per quest) themselves; the engine never relies on
//! application-level locking.

pub mod memory;

use crate::models::{Completion, LeaderboardEntry, Quest, QuestStatus, RejectReason, UserXp, WinnerRecord};
use crate::observability::AuditEntry;
use crate::xp::LevelCurve;
use anyhow::Result;
use async_trait::async_trait;

pub use memory::MemoryStore;

/// Result of an atomic completion attempt
#[derive(Debug, Clone)]
pub enum CompletionOutcome {
    /// Completion row and XP update committed together
    Recorded {
        completion: Completion,
        xp: UserXp,
        /// This completion filled the quest, which is now COMPLETED
        closed: bool,
    },
    /// Nothing was written, except the EXPIRED flip for `Expired`
    Rejected(RejectReason),
}

/// Result of an atomic quest edit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestEdit {
    Applied,
    Missing,
    Closed,
    /// The new capacity does not exceed the completions already recorded
    CapacityBelowLedger { completions: u64 },
}

#[async_trait]
pub trait QuestStore: Send + Sync {
    // ---- Quest registry ----

    async fn insert_quest(&self, quest: &Quest) -> Result<()>;

    async fn get_quest(&self, quest_id: &str) -> Result<Option<Quest>>;

    async fn list_quests(&self, status: Option<QuestStatus>) -> Result<Vec<Quest>>;

    /// Overwrite the editable fields of a quest that is not closed. The
    /// capacity check runs against the ledger in the same atomic unit.
    async fn update_quest(&self, quest: &Quest) -> Result<QuestEdit>;

    /// Cascades completions and the winner record
    async fn delete_quest(&self, quest_id: &str) -> Result<bool>;

    /// Conditional status flip. Returns the stored quest when the current
    /// status was in `from`, None otherwise. `closed_at` is only written if
    /// not already set.
    async fn transition_quest(
        &self,
        quest_id: &str,
        from: &[QuestStatus],
        to: QuestStatus,
        closed_at: Option<i64>,
        now: i64,
    ) -> Result<Option<Quest>>;

    /// Flip every ACTIVE quest whose deadline passed to EXPIRED
    async fn expire_due_quests(&self, now: i64) -> Result<Vec<String>>;

    // ---- Completion ledger + XP ----

    async fn count_completions(&self, quest_id: &str) -> Result<u64>;

    /// Eligibility check, ledger insert and XP update in one transaction
    async fn record_completion(
        &self,
        quest_id: &str,
        user_id: &str,
        now: i64,
        curve: LevelCurve,
    ) -> Result<CompletionOutcome>;

    /// Ordered by (completed_at, sequence)
    async fn list_completions(&self, quest_id: &str) -> Result<Vec<Completion>>;

    async fn get_user_xp(&self, user_id: &str) -> Result<Option<UserXp>>;

    // ---- Leaderboard ----

    /// Bring the materialized ranks in line with current XP. Idempotent.
    async fn refresh_ranks(&self) -> Result<()>;

    async fn leaderboard_page(&self, limit: usize, offset: usize) -> Result<Vec<LeaderboardEntry>>;

    async fn leaderboard_entry(&self, user_id: &str) -> Result<Option<LeaderboardEntry>>;

    // ---- Winners / distribution ----

    async fn get_winner_record(&self, quest_id: &str) -> Result<Option<WinnerRecord>>;

    /// Insert unless a record exists; always returns the persisted record
    async fn insert_winner_record(&self, record: &WinnerRecord) -> Result<WinnerRecord>;

    /// Closed prize quests with no winner record yet
    async fn unsettled_quests(&self) -> Result<Vec<String>>;

    /// false -> true at most once. None if no record exists.
    async fn mark_distributed(
        &self,
        quest_id: &str,
        proof: Option<&str>,
        now: i64,
    ) -> Result<Option<WinnerRecord>>;

    // ---- Audit ----

    async fn log_event(&self, entry: &AuditEntry) -> Result<()>;
}
