//! Quest settlement engine
//!
//! `QuestEngine` is the only entry point handlers use. It owns no mutable
//! state of its own: every call reads and writes through the `QuestStore`,
//! so any number of engine clones (or processes) can serve requests.

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::{QuestError, Result};
use crate::models::{
    CompletionReceipt, Completion, CreateQuestRequest, DistributionMode, Eligibility,
    LeaderboardEntry, Quest, QuestStatus, RejectReason, UpdateQuestRequest, UserXp, WinnerRecord,
};
use crate::observability::{AuditEntry, AuditEventType, AuditLogger, OperationTimer};
use crate::registry::{self, Acceptance};
use crate::store::{CompletionOutcome, QuestEdit, QuestStore};
use crate::winners;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct QuestEngine {
    store: Arc<dyn QuestStore>,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
}

impl QuestEngine {
    pub fn new(store: Arc<dyn QuestStore>, config: EngineConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn QuestStore>,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &dyn QuestStore {
        self.store.as_ref()
    }

    fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Run an idempotent storage call, retrying once after the configured
    /// backoff. Only storage failures reach here.
    async fn with_retry<T, F, Fut>(&self, op: &'static str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        match call().await {
            Ok(value) => Ok(value),
            Err(first) => {
                warn!(op, error = %first, "Storage call failed, retrying once");
                tokio::time::sleep(self.config.retry_backoff).await;
                call().await.map_err(|e| {
                    error!(op, error = %e, "Storage call failed after retry");
                    QuestError::Storage(e)
                })
            }
        }
    }

    async fn load_quest(&self, quest_id: &str) -> Result<Quest> {
        registry::validate_id("quest_id", quest_id)?;
        let store = self.store();
        self.with_retry("get_quest", move || store.get_quest(quest_id))
            .await?
            .ok_or_else(|| QuestError::NotFound(format!("quest {}", quest_id)))
    }

    // ========================================================================
    // QUEST REGISTRY
    // ========================================================================

    pub async fn create_quest(&self, req: CreateQuestRequest) -> Result<Quest> {
        let now = self.now();
        registry::validate_create(&req, now)?;

        let quest = Quest {
            id: Uuid::new_v4().to_string(),
            creator_id: req.creator_id,
            title: req.title,
            reward_points: req.reward_points,
            prize_pool: req.prize_pool,
            max_completions: req.max_completions,
            expires_at: req.expires_at,
            status: QuestStatus::Active,
            closed_at: None,
            created_at: now,
            updated_at: now,
        };

        self.store.insert_quest(&quest).await?;
        info!(quest_id = %quest.id, creator = %quest.creator_id, "Quest created");
        AuditLogger::quest(
            self.store(),
            AuditEventType::QuestCreated,
            &quest,
            Some(quest.creator_id.as_str()),
        )
        .await;

        Ok(quest)
    }

    pub async fn get_quest(&self, quest_id: &str) -> Result<Quest> {
        self.load_quest(quest_id).await
    }

    pub async fn list_quests(&self, status: Option<QuestStatus>) -> Result<Vec<Quest>> {
        let store = self.store();
        self.with_retry("list_quests", move || store.list_quests(status))
            .await
    }

    /// Edit an open quest. Completions already recorded keep the points
    /// they were awarded.
    pub async fn update_quest(&self, quest_id: &str, req: UpdateQuestRequest) -> Result<Quest> {
        let mut quest = self.load_quest(quest_id).await?;
        registry::check_owner(&quest, &req.actor_id)?;
        registry::apply_update(&mut quest, &req, self.now())?;

        match self.store.update_quest(&quest).await? {
            QuestEdit::Applied => {}
            QuestEdit::Missing => return Err(QuestError::NotFound(format!("quest {}", quest_id))),
            // Closed between the read and the write
            QuestEdit::Closed => {
                return Err(QuestError::NotEligible(format!(
                    "quest {} can no longer be edited",
                    quest_id
                )))
            }
            QuestEdit::CapacityBelowLedger { completions } => {
                return Err(QuestError::Validation(format!(
                    "max_completions must exceed the {} completions already recorded",
                    completions
                )))
            }
        }

        AuditLogger::quest(
            self.store(),
            AuditEventType::QuestUpdated,
            &quest,
            Some(req.actor_id.as_str()),
        )
        .await;
        self.load_quest(quest_id).await
    }

    /// Remove a quest with its completions and winner record. Points
    /// already earned stay with the users.
    pub async fn delete_quest(&self, quest_id: &str, actor_id: &str) -> Result<()> {
        let quest = self.load_quest(quest_id).await?;
        registry::check_owner(&quest, actor_id)?;

        if !self.store.delete_quest(quest_id).await? {
            return Err(QuestError::NotFound(format!("quest {}", quest_id)));
        }

        info!(quest_id, actor = actor_id, "Quest deleted");
        AuditLogger::quest(
            self.store(),
            AuditEventType::QuestDeleted,
            &quest,
            Some(actor_id),
        )
        .await;
        Ok(())
    }

    pub async fn pause_quest(&self, quest_id: &str, actor_id: &str) -> Result<Quest> {
        self.transition(quest_id, actor_id, QuestStatus::Paused).await
    }

    pub async fn resume_quest(&self, quest_id: &str, actor_id: &str) -> Result<Quest> {
        self.transition(quest_id, actor_id, QuestStatus::Active).await
    }

    /// Manual close by the creator; the quest becomes COMPLETED
    pub async fn close_quest(&self, quest_id: &str, actor_id: &str) -> Result<Quest> {
        self.transition(quest_id, actor_id, QuestStatus::Completed)
            .await
    }

    async fn transition(&self, quest_id: &str, actor_id: &str, to: QuestStatus) -> Result<Quest> {
        let quest = self.load_quest(quest_id).await?;
        registry::check_owner(&quest, actor_id)?;
        registry::check_transition(quest.status, to)?;

        let now = self.now();
        let closed_at = registry::closed_at_for(&quest, to, now);
        let from = [quest.status];
        let from = &from[..];
        let store = self.store();
        let updated = self
            .with_retry("transition_quest", move || {
                store.transition_quest(quest_id, from, to, closed_at, now)
            })
            .await?;

        let updated = match updated {
            Some(updated) => updated,
            None => {
                // A retried flip finds its own earlier write already applied
                let current = self.load_quest(quest_id).await?;
                if current.status != to {
                    return Err(QuestError::InvalidTransition {
                        from: current.status,
                        to,
                    });
                }
                current
            }
        };

        info!(quest_id, from = %quest.status, to = %to, "Quest status changed");
        AuditLogger::quest(
            self.store(),
            AuditEventType::QuestStatusChanged,
            &updated,
            Some(actor_id),
        )
        .await;

        if updated.status.is_closed() {
            self.settle_after_close(&updated).await;
        }
        Ok(updated)
    }

    /// Eligibility of a quest for new completions. A quest found past its
    /// deadline is flipped to EXPIRED here; repeating the flip is a no-op.
    pub async fn can_accept(&self, quest_id: &str) -> Result<Eligibility> {
        registry::validate_id("quest_id", quest_id)?;
        let store = self.store();
        let quest = self
            .with_retry("get_quest", move || store.get_quest(quest_id))
            .await?;
        let count = match &quest {
            Some(_) => {
                self.with_retry("count_completions", move || {
                    store.count_completions(quest_id)
                })
                .await?
            }
            None => 0,
        };

        let acceptance = registry::can_accept(quest.as_ref(), count, self.now());
        if let (Acceptance::Reject(RejectReason::Expired), Some(quest)) = (acceptance, &quest) {
            if let Some(expired) = self.expire(quest).await? {
                self.settle_after_close(&expired).await;
            }
        }

        Ok(Eligibility {
            quest_id: quest_id.to_string(),
            ok: acceptance.is_ok(),
            reason: acceptance.reason(),
        })
    }

    /// Flip an ACTIVE quest past its deadline to EXPIRED. Settlement is
    /// left to the caller.
    async fn expire(&self, quest: &Quest) -> Result<Option<Quest>> {
        let now = self.now();
        let closed_at = registry::closed_at_for(quest, QuestStatus::Expired, now);
        let quest_id = quest.id.as_str();
        let store = self.store();
        let flipped = self
            .with_retry("transition_quest", move || {
                store.transition_quest(
                    quest_id,
                    &[QuestStatus::Active],
                    QuestStatus::Expired,
                    closed_at,
                    now,
                )
            })
            .await?;

        if let Some(expired) = &flipped {
            info!(quest_id, "Quest expired");
            AuditLogger::quest(self.store(), AuditEventType::QuestStatusChanged, expired, None)
                .await;
        }
        Ok(flipped)
    }

    // ========================================================================
    // COMPLETION LEDGER
    // ========================================================================

    /// Record that `user_id` completed `quest_id`, award the quest's current
    /// reward and refresh the user's rank.
    ///
    /// The eligibility check, ledger insert and XP update commit together.
    /// This call is never retried: a duplicate is reported as
    /// `AlreadyCompleted`, never as a storage failure.
    pub async fn record_completion(
        &self,
        quest_id: &str,
        user_id: &str,
    ) -> Result<CompletionReceipt> {
        registry::validate_id("quest_id", quest_id)?;
        registry::validate_id("user_id", user_id)?;

        let timer = OperationTimer::start();
        let outcome = self
            .store
            .record_completion(quest_id, user_id, self.now(), self.config.level_curve())
            .await?;

        let (completion, xp, closed) = match outcome {
            CompletionOutcome::Recorded {
                completion,
                xp,
                closed,
            } => (completion, xp, closed),
            CompletionOutcome::Rejected(reason) => {
                debug!(quest_id, user_id, reason = reason.as_str(), "Completion rejected");
                AuditLogger::rejection(self.store(), quest_id, user_id, reason).await;
                if reason == RejectReason::Expired {
                    if let Ok(quest) = self.load_quest(quest_id).await {
                        self.settle_after_close(&quest).await;
                    }
                }
                return Err(match reason {
                    RejectReason::NotFound => {
                        QuestError::NotFound(format!("quest {}", quest_id))
                    }
                    other => other.into(),
                });
            }
        };

        info!(
            quest_id,
            user_id,
            points = completion.points_awarded,
            total_points = xp.total_points,
            level = xp.level,
            "Completion recorded"
        );
        AuditLogger::completion(self.store(), &completion, timer.elapsed_ms()).await;

        // The completion is durable at this point; a failed refresh only
        // delays rank visibility until the next one.
        let rank = match self.refresh_rank(user_id).await {
            Ok(rank) => rank,
            Err(e) => {
                error!(user_id, error = %e, "Rank refresh failed after completion");
                sentry::capture_message(
                    &format!("rank refresh failed for {}: {}", user_id, e),
                    sentry::Level::Error,
                );
                None
            }
        };

        if closed {
            if let Ok(quest) = self.load_quest(quest_id).await {
                info!(quest_id, "Quest reached capacity and closed");
                self.settle_after_close(&quest).await;
            }
        }

        Ok(CompletionReceipt {
            completion,
            xp,
            rank,
            quest_closed: closed,
        })
    }

    /// Ledger for a quest in (completed_at, sequence) order
    pub async fn list_completions(&self, quest_id: &str) -> Result<Vec<Completion>> {
        self.load_quest(quest_id).await?;
        let store = self.store();
        self.with_retry("list_completions", move || {
            store.list_completions(quest_id)
        })
        .await
    }

    // ========================================================================
    // XP / LEADERBOARD
    // ========================================================================

    /// XP for a user; users with no completions get the zero state
    pub async fn user_xp(&self, user_id: &str) -> Result<UserXp> {
        registry::validate_id("user_id", user_id)?;
        let store = self.store();
        let xp = self
            .with_retry("get_user_xp", move || store.get_user_xp(user_id))
            .await?;
        Ok(xp.unwrap_or_else(|| UserXp::zero(user_id)))
    }

    /// Rebuild ranks and return the user's current one
    pub async fn refresh_rank(&self, user_id: &str) -> Result<Option<u32>> {
        let store = self.store();
        self.with_retry("refresh_ranks", move || store.refresh_ranks())
            .await?;
        let entry = self
            .with_retry("leaderboard_entry", move || {
                store.leaderboard_entry(user_id)
            })
            .await?;
        Ok(entry.map(|e| e.rank))
    }

    pub async fn leaderboard_page(
        &self,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Vec<LeaderboardEntry>> {
        let limit = self.config.page_size(limit);
        let offset = self.config.page_offset(offset);
        let store = self.store();
        self.with_retry("leaderboard_page", move || {
            store.leaderboard_page(limit, offset)
        })
        .await
    }

    pub async fn leaderboard_entry(&self, user_id: &str) -> Result<LeaderboardEntry> {
        registry::validate_id("user_id", user_id)?;
        let store = self.store();
        self.with_retry("leaderboard_entry", move || {
            store.leaderboard_entry(user_id)
        })
        .await?
        .ok_or_else(|| QuestError::NotFound(format!("leaderboard entry for {}", user_id)))
    }

    // ========================================================================
    // WINNERS / DISTRIBUTION
    // ========================================================================

    /// Compute the winners of a closed prize quest, or return the record
    /// computed earlier. Selection is deterministic, so concurrent callers
    /// converge on the single persisted record.
    pub async fn compute_winners(&self, quest_id: &str) -> Result<WinnerRecord> {
        let store = self.store();
        if let Some(existing) = self
            .with_retry("get_winner_record", move || {
                store.get_winner_record(quest_id)
            })
            .await?
        {
            return Ok(existing);
        }

        let mut quest = self.load_quest(quest_id).await?;
        let now = self.now();
        if quest.status == QuestStatus::Active && registry::is_past_expiry(&quest, now) {
            quest = match self.expire(&quest).await? {
                Some(expired) => expired,
                None => self.load_quest(quest_id).await?,
            };
            if let Some(existing) = self
                .with_retry("get_winner_record", move || {
                    store.get_winner_record(quest_id)
                })
                .await?
            {
                return Ok(existing);
            }
        }

        let completions = self
            .with_retry("list_completions", move || {
                store.list_completions(quest_id)
            })
            .await?;
        let record = winners::compute_record(&quest, &completions, now)?;

        if record.mode == DistributionMode::Raffle {
            debug!(
                quest_id,
                seed = %hex::encode(winners::raffle_seed(&quest.id, quest.closed_at.unwrap_or_default())),
                "Raffle seed"
            );
        }

        let candidate = &record;
        let persisted = self
            .with_retry("insert_winner_record", move || {
                store.insert_winner_record(candidate)
            })
            .await?;

        if persisted == record {
            info!(
                quest_id,
                mode = record.mode.as_str(),
                winners = record.winners.len(),
                completions = completions.len(),
                "Winners computed"
            );
            AuditLogger::settlement(self.store(), AuditEventType::WinnersComputed, &persisted)
                .await;
        }
        Ok(persisted)
    }

    pub async fn winner_record(&self, quest_id: &str) -> Result<WinnerRecord> {
        self.load_quest(quest_id).await?;
        let store = self.store();
        self.with_retry("get_winner_record", move || {
            store.get_winner_record(quest_id)
        })
        .await?
        .ok_or(QuestError::NoWinnerRecord)
    }

    /// Mark a quest's prizes as paid. The first call records the proof;
    /// later calls return the stored record unchanged.
    pub async fn mark_distributed(
        &self,
        quest_id: &str,
        proof: Option<String>,
    ) -> Result<WinnerRecord> {
        registry::validate_id("quest_id", quest_id)?;
        let store = self.store();
        let existing = self
            .with_retry("get_winner_record", move || {
                store.get_winner_record(quest_id)
            })
            .await?
            .ok_or(QuestError::NoWinnerRecord)?;

        if existing.distributed {
            return Ok(existing);
        }

        let proof = proof.filter(|p| !p.trim().is_empty());
        if proof.is_none() && !existing.winners.is_empty() {
            return Err(QuestError::Validation(
                "proof is required when there are winners to pay".to_string(),
            ));
        }

        let now = self.now();
        let proof_ref = proof.as_deref();
        let record = self
            .with_retry("mark_distributed", move || {
                store.mark_distributed(quest_id, proof_ref, now)
            })
            .await?
            .ok_or(QuestError::NoWinnerRecord)?;

        if record.distributed_at == Some(now) {
            info!(quest_id, proof = ?record.distribution_proof, "Prizes distributed");
            AuditLogger::settlement(self.store(), AuditEventType::PrizeDistributed, &record)
                .await;
        }
        Ok(record)
    }

    // ========================================================================
    // BACKGROUND
    // ========================================================================

    /// Expire every ACTIVE quest whose deadline has passed
    pub async fn sweep_expired(&self) -> Result<Vec<String>> {
        let now = self.now();
        let store = self.store();
        let expired = self
            .with_retry("expire_due_quests", move || store.expire_due_quests(now))
            .await?;

        for quest_id in &expired {
            let entry = AuditEntry::new(AuditEventType::QuestStatusChanged)
                .entity("quest", quest_id)
                .with_payload(serde_json::json!({ "status": QuestStatus::Expired }));
            AuditLogger::log(self.store(), entry).await;
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "Expired overdue quests");
        }
        Ok(expired)
    }

    /// Compute winners for every closed prize quest that has none yet
    pub async fn settle_closed(&self) -> Result<Vec<WinnerRecord>> {
        let store = self.store();
        let pending = self
            .with_retry("unsettled_quests", move || store.unsettled_quests())
            .await?;

        let mut settled = Vec::with_capacity(pending.len());
        for quest_id in pending {
            match self.compute_winners(&quest_id).await {
                Ok(record) => settled.push(record),
                Err(e) => warn!(quest_id = %quest_id, error = %e, "Settlement failed"),
            }
        }
        Ok(settled)
    }

    async fn settle_after_close(&self, quest: &Quest) {
        if !self.config.auto_settle || quest.prize_pool.is_none() || !quest.status.is_closed() {
            return;
        }
        if let Err(e) = self.compute_winners(&quest.id).await {
            // The sweeper picks it up again
            warn!(quest_id = %quest.id, error = %e, "Automatic settlement failed");
        }
    }
}
