//! Expiry sweeper
//!
//! Periodically flips overdue quests to EXPIRED and, with auto-settle on,
//! computes winners for closed prize quests that still lack a record.
//! Lazy expiry in the engine makes the sweeper optional for correctness;
//! it only bounds how long a deadline can go unnoticed.

use crate::engine::QuestEngine;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

pub struct ExpirySweeper {
    engine: QuestEngine,
    sweep_interval: Duration,
    auto_settle: bool,
}

/// Counts from one sweep pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub settled: usize,
}

impl ExpirySweeper {
    pub fn new(engine: QuestEngine) -> Self {
        let sweep_interval = engine.config().sweep_interval;
        let auto_settle = engine.config().auto_settle;
        Self {
            engine,
            sweep_interval,
            auto_settle,
        }
    }

    /// One sweep. Failures are logged; the next tick tries again.
    pub async fn run_once(&self) -> SweepReport {
        let mut report = SweepReport::default();

        match self.engine.sweep_expired().await {
            Ok(expired) => report.expired = expired.len(),
            Err(e) => warn!(error = %e, "Expiry sweep failed"),
        }

        if self.auto_settle {
            match self.engine.settle_closed().await {
                Ok(records) => report.settled = records.len(),
                Err(e) => warn!(error = %e, "Settlement sweep failed"),
            }
        }

        debug!(expired = report.expired, settled = report.settled, "Sweep finished");
        report
    }

    /// Start the sweep loop. Returns None when the interval is zero.
    pub fn start(self) -> Option<JoinHandle<()>> {
        if self.sweep_interval.is_zero() {
            info!("Expiry sweeper disabled");
            return None;
        }

        info!(
            interval_secs = self.sweep_interval.as_secs(),
            auto_settle = self.auto_settle,
            "Starting expiry sweeper"
        );

        Some(tokio::spawn(async move {
            let mut ticker = interval(self.sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                self.run_once().await;
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::EngineConfig;
    use crate::models::{CreateQuestRequest, DistributionMode, PrizePool, QuestStatus};
    use crate::store::MemoryStore;
    use std::sync::Arc;

    const START: i64 = 1_700_000_000_000;

    fn engine(clock: Arc<ManualClock>, config: EngineConfig) -> QuestEngine {
        QuestEngine::with_clock(Arc::new(MemoryStore::new()), config, clock)
    }

    fn expiring_prize_quest(expires_at: i64) -> CreateQuestRequest {
        CreateQuestRequest {
            creator_id: "creator".to_string(),
            title: "Early bird".to_string(),
            reward_points: 10,
            prize_pool: Some(PrizePool {
                amount: 100,
                token: "USDC".to_string(),
                mode: DistributionMode::Fcfs,
                number_of_winners: 1,
            }),
            max_completions: None,
            expires_at: Some(expires_at),
        }
    }

    #[tokio::test]
    async fn test_sweep_expires_and_settles() {
        let clock = Arc::new(ManualClock::new(START));
        let engine = engine(clock.clone(), EngineConfig::default());
        let quest = engine
            .create_quest(expiring_prize_quest(START + 1_000))
            .await
            .unwrap();
        engine.record_completion(&quest.id, "alice").await.unwrap();

        let sweeper = ExpirySweeper::new(engine.clone());
        assert_eq!(sweeper.run_once().await, SweepReport::default());

        clock.advance(5_000);
        let report = sweeper.run_once().await;
        assert_eq!(report, SweepReport { expired: 1, settled: 1 });

        let stored = engine.get_quest(&quest.id).await.unwrap();
        assert_eq!(stored.status, QuestStatus::Expired);
        assert_eq!(stored.closed_at, Some(START + 1_000));
        assert_eq!(
            engine.winner_record(&quest.id).await.unwrap().winners,
            vec!["alice"]
        );

        // Second pass finds nothing new
        assert_eq!(sweeper.run_once().await, SweepReport::default());
    }

    #[tokio::test]
    async fn test_sweep_without_auto_settle() {
        let clock = Arc::new(ManualClock::new(START));
        let config = EngineConfig {
            auto_settle: false,
            ..EngineConfig::default()
        };
        let engine = engine(clock.clone(), config);
        let quest = engine
            .create_quest(expiring_prize_quest(START + 1_000))
            .await
            .unwrap();

        clock.advance(5_000);
        let report = ExpirySweeper::new(engine.clone()).run_once().await;
        assert_eq!(report, SweepReport { expired: 1, settled: 0 });
        assert!(engine.winner_record(&quest.id).await.is_err());
    }

    #[tokio::test]
    async fn test_zero_interval_disables_loop() {
        let config = EngineConfig {
            sweep_interval: Duration::ZERO,
            ..EngineConfig::default()
        };
        let engine = engine(Arc::new(ManualClock::new(START)), config);
        assert!(ExpirySweeper::new(engine).start().is_none());
    }
}
