//! Winner Selection
//!
//! Selection is a pure function of the quest and its ordered completion
//! ledger, so recomputing after a crash reproduces the same winners.
//!
//! - FCFS: the first `number_of_winners` completions by (completed_at, sequence)
//! - RAFFLE: every completer gets a score H(domain || seed || user_id); the
//!   lowest scores win, which is a uniform sample without replacement. The
//!   seed is H(domain || quest_id || closed_at) and never reads the clock.

use crate::error::{QuestError, Result};
use crate::models::{Completion, DistributionMode, PrizePool, Quest, WinnerRecord};
use sha2::{Digest, Sha256};

const RAFFLE_SEED_DOMAIN: &[u8] = b"quest-raffle-seed";
const RAFFLE_SCORE_DOMAIN: &[u8] = b"quest-raffle-score";

pub fn raffle_seed(quest_id: &str, closed_at: i64) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(RAFFLE_SEED_DOMAIN);
    hasher.update([0u8]);
    hasher.update(quest_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(closed_at.to_le_bytes());
    hasher.finalize().into()
}

fn raffle_score(seed: &[u8; 32], user_id: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(RAFFLE_SCORE_DOMAIN);
    hasher.update([0u8]);
    hasher.update(seed);
    hasher.update(user_id.as_bytes());
    hasher.finalize().into()
}

fn ledger_order(completions: &[Completion]) -> Vec<&Completion> {
    let mut ordered: Vec<&Completion> = completions.iter().collect();
    ordered.sort_by_key(|c| (c.completed_at, c.sequence));
    ordered
}

pub fn select_fcfs(completions: &[Completion], number_of_winners: usize) -> Vec<String> {
    ledger_order(completions)
        .into_iter()
        .take(number_of_winners)
        .map(|c| c.user_id.clone())
        .collect()
}

/// Winners are returned in draw order (lowest score first)
pub fn select_raffle(
    completions: &[Completion],
    number_of_winners: usize,
    seed: &[u8; 32],
) -> Vec<String> {
    let mut scored: Vec<([u8; 32], &str)> = completions
        .iter()
        .map(|c| (raffle_score(seed, &c.user_id), c.user_id.as_str()))
        .collect();
    scored.sort();
    scored
        .into_iter()
        .take(number_of_winners)
        .map(|(_, user_id)| user_id.to_string())
        .collect()
}

/// Fixed share per winner slot; unfilled slots are not redistributed
pub fn prize_per_winner(pool: &PrizePool) -> u64 {
    pool.amount / (pool.number_of_winners.max(1) as u64)
}

/// Build the winner record for a closed prize quest.
///
/// Zero completions yield an empty record, not an error.
pub fn compute_record(
    quest: &Quest,
    completions: &[Completion],
    computed_at: i64,
) -> Result<WinnerRecord> {
    if !quest.status.is_closed() {
        return Err(QuestError::NotEligible(format!(
            "quest {} is still {}",
            quest.id, quest.status
        )));
    }
    let Some(pool) = &quest.prize_pool else {
        return Err(QuestError::NotEligible(format!(
            "quest {} has no prize pool",
            quest.id
        )));
    };

    let count = pool.number_of_winners as usize;
    let winners = match pool.mode {
        DistributionMode::Fcfs => select_fcfs(completions, count),
        DistributionMode::Raffle => {
            let seed = raffle_seed(&quest.id, quest.closed_at.unwrap_or_default());
            select_raffle(completions, count, &seed)
        }
    };

    Ok(WinnerRecord {
        quest_id: quest.id.clone(),
        winners,
        prize_per_winner: prize_per_winner(pool),
        token: pool.token.clone(),
        mode: pool.mode,
        computed_at,
        distributed: false,
        distribution_proof: None,
        distributed_at: None,
    })
}
