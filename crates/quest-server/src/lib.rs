//! Quest Server - completion and reward settlement engine
//!
//! Architecture:
//! - Quest Registry: lifecycle and eligibility (`registry`)
//! - Completion Ledger + XP: one transaction per completion (`store`, `db`)
//! - Leaderboard: explicit comparator, order-statistics index (`ranking`)
//! - Winner Selection: FCFS and seeded raffle (`winners`)
//! - Distribution Tracker: one-shot payout flag (`engine`)
//!
//! Key invariants:
//! - A user completes a quest at most once
//! - A quest never holds more completions than its capacity
//! - Winners are computed at most once per quest and are reproducible
//! - No process-wide mutable state outlives a request; the store is the truth

pub mod api;
pub mod clock;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod models;
pub mod observability;
pub mod ranking;
pub mod registry;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod winners;
pub mod xp;

pub use config::{EngineConfig, StorageBackend};
pub use db::{DbPool, PgStore};
pub use engine::QuestEngine;
pub use error::{QuestError, Result};
pub use observability::{init_sentry, AuditEventType, AuditLogger};
pub use state::AppState;
pub use store::{MemoryStore, QuestStore};
