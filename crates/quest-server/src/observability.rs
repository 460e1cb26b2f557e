//! Observability - Sentry Integration and Audit Trail
//!
//! Provides:
//! - Sentry error tracking (enabled via SENTRY_DSN env var)
//! - Structured audit logging for every settlement-relevant action
//! - Operation timing

use crate::models::{Completion, Quest, RejectReason, WinnerRecord};
use crate::store::QuestStore;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{error, info, span, warn, Level};

/// Initialize Sentry if SENTRY_DSN is set
pub fn init_sentry() -> Option<sentry::ClientInitGuard> {
    let dsn = std::env::var("SENTRY_DSN").ok()?;

    if dsn.is_empty() {
        info!("Sentry DSN is empty, error tracking disabled");
        return None;
    }

    let guard = sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: std::env::var("ENVIRONMENT").ok().map(|s| s.into()),
            traces_sample_rate: 0.1,
            ..Default::default()
        },
    ));

    info!("Sentry initialized for error tracking");
    Some(guard)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // Registry
    QuestCreated,
    QuestUpdated,
    QuestDeleted,
    QuestStatusChanged,

    // Ledger
    CompletionRecorded,
    CompletionRejected,

    // Settlement
    WinnersComputed,
    PrizeDistributed,
}

impl std::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_string(self).unwrap_or_else(|_| "unknown".to_string());
        write!(f, "{}", s.trim_matches('"'))
    }
}

/// Structured audit entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub event_type: AuditEventType,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub actor_id: Option<String>,
    pub payload: Option<serde_json::Value>,
    pub duration_ms: Option<u64>,
    pub success: bool,
    pub error_message: Option<String>,
}

impl AuditEntry {
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            event_type,
            entity_type: None,
            entity_id: None,
            actor_id: None,
            payload: None,
            duration_ms: None,
            success: true,
            error_message: None,
        }
    }

    pub fn entity(mut self, entity_type: &str, entity_id: &str) -> Self {
        self.entity_type = Some(entity_type.to_string());
        self.entity_id = Some(entity_id.to_string());
        self
    }

    pub fn actor(mut self, actor_id: &str) -> Self {
        self.actor_id = Some(actor_id.to_string());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn failed(mut self, error: &str) -> Self {
        self.success = false;
        self.error_message = Some(error.to_string());
        self
    }
}

/// Audit logger for structured logging and persistence
pub struct AuditLogger;

impl AuditLogger {
    /// Log an audit event to tracing and persist it. Persistence failures
    /// are logged and swallowed.
    pub async fn log(store: &dyn QuestStore, entry: AuditEntry) {
        let span = span!(
            Level::INFO,
            "audit",
            event_type = %entry.event_type,
            entity_type = ?entry.entity_type,
            entity_id = ?entry.entity_id,
            actor = ?entry.actor_id,
            success = entry.success,
        );
        {
            let _guard = span.enter();
            if entry.success {
                info!(
                    event = %entry.event_type,
                    entity = ?entry.entity_id,
                    actor = ?entry.actor_id,
                    duration_ms = ?entry.duration_ms,
                    "Audit event"
                );
            } else {
                warn!(
                    event = %entry.event_type,
                    entity = ?entry.entity_id,
                    actor = ?entry.actor_id,
                    error = ?entry.error_message,
                    "Audit event failed"
                );
            }
        }

        if let Err(e) = store.log_event(&entry).await {
            error!(error = %e, "Failed to persist audit event");
            sentry::capture_message(
                &format!("audit persistence failed: {}", e),
                sentry::Level::Warning,
            );
        }
    }

    pub async fn quest(
        store: &dyn QuestStore,
        event: AuditEventType,
        quest: &Quest,
        actor_id: Option<&str>,
    ) {
        let mut entry = AuditEntry::new(event)
            .entity("quest", &quest.id)
            .with_payload(serde_json::json!({
                "status": quest.status,
                "reward_points": quest.reward_points,
                "max_completions": quest.max_completions,
                "closed_at": quest.closed_at,
            }));
        if let Some(actor) = actor_id {
            entry = entry.actor(actor);
        }

        Self::log(store, entry).await;
    }

    pub async fn completion(store: &dyn QuestStore, completion: &Completion, duration_ms: u64) {
        let entry = AuditEntry::new(AuditEventType::CompletionRecorded)
            .entity("quest", &completion.quest_id)
            .actor(&completion.user_id)
            .with_payload(serde_json::json!({
                "points_awarded": completion.points_awarded,
                "sequence": completion.sequence,
            }))
            .with_duration(duration_ms);

        Self::log(store, entry).await;
    }

    pub async fn rejection(
        store: &dyn QuestStore,
        quest_id: &str,
        user_id: &str,
        reason: RejectReason,
    ) {
        let entry = AuditEntry::new(AuditEventType::CompletionRejected)
            .entity("quest", quest_id)
            .actor(user_id)
            .failed(reason.as_str());

        Self::log(store, entry).await;
    }

    pub async fn settlement(
        store: &dyn QuestStore,
        event: AuditEventType,
        record: &WinnerRecord,
    ) {
        let entry = AuditEntry::new(event)
            .entity("winner_record", &record.quest_id)
            .with_payload(serde_json::json!({
                "winners": record.winners,
                "prize_per_winner": record.prize_per_winner,
                "token": record.token,
                "distributed": record.distributed,
                "proof": record.distribution_proof,
            }));

        Self::log(store, entry).await;
    }
}

/// Timer for measuring operation duration
pub struct OperationTimer {
    start: Instant,
}

impl OperationTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_entry_builder() {
        let entry = AuditEntry::new(AuditEventType::CompletionRecorded)
            .entity("quest", "quest-123")
            .actor("user-1")
            .with_payload(serde_json::json!({"points_awarded": 50}))
            .with_duration(12);

        assert!(entry.success);
        assert_eq!(entry.entity_id, Some("quest-123".to_string()));
        assert_eq!(entry.actor_id, Some("user-1".to_string()));
        assert_eq!(entry.duration_ms, Some(12));
    }

    #[test]
    fn test_audit_entry_failed() {
        let entry = AuditEntry::new(AuditEventType::CompletionRejected)
            .actor("user-1")
            .failed("already_completed");

        assert!(!entry.success);
        assert_eq!(entry.error_message, Some("already_completed".to_string()));
    }

    #[test]
    fn test_event_type_display() {
        assert_eq!(AuditEventType::WinnersComputed.to_string(), "winners_computed");
        assert_eq!(
            AuditEventType::QuestStatusChanged.to_string(),
            "quest_status_changed"
        );
    }
}
