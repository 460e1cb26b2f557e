//! Error types for the settlement engine

use crate::models::{QuestStatus, RejectReason};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, QuestError>;

/// Broad class of an error, drives retry policy and HTTP status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    NotFound,
    Precondition,
    Forbidden,
    Storage,
}

#[derive(Error, Debug)]
pub enum QuestError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Quest is not active")]
    NotActive,

    #[error("Quest has expired")]
    Expired,

    #[error("Quest capacity reached")]
    CapacityReached,

    #[error("Quest already completed by this user")]
    AlreadyCompleted,

    #[error("Not eligible: {0}")]
    NotEligible(String),

    #[error("No winner record for quest")]
    NoWinnerRecord,

    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: QuestStatus, to: QuestStatus },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl QuestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QuestError::Validation(_) => ErrorKind::Validation,
            QuestError::NotFound(_) | QuestError::NoWinnerRecord => ErrorKind::NotFound,
            QuestError::NotActive
            | QuestError::Expired
            | QuestError::CapacityReached
            | QuestError::AlreadyCompleted
            | QuestError::InvalidTransition { .. } => ErrorKind::Conflict,
            QuestError::NotEligible(_) => ErrorKind::Precondition,
            QuestError::Forbidden(_) => ErrorKind::Forbidden,
            QuestError::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            QuestError::Validation(_) => "validation",
            QuestError::NotFound(_) => "not_found",
            QuestError::NotActive => "not_active",
            QuestError::Expired => "expired",
            QuestError::CapacityReached => "capacity_reached",
            QuestError::AlreadyCompleted => "already_completed",
            QuestError::NotEligible(_) => "not_eligible",
            QuestError::NoWinnerRecord => "no_winner_record",
            QuestError::InvalidTransition { .. } => "invalid_transition",
            QuestError::Forbidden(_) => "forbidden",
            QuestError::Storage(_) => "storage",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Precondition => StatusCode::PRECONDITION_FAILED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<RejectReason> for QuestError {
    fn from(reason: RejectReason) -> Self {
        match reason {
            RejectReason::NotFound => QuestError::NotFound("quest".to_string()),
            RejectReason::NotActive => QuestError::NotActive,
            RejectReason::Expired => QuestError::Expired,
            RejectReason::CapacityReached => QuestError::CapacityReached,
            RejectReason::AlreadyCompleted => QuestError::AlreadyCompleted,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

impl IntoResponse for QuestError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            QuestError::Storage(e) => {
                error!(error = %e, "Storage failure");
                sentry::capture_message(&format!("storage failure: {}", e), sentry::Level::Error);
                "Internal storage error".to_string()
            }
            other => other.to_string(),
        };

        (
            status,
            Json(ErrorBody {
                error: self.code(),
                message,
            }),
        )
            .into_response()
    }
}
