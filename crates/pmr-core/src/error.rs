//! Error types for the review workflow core.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::types::EntityKind;

/// Coarse classification of a [`ReviewError`].
///
/// Callers branch on this to decide between refreshing and retrying
/// (`Conflict`), fixing their input (`Validation`), or reporting the condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    InvalidTransition,
    Conflict,
    NotFound,
    PermissionDenied,
    Timeout,
    Storage,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::InvalidTransition => write!(f, "invalid_transition"),
            ErrorKind::Conflict => write!(f, "conflict"),
            ErrorKind::NotFound => write!(f, "not_found"),
            ErrorKind::PermissionDenied => write!(f, "permission_denied"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::Storage => write!(f, "storage"),
        }
    }
}

/// Errors returned by every review workflow operation.
#[derive(Error, Debug)]
pub enum ReviewError {
    /// A mandatory field is missing or malformed. Not retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// The operation is not permitted from the entity's current status.
    #[error("cannot {operation} {entity} {id}: status is {status}")]
    InvalidTransition {
        entity: EntityKind,
        id: i64,
        status: String,
        operation: &'static str,
    },

    /// A concurrent writer got there first. Re-fetch before retrying.
    #[error("conflict on {entity} {id}: current status is {status}; re-fetch before retrying")]
    Conflict {
        entity: EntityKind,
        id: i64,
        status: String,
    },

    #[error("{entity} not found: {id}")]
    NotFound { entity: EntityKind, id: String },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ReviewError {
    pub fn not_found(entity: EntityKind, id: impl ToString) -> Self {
        ReviewError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn conflict(entity: EntityKind, id: i64, status: impl ToString) -> Self {
        ReviewError::Conflict {
            entity,
            id,
            status: status.to_string(),
        }
    }

    pub fn invalid_transition(
        entity: EntityKind,
        id: i64,
        status: impl ToString,
        operation: &'static str,
    ) -> Self {
        ReviewError::InvalidTransition {
            entity,
            id,
            status: status.to_string(),
            operation,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ReviewError::Validation(_) => ErrorKind::Validation,
            ReviewError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            ReviewError::Conflict { .. } => ErrorKind::Conflict,
            ReviewError::NotFound { .. } => ErrorKind::NotFound,
            ReviewError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            ReviewError::Timeout(_) => ErrorKind::Timeout,
            ReviewError::Storage(_) | ReviewError::Io(_) | ReviewError::Json(_) => {
                ErrorKind::Storage
            }
        }
    }

    /// Status of the entity at the time the error was raised, when known.
    pub fn current_status(&self) -> Option<&str> {
        match self {
            ReviewError::InvalidTransition { status, .. } | ReviewError::Conflict { status, .. } => {
                Some(status)
            }
            _ => None,
        }
    }

    /// True when the caller should re-fetch and may then retry.
    pub fn needs_refresh(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}

/// Result type alias using [`ReviewError`].
pub type Result<T> = std::result::Result<T, ReviewError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_status() {
        let err = ReviewError::conflict(EntityKind::Escalation, 42, "IN_REVIEW");
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.current_status(), Some("IN_REVIEW"));
        assert!(err.needs_refresh());

        let err = ReviewError::Validation("resolution is required".to_string());
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.current_status(), None);
        assert!(!err.needs_refresh());
    }

    #[test]
    fn test_messages_carry_entity_detail() {
        let err = ReviewError::invalid_transition(EntityKind::Protocol, 3, "APPROVED", "reject");
        assert_eq!(err.to_string(), "cannot reject protocol 3: status is APPROVED");

        let err = ReviewError::not_found(EntityKind::Recommendation, 99);
        assert_eq!(err.to_string(), "recommendation not found: 99");
    }
}
