//! Audit records emitted after every committed state change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{Actor, EntityKind};

/// What happened to the entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    Escalated,
    Updated,
    Approved,
    Rejected,
    Opened,
    Taken,
    QuestionAsked,
    QuestionAnswered,
    Resolved,
    Cancelled,
    Drafted,
    Edited,
    CommentAdded,
    CommentDeleted,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditAction::Created => "created",
            AuditAction::Escalated => "escalated",
            AuditAction::Updated => "updated",
            AuditAction::Approved => "approved",
            AuditAction::Rejected => "rejected",
            AuditAction::Opened => "opened",
            AuditAction::Taken => "taken",
            AuditAction::QuestionAsked => "question_asked",
            AuditAction::QuestionAnswered => "question_answered",
            AuditAction::Resolved => "resolved",
            AuditAction::Cancelled => "cancelled",
            AuditAction::Drafted => "drafted",
            AuditAction::Edited => "edited",
            AuditAction::CommentAdded => "comment_added",
            AuditAction::CommentDeleted => "comment_deleted",
        };
        f.write_str(s)
    }
}

/// One committed state change, as handed to the audit collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub entity: EntityKind,
    pub entity_id: i64,
    pub action: AuditAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_status: Option<String>,
    pub actor_id: String,
    pub at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(entity: EntityKind, entity_id: i64, action: AuditAction, actor: &Actor) -> Self {
        Self {
            entity,
            entity_id,
            action,
            from_status: None,
            to_status: None,
            actor_id: actor.id.clone(),
            at: Utc::now(),
        }
    }

    pub fn transition(mut self, from: impl fmt::Display, to: impl fmt::Display) -> Self {
        self.from_status = Some(from.to_string());
        self.to_status = Some(to.to_string());
        self
    }

    /// For creations: only the resulting status is known
    pub fn landed_in(mut self, status: impl fmt::Display) -> Self {
        self.to_status = Some(status.to_string());
        self
    }
}
