//! Core types for the pain-management review workflow.
//!
//! This crate holds the entities shared by the store and the lifecycle
//! managers: recommendations, escalations, protocols and comments, their
//! status enums and transition tables, the error taxonomy, audit records and
//! configuration.

pub mod audit;
pub mod config;
pub mod error;
pub mod schema;
pub mod transitions;
pub mod types;

pub use audit::{AuditAction, AuditEvent};
pub use config::{Limits, ReviewConfig, PMR_DIR};
pub use error::{ErrorKind, Result, ReviewError};
pub use schema::{NewComment, NewEscalation, NewProtocol, NewRecommendation};
pub use transitions::{EscalationEvent, ProtocolEvent, RecommendationEvent};

// Re-export main types for convenience
pub use types::{
    content_hash, Actor, Comment, CommentId, CommentParent, DrugEntry, DrugRole, EntityKind,
    Escalation, EscalationFilter, EscalationId, EscalationPriority, EscalationStats,
    EscalationStatus, EscalationTrigger, Protocol, ProtocolId, ProtocolStatus, Recommendation,
    RecommendationId, RecommendationStatus,
};
