//! pmr-review: lifecycle managers and the review coordinator.
//!
//! A doctor's drug recommendation that is rejected, or that a pain-score
//! rule flags, is escalated to an anesthesiologist. This crate drives that
//! review:
//!
//! - [`recommendation`]: PENDING → ESCALATED → {APPROVED, REJECTED}, with a
//!   successor regimen spawned on rejection
//! - [`escalation`]: the review case, claimed by exactly one reviewer
//! - [`protocol`]: clinical protocols drafted alongside an escalation
//! - [`comments`]: threads on recommendations and protocols
//! - [`coordinator`]: the approve-with-edit and reject-and-replace flows
//!
//! Actor identity is an explicit argument everywhere. Committed changes are
//! reported to an [`AuditSink`].

pub mod audit;
pub mod comments;
pub mod coordinator;
pub mod escalation;
pub mod patient;
pub mod protocol;
pub mod recommendation;

pub use audit::{AuditSink, ChannelAuditSink, FanoutAuditSink, JsonlAuditSink, TracingAuditSink};
pub use comments::{CommentIter, CommentThread};
pub use coordinator::{
    ApprovalEdit, ApprovalOutcome, EscalationDetail, FlowStep, RejectionOutcome,
    RejectionRequest, ReviewCoordinator,
};
pub use escalation::{default_priority, EscalationManager};
pub use patient::{PatientDirectory, PatientRecord, StaticPatientDirectory};
pub use protocol::ProtocolManager;
pub use recommendation::{RecommendationManager, Rejection};
