//! Pure transition tables for the three lifecycles.
//!
//! No I/O and no clocks: `status.on(event)` returns the next status or `None`
//! when the event is not permitted. Every table matches on `(status, event)`
//! without a wildcard arm, so a new status or event does not compile until
//! each pairing has been decided.
//!
//! The `*_transition` helpers turn a refusal into the error kind the workflow
//! contract assigns to it.

use crate::types::{EntityKind, EscalationStatus, ProtocolStatus, RecommendationStatus};
use crate::{ReviewError, Result};

/// Events accepted by a recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecommendationEvent {
    Escalate,
    Update,
    Approve,
    Reject,
}

impl RecommendationEvent {
    pub fn operation(&self) -> &'static str {
        match self {
            RecommendationEvent::Escalate => "escalate",
            RecommendationEvent::Update => "update",
            RecommendationEvent::Approve => "approve",
            RecommendationEvent::Reject => "reject",
        }
    }
}

impl RecommendationStatus {
    pub fn on(self, event: RecommendationEvent) -> Option<RecommendationStatus> {
        use RecommendationEvent as E;
        use RecommendationStatus as S;

        match (self, event) {
            (S::Pending, E::Escalate) => Some(S::Escalated),
            (S::Escalated, E::Update) => Some(S::Escalated),
            (S::Escalated, E::Approve) => Some(S::Approved),
            (S::Escalated, E::Reject) => Some(S::Rejected),

            (S::Pending, E::Update | E::Approve | E::Reject) => None,
            (S::Escalated, E::Escalate) => None,
            (S::Approved | S::Rejected, E::Escalate | E::Update | E::Approve | E::Reject) => None,
        }
    }
}

/// Events accepted by an escalation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationEvent {
    Take,
    AskQuestion,
    AnswerQuestion,
    Resolve { approved: bool },
}

impl EscalationEvent {
    pub fn operation(&self) -> &'static str {
        match self {
            EscalationEvent::Take => "take",
            EscalationEvent::AskQuestion => "ask a question on",
            EscalationEvent::AnswerQuestion => "answer the question on",
            EscalationEvent::Resolve { .. } => "resolve",
        }
    }
}

impl EscalationStatus {
    pub fn on(self, event: EscalationEvent) -> Option<EscalationStatus> {
        use EscalationEvent as E;
        use EscalationStatus as S;

        match (self, event) {
            (S::Pending, E::Take) => Some(S::InReview),
            (S::InReview, E::AskQuestion) => Some(S::RequiresClarification),
            (S::RequiresClarification, E::AnswerQuestion) => Some(S::InReview),
            (S::Pending | S::InReview, E::Resolve { approved: true }) => Some(S::Resolved),
            (S::Pending | S::InReview, E::Resolve { approved: false }) => Some(S::Cancelled),

            (S::InReview | S::RequiresClarification, E::Take) => None,
            (S::Pending | S::RequiresClarification, E::AskQuestion) => None,
            (S::Pending | S::InReview, E::AnswerQuestion) => None,
            (S::RequiresClarification, E::Resolve { .. }) => None,
            (
                S::Resolved | S::Cancelled,
                E::Take | E::AskQuestion | E::AnswerQuestion | E::Resolve { .. },
            ) => None,
        }
    }
}

/// Events accepted by a protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolEvent {
    Edit,
    Approve,
    Reject,
}

impl ProtocolEvent {
    pub fn operation(&self) -> &'static str {
        match self {
            ProtocolEvent::Edit => "edit",
            ProtocolEvent::Approve => "approve",
            ProtocolEvent::Reject => "reject",
        }
    }
}

impl ProtocolStatus {
    pub fn on(self, event: ProtocolEvent) -> Option<ProtocolStatus> {
        use ProtocolEvent as E;
        use ProtocolStatus as S;

        match (self, event) {
            (S::Draft, E::Edit) => Some(S::Draft),
            (S::Draft, E::Approve) => Some(S::Approved),
            (S::Draft, E::Reject) => Some(S::Rejected),
            (S::Approved | S::Rejected, E::Edit | E::Approve | E::Reject) => None,
        }
    }
}

/// Next recommendation status, or `InvalidTransition`.
pub fn recommendation_transition(
    id: i64,
    status: RecommendationStatus,
    event: RecommendationEvent,
) -> Result<RecommendationStatus> {
    status.on(event).ok_or_else(|| {
        ReviewError::invalid_transition(EntityKind::Recommendation, id, status, event.operation())
    })
}

/// Next escalation status.
///
/// `take` refused for any reason, and any event against a terminal
/// escalation, is a lost race and reported as `Conflict`. Everything else is
/// `InvalidTransition`.
pub fn escalation_transition(
    id: i64,
    status: EscalationStatus,
    event: EscalationEvent,
) -> Result<EscalationStatus> {
    match status.on(event) {
        Some(next) => Ok(next),
        None if status.is_terminal() || event == EscalationEvent::Take => {
            Err(ReviewError::conflict(EntityKind::Escalation, id, status))
        }
        None => Err(ReviewError::invalid_transition(
            EntityKind::Escalation,
            id,
            status,
            event.operation(),
        )),
    }
}

/// Next protocol status, or `InvalidTransition`.
pub fn protocol_transition(
    id: i64,
    status: ProtocolStatus,
    event: ProtocolEvent,
) -> Result<ProtocolStatus> {
    status.on(event).ok_or_else(|| {
        ReviewError::invalid_transition(EntityKind::Protocol, id, status, event.operation())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_recommendation_happy_paths() {
        let s = RecommendationStatus::Pending;
        let s = s.on(RecommendationEvent::Escalate).unwrap();
        assert_eq!(s, RecommendationStatus::Escalated);
        assert_eq!(s.on(RecommendationEvent::Update), Some(RecommendationStatus::Escalated));
        assert_eq!(s.on(RecommendationEvent::Approve), Some(RecommendationStatus::Approved));
        assert_eq!(s.on(RecommendationEvent::Reject), Some(RecommendationStatus::Rejected));
    }

    #[test]
    fn test_recommendation_terminal_states_reject_all_events() {
        let events = [
            RecommendationEvent::Escalate,
            RecommendationEvent::Update,
            RecommendationEvent::Approve,
            RecommendationEvent::Reject,
        ];
        for status in [RecommendationStatus::Approved, RecommendationStatus::Rejected] {
            for event in events {
                assert_eq!(status.on(event), None, "{:?} on {:?}", event, status);
            }
        }
    }

    #[test]
    fn test_update_requires_escalated() {
        let err = recommendation_transition(
            7,
            RecommendationStatus::Pending,
            RecommendationEvent::Update,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
        assert_eq!(err.current_status(), Some("PENDING"));
    }

    #[test]
    fn test_escalation_table() {
        use EscalationStatus as S;

        assert_eq!(S::Pending.on(EscalationEvent::Take), Some(S::InReview));
        assert_eq!(
            S::InReview.on(EscalationEvent::AskQuestion),
            Some(S::RequiresClarification)
        );
        assert_eq!(
            S::RequiresClarification.on(EscalationEvent::AnswerQuestion),
            Some(S::InReview)
        );
        assert_eq!(
            S::Pending.on(EscalationEvent::Resolve { approved: true }),
            Some(S::Resolved)
        );
        assert_eq!(
            S::InReview.on(EscalationEvent::Resolve { approved: false }),
            Some(S::Cancelled)
        );
        assert_eq!(
            S::RequiresClarification.on(EscalationEvent::Resolve { approved: true }),
            None
        );
    }

    #[test]
    fn test_escalation_error_kinds() {
        use EscalationStatus as S;

        let err = escalation_transition(42, S::InReview, EscalationEvent::Take).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let err = escalation_transition(42, S::Resolved, EscalationEvent::Resolve { approved: true })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.current_status(), Some("RESOLVED"));

        let err = escalation_transition(
            42,
            S::RequiresClarification,
            EscalationEvent::Resolve { approved: true },
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);

        let err = escalation_transition(42, S::Pending, EscalationEvent::AskQuestion).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    }

    #[test]
    fn test_protocol_frozen_after_decision() {
        let approved = protocol_transition(1, ProtocolStatus::Draft, ProtocolEvent::Approve).unwrap();
        assert_eq!(approved, ProtocolStatus::Approved);

        for event in [ProtocolEvent::Edit, ProtocolEvent::Approve, ProtocolEvent::Reject] {
            let err = protocol_transition(1, approved, event).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidTransition);
        }
    }
}
