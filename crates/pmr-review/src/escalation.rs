//! Escalation lifecycle.
//!
//! ```text
//! PENDING ──take──▶ IN_REVIEW ──ask──▶ REQUIRES_CLARIFICATION
//!    │                 │   ◀──answer──────────┘
//!    └──resolve────────┴──▶ RESOLVED | CANCELLED
//! ```
//!
//! `take` is the contended operation: two reviewers reading the same PENDING
//! escalation both pass the transition check, and the store's
//! compare-and-swap lets exactly one of them through.

use chrono::Utc;
use pmr_core::schema::require_text;
use pmr_core::transitions::escalation_transition;
use pmr_core::{
    Actor, AuditAction, AuditEvent, EntityKind, Escalation, EscalationEvent, EscalationFilter,
    EscalationId, EscalationPriority, EscalationStats, EscalationTrigger, Limits, NewEscalation,
    RecommendationId, Result,
};
use pmr_storage::ReviewStore;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::audit::AuditSink;

/// Priority used when the caller does not pick one
pub fn default_priority(trigger: EscalationTrigger) -> EscalationPriority {
    match trigger {
        EscalationTrigger::PainScore { vas } => EscalationPriority::from_vas(vas),
        EscalationTrigger::DoctorRejection => EscalationPriority::High,
        EscalationTrigger::Manual => EscalationPriority::Medium,
    }
}

pub struct EscalationManager {
    store: Arc<dyn ReviewStore>,
    audit: Arc<dyn AuditSink>,
    limits: Limits,
}

impl EscalationManager {
    pub fn new(store: Arc<dyn ReviewStore>, audit: Arc<dyn AuditSink>, limits: Limits) -> Self {
        Self {
            store,
            audit,
            limits,
        }
    }

    /// Open a PENDING review case for an ESCALATED recommendation
    #[instrument(skip(self, actor), fields(actor = %actor.id))]
    pub async fn open(
        &self,
        recommendation_id: RecommendationId,
        actor: &Actor,
        trigger: EscalationTrigger,
        priority: Option<EscalationPriority>,
    ) -> Result<Escalation> {
        let new = NewEscalation {
            recommendation_id,
            escalated_by: actor.id.clone(),
            trigger,
            priority: priority.unwrap_or_else(|| default_priority(trigger)),
        };
        new.validate()?;

        let escalation = self.store.insert_escalation(new).await?;
        self.audit.record(
            AuditEvent::new(
                EntityKind::Escalation,
                escalation.id,
                AuditAction::Opened,
                actor,
            )
            .landed_in(escalation.status),
        );
        info!(
            id = escalation.id,
            priority = %escalation.priority,
            trigger = %escalation.trigger,
            "escalation opened"
        );
        Ok(escalation)
    }

    pub async fn fetch(&self, id: EscalationId) -> Result<Escalation> {
        self.store.get_escalation(id).await
    }

    /// Escalations matching `filter`, CRITICAL first, then oldest first
    pub async fn list(&self, filter: &EscalationFilter) -> Result<Vec<Escalation>> {
        self.store.list_escalations(filter).await
    }

    pub async fn stats(&self) -> Result<EscalationStats> {
        let all = self.store.list_escalations(&EscalationFilter::default()).await?;
        Ok(EscalationStats::tally(&all))
    }

    /// Claim a PENDING escalation for `actor`
    #[instrument(skip(self, actor), fields(actor = %actor.id))]
    pub async fn take(&self, id: EscalationId, actor: &Actor) -> Result<Escalation> {
        let current = self.store.get_escalation(id).await?;
        let status = escalation_transition(id, current.status, EscalationEvent::Take)?;

        let mut next = current.clone();
        next.status = status;
        next.reviewer = Some(actor.id.clone());
        let escalation = self.store.swap_escalation(&current, next).await?;

        self.record(&current, &escalation, AuditAction::Taken, actor);
        info!(id, reviewer = %actor.id, "escalation taken");
        Ok(escalation)
    }

    /// Park the review until the escalating doctor answers `question`
    #[instrument(skip(self, question, actor), fields(actor = %actor.id))]
    pub async fn ask_question(
        &self,
        id: EscalationId,
        question: &str,
        actor: &Actor,
    ) -> Result<Escalation> {
        require_text("question", question, &self.limits)?;

        let current = self.store.get_escalation(id).await?;
        let status = escalation_transition(id, current.status, EscalationEvent::AskQuestion)?;

        let mut next = current.clone();
        next.status = status;
        next.clarification = Some(question.trim().to_string());
        let escalation = self.store.swap_escalation(&current, next).await?;

        self.record(&current, &escalation, AuditAction::QuestionAsked, actor);
        Ok(escalation)
    }

    /// Return a clarified escalation to IN_REVIEW
    #[instrument(skip(self, actor), fields(actor = %actor.id))]
    pub async fn answer_question(&self, id: EscalationId, actor: &Actor) -> Result<Escalation> {
        let current = self.store.get_escalation(id).await?;
        let status = escalation_transition(id, current.status, EscalationEvent::AnswerQuestion)?;

        let mut next = current.clone();
        next.status = status;
        next.clarification = None;
        let escalation = self.store.swap_escalation(&current, next).await?;

        self.record(&current, &escalation, AuditAction::QuestionAnswered, actor);
        Ok(escalation)
    }

    /// Close the case: RESOLVED when `approved`, CANCELLED otherwise.
    ///
    /// The resolution text is validated before anything is read, so an empty
    /// resolution leaves the escalation untouched.
    #[instrument(skip(self, resolution, actor), fields(actor = %actor.id))]
    pub async fn resolve(
        &self,
        id: EscalationId,
        resolution: &str,
        approved: bool,
        actor: &Actor,
    ) -> Result<Escalation> {
        require_text("resolution", resolution, &self.limits)?;

        let current = self.store.get_escalation(id).await?;
        let status =
            escalation_transition(id, current.status, EscalationEvent::Resolve { approved })?;

        let mut next = current.clone();
        next.status = status;
        next.resolution = Some(resolution.to_string());
        next.resolved_by = Some(actor.id.clone());
        next.resolved_at = Some(Utc::now());
        let escalation = self.store.swap_escalation(&current, next).await?;

        let action = if approved {
            AuditAction::Resolved
        } else {
            AuditAction::Cancelled
        };
        self.record(&current, &escalation, action, actor);
        info!(id, status = %escalation.status, "escalation closed");
        Ok(escalation)
    }

    fn record(&self, before: &Escalation, after: &Escalation, action: AuditAction, actor: &Actor) {
        self.audit.record(
            AuditEvent::new(EntityKind::Escalation, after.id, action, actor)
                .transition(before.status, after.status),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::TracingAuditSink;
    use pmr_core::{ErrorKind, EscalationStatus, NewRecommendation, RecommendationStatus};
    use pmr_storage::MemoryStore;

    async fn setup() -> (EscalationManager, Escalation) {
        let store: Arc<dyn ReviewStore> = Arc::new(MemoryStore::new());
        let rec = store
            .insert_recommendation(NewRecommendation {
                patient_mrn: "MRN-1".to_string(),
                regimen_hierarchy: 1,
                drugs: Vec::new(),
                contraindications: Default::default(),
                previous_recommendation_id: None,
                created_by: "dr-a".to_string(),
            })
            .await
            .unwrap();
        let mut next = rec.clone();
        next.status = RecommendationStatus::Escalated;
        let rec = store.swap_recommendation(&rec, next).await.unwrap();

        let mgr = EscalationManager::new(store, Arc::new(TracingAuditSink), Limits::default());
        let esc = mgr
            .open(
                rec.id,
                &Actor::new("dr-a", "Dr A"),
                EscalationTrigger::PainScore { vas: 9 },
                None,
            )
            .await
            .unwrap();
        (mgr, esc)
    }

    fn reviewer() -> Actor {
        Actor::new("dr-cuddy", "Lisa Cuddy")
    }

    #[test]
    fn test_default_priority() {
        assert_eq!(
            default_priority(EscalationTrigger::PainScore { vas: 9 }),
            EscalationPriority::Critical
        );
        assert_eq!(
            default_priority(EscalationTrigger::PainScore { vas: 5 }),
            EscalationPriority::Medium
        );
        assert_eq!(
            default_priority(EscalationTrigger::DoctorRejection),
            EscalationPriority::High
        );
    }

    #[tokio::test]
    async fn test_open_uses_vas_priority() {
        let (_mgr, esc) = setup().await;
        assert_eq!(esc.priority, EscalationPriority::Critical);
        assert_eq!(esc.status, EscalationStatus::Pending);
    }

    #[tokio::test]
    async fn test_take_records_reviewer() {
        let (mgr, esc) = setup().await;
        let taken = mgr.take(esc.id, &reviewer()).await.unwrap();
        assert_eq!(taken.status, EscalationStatus::InReview);
        assert_eq!(taken.reviewer.as_deref(), Some("dr-cuddy"));

        let err = mgr.take(esc.id, &reviewer()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.current_status(), Some("IN_REVIEW"));
    }

    #[tokio::test]
    async fn test_clarification_round_trip() {
        let (mgr, esc) = setup().await;

        let err = mgr
            .ask_question(esc.id, "Renal function?", &reviewer())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);

        mgr.take(esc.id, &reviewer()).await.unwrap();
        let err = mgr.ask_question(esc.id, "", &reviewer()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let asked = mgr
            .ask_question(esc.id, "Renal function?", &reviewer())
            .await
            .unwrap();
        assert_eq!(asked.status, EscalationStatus::RequiresClarification);
        assert_eq!(asked.clarification.as_deref(), Some("Renal function?"));

        let err = mgr
            .resolve(esc.id, "done", true, &reviewer())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);

        let answered = mgr.answer_question(esc.id, &reviewer()).await.unwrap();
        assert_eq!(answered.status, EscalationStatus::InReview);
        assert!(answered.clarification.is_none());
    }

    #[tokio::test]
    async fn test_resolve_twice_conflicts() {
        let (mgr, esc) = setup().await;
        let resolved = mgr
            .resolve(esc.id, "Patient stabilized", true, &reviewer())
            .await
            .unwrap();
        assert_eq!(resolved.status, EscalationStatus::Resolved);
        assert_eq!(resolved.resolved_by.as_deref(), Some("dr-cuddy"));
        assert!(resolved.resolved_at.is_some());

        let err = mgr
            .resolve(esc.id, "again", false, &reviewer())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let err = mgr
            .ask_question(esc.id, "late question", &reviewer())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_stats_counts_by_status_and_priority() {
        let (mgr, esc) = setup().await;
        mgr.take(esc.id, &reviewer()).await.unwrap();

        let stats = mgr.stats().await.unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.in_review, 1);
        assert_eq!(stats.critical, 1);
    }
}
