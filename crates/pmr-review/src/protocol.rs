//! Protocol drafting and approval.
//!
//! Protocols are editable only as DRAFT. Approval and rejection freeze them;
//! a repeated decision is an invalid transition, not a conflict.

use chrono::Utc;
use pmr_core::schema::require_text;
use pmr_core::transitions::protocol_transition;
use pmr_core::{
    Actor, AuditAction, AuditEvent, EntityKind, EscalationId, Limits, NewProtocol, Protocol,
    ProtocolEvent, ProtocolId, Result, ReviewError,
};
use pmr_storage::ReviewStore;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::audit::AuditSink;

pub struct ProtocolManager {
    store: Arc<dyn ReviewStore>,
    audit: Arc<dyn AuditSink>,
    limits: Limits,
}

impl ProtocolManager {
    pub fn new(store: Arc<dyn ReviewStore>, audit: Arc<dyn AuditSink>, limits: Limits) -> Self {
        Self {
            store,
            audit,
            limits,
        }
    }

    #[instrument(skip(self, content, actor), fields(actor = %actor.id))]
    pub async fn create(
        &self,
        escalation_id: EscalationId,
        title: &str,
        content: &str,
        actor: &Actor,
    ) -> Result<Protocol> {
        let new = NewProtocol {
            escalation_id,
            title: title.trim().to_string(),
            content: content.to_string(),
            created_by: actor.id.clone(),
        };
        new.validate(&self.limits)?;

        let protocol = self.store.insert_protocol(new).await?;
        self.audit.record(
            AuditEvent::new(EntityKind::Protocol, protocol.id, AuditAction::Drafted, actor)
                .landed_in(protocol.status),
        );
        info!(id = protocol.id, escalation_id, "protocol drafted");
        Ok(protocol)
    }

    pub async fn fetch(&self, id: ProtocolId) -> Result<Protocol> {
        self.store.get_protocol(id).await
    }

    pub async fn list_by_escalation(&self, escalation_id: EscalationId) -> Result<Vec<Protocol>> {
        self.store.protocols_for_escalation(escalation_id).await
    }

    /// Rewrite a draft. The version number is left alone.
    #[instrument(skip(self, content, actor), fields(actor = %actor.id))]
    pub async fn edit(
        &self,
        id: ProtocolId,
        title: &str,
        content: &str,
        actor: &Actor,
    ) -> Result<Protocol> {
        require_text("title", title, &self.limits)?;
        if content.chars().count() > self.limits.max_text_length {
            return Err(ReviewError::Validation(format!(
                "content must be {} characters or less",
                self.limits.max_text_length
            )));
        }

        let current = self.store.get_protocol(id).await?;
        let status = protocol_transition(id, current.status, ProtocolEvent::Edit)?;

        let mut next = current.clone();
        next.status = status;
        next.title = title.trim().to_string();
        next.content = content.to_string();
        let protocol = self.store.swap_protocol(&current, next).await?;

        self.record(&current, &protocol, AuditAction::Edited, actor);
        Ok(protocol)
    }

    #[instrument(skip(self, actor), fields(actor = %actor.id))]
    pub async fn approve(&self, id: ProtocolId, actor: &Actor) -> Result<Protocol> {
        let current = self.store.get_protocol(id).await?;
        let status = protocol_transition(id, current.status, ProtocolEvent::Approve)?;

        let mut next = current.clone();
        next.status = status;
        next.approved_by = Some(actor.id.clone());
        next.decided_at = Some(Utc::now());
        let protocol = self.store.swap_protocol(&current, next).await?;

        self.record(&current, &protocol, AuditAction::Approved, actor);
        info!(id, "protocol approved");
        Ok(protocol)
    }

    #[instrument(skip(self, reason, actor), fields(actor = %actor.id))]
    pub async fn reject(&self, id: ProtocolId, reason: &str, actor: &Actor) -> Result<Protocol> {
        require_text("rejection reason", reason, &self.limits)?;

        let current = self.store.get_protocol(id).await?;
        let status = protocol_transition(id, current.status, ProtocolEvent::Reject)?;

        let mut next = current.clone();
        next.status = status;
        next.rejected_by = Some(actor.id.clone());
        next.rejected_reason = Some(reason.trim().to_string());
        next.decided_at = Some(Utc::now());
        let protocol = self.store.swap_protocol(&current, next).await?;

        self.record(&current, &protocol, AuditAction::Rejected, actor);
        info!(id, "protocol rejected");
        Ok(protocol)
    }

    fn record(&self, before: &Protocol, after: &Protocol, action: AuditAction, actor: &Actor) {
        self.audit.record(
            AuditEvent::new(EntityKind::Protocol, after.id, action, actor)
                .transition(before.status, after.status),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::TracingAuditSink;
    use pmr_core::{
        ErrorKind, EscalationPriority, EscalationStatus, EscalationTrigger, NewEscalation,
        NewRecommendation, ProtocolStatus, RecommendationStatus,
    };
    use pmr_storage::MemoryStore;

    async fn setup() -> (ProtocolManager, Arc<dyn ReviewStore>, EscalationId) {
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
        let esc = store
            .insert_escalation(NewEscalation {
                recommendation_id: rec.id,
                escalated_by: "dr-a".to_string(),
                trigger: EscalationTrigger::Manual,
                priority: EscalationPriority::Low,
            })
            .await
            .unwrap();

        let mgr = ProtocolManager::new(
            store.clone(),
            Arc::new(TracingAuditSink),
            Limits::default(),
        );
        (mgr, store, esc.id)
    }

    fn actor() -> Actor {
        Actor::new("dr-cuddy", "Lisa Cuddy")
    }

    #[tokio::test]
    async fn test_edit_keeps_version() {
        let (mgr, _store, esc) = setup().await;
        let draft = mgr
            .create(esc, "Post-op regimen", "v1 text", &actor())
            .await
            .unwrap();

        let edited = mgr
            .edit(draft.id, "Post-op regimen", "v1 text, revised", &actor())
            .await
            .unwrap();
        assert_eq!(edited.version, 1);
        assert_eq!(edited.status, ProtocolStatus::Draft);
        assert_eq!(edited.content, "v1 text, revised");
        assert_eq!(edited.revision, 2);
    }

    #[tokio::test]
    async fn test_empty_title_rejected() {
        let (mgr, _store, esc) = setup().await;
        let err = mgr.create(esc, " ", "text", &actor()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_reject_needs_reason_and_freezes() {
        let (mgr, _store, esc) = setup().await;
        let draft = mgr.create(esc, "Plan B", "", &actor()).await.unwrap();

        let err = mgr.reject(draft.id, "", &actor()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let rejected = mgr
            .reject(draft.id, "dose too high", &actor())
            .await
            .unwrap();
        assert_eq!(rejected.status, ProtocolStatus::Rejected);
        assert_eq!(rejected.rejected_by.as_deref(), Some("dr-cuddy"));

        let err = mgr
            .edit(draft.id, "Plan B", "new", &actor())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    }

    #[tokio::test]
    async fn test_terminal_escalation_refuses_new_protocols() {
        let (mgr, store, esc) = setup().await;
        let current = store.get_escalation(esc).await.unwrap();
        let mut closed = current.clone();
        closed.status = EscalationStatus::Cancelled;
        store.swap_escalation(&current, closed).await.unwrap();

        let err = mgr.create(esc, "Late", "", &actor()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);

        let err = mgr.create(404, "Missing", "", &actor()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
