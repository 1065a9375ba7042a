//! Recommendation lifecycle: PENDING → ESCALATED → {APPROVED, REJECTED}.
//!
//! A rejection always spawns the replacement regimen in the same store
//! write, so a REJECTED recommendation without a successor is never
//! observable.

use pmr_core::schema::{require_text, validate_drugs};
use pmr_core::transitions::recommendation_transition;
use pmr_core::{
    Actor, AuditAction, AuditEvent, CommentParent, DrugEntry, EntityKind, Limits,
    NewRecommendation, Recommendation, RecommendationEvent, RecommendationId,
    Result, ReviewError,
};
use pmr_storage::ReviewStore;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::audit::AuditSink;
use crate::comments::CommentThread;
use crate::patient::PatientDirectory;

/// Both halves of a rejection
#[derive(Debug, Clone, Serialize)]
pub struct Rejection {
    pub rejected: Recommendation,
    pub successor: Recommendation,
}

pub struct RecommendationManager {
    store: Arc<dyn ReviewStore>,
    audit: Arc<dyn AuditSink>,
    comments: CommentThread,
    patients: Option<Arc<dyn PatientDirectory>>,
    limits: Limits,
}

impl RecommendationManager {
    pub fn new(
        store: Arc<dyn ReviewStore>,
        audit: Arc<dyn AuditSink>,
        comments: CommentThread,
        limits: Limits,
    ) -> Self {
        Self {
            store,
            audit,
            comments,
            patients: None,
            limits,
        }
    }

    /// Check MRNs against `directory` on create
    pub fn with_patient_directory(mut self, directory: Arc<dyn PatientDirectory>) -> Self {
        self.patients = Some(directory);
        self
    }

    /// New first-line regimen for a patient
    #[instrument(skip(self, drugs, contraindications, actor), fields(actor = %actor.id))]
    pub async fn create(
        &self,
        patient_mrn: &str,
        drugs: Vec<DrugEntry>,
        contraindications: BTreeSet<String>,
        actor: &Actor,
    ) -> Result<Recommendation> {
        let new = NewRecommendation {
            patient_mrn: patient_mrn.trim().to_string(),
            regimen_hierarchy: 1,
            drugs,
            contraindications,
            previous_recommendation_id: None,
            created_by: actor.id.clone(),
        };
        new.validate(&self.limits)?;

        if let Some(directory) = &self.patients {
            if directory.lookup(&new.patient_mrn).await?.is_none() {
                return Err(ReviewError::not_found(EntityKind::Patient, &new.patient_mrn));
            }
        }

        let rec = self.store.insert_recommendation(new).await?;
        self.audit.record(
            AuditEvent::new(EntityKind::Recommendation, rec.id, AuditAction::Created, actor)
                .landed_in(rec.status),
        );
        info!(id = rec.id, "recommendation created");
        Ok(rec)
    }

    pub async fn fetch(&self, id: RecommendationId) -> Result<Recommendation> {
        self.store.get_recommendation(id).await
    }

    /// Every regimen tried for a patient, first-line first
    pub async fn history(&self, patient_mrn: &str) -> Result<Vec<Recommendation>> {
        self.store.recommendations_for_patient(patient_mrn.trim()).await
    }

    pub async fn successor(&self, id: RecommendationId) -> Result<Option<Recommendation>> {
        self.store.successor_of(id).await
    }

    #[instrument(skip(self, actor), fields(actor = %actor.id))]
    pub async fn escalate(&self, id: RecommendationId, actor: &Actor) -> Result<Recommendation> {
        let current = self.store.get_recommendation(id).await?;
        let status = recommendation_transition(id, current.status, RecommendationEvent::Escalate)?;

        let mut next = current.clone();
        next.status = status;
        let rec = self.store.swap_recommendation(&current, next).await?;

        self.audit.record(
            AuditEvent::new(EntityKind::Recommendation, id, AuditAction::Escalated, actor)
                .transition(current.status, rec.status),
        );
        Ok(rec)
    }

    /// Replace the drug list and contraindications while under review
    #[instrument(skip(self, drugs, contraindications, actor), fields(actor = %actor.id))]
    pub async fn update(
        &self,
        id: RecommendationId,
        drugs: Vec<DrugEntry>,
        contraindications: BTreeSet<String>,
        actor: &Actor,
    ) -> Result<Recommendation> {
        validate_drugs(&drugs, &self.limits)?;

        let current = self.store.get_recommendation(id).await?;
        let status = recommendation_transition(id, current.status, RecommendationEvent::Update)?;

        let mut next = current.clone();
        next.status = status;
        next.drugs = drugs;
        next.contraindications = contraindications;
        let rec = self.store.swap_recommendation(&current, next).await?;

        self.audit.record(
            AuditEvent::new(EntityKind::Recommendation, id, AuditAction::Updated, actor)
                .transition(current.status, rec.status),
        );
        debug!(hash = %rec.content_hash(), "recommendation updated");
        Ok(rec)
    }

    /// Approve, attaching `comment` to the thread when one is given.
    /// A comment that fails to post does not undo the approval.
    #[instrument(skip(self, comment, actor), fields(actor = %actor.id))]
    pub async fn approve(
        &self,
        id: RecommendationId,
        comment: Option<&str>,
        actor: &Actor,
    ) -> Result<Recommendation> {
        let comment = non_blank(comment);
        if let Some(text) = comment {
            require_text("comment", text, &self.limits)?;
        }

        let current = self.store.get_recommendation(id).await?;
        let status = recommendation_transition(id, current.status, RecommendationEvent::Approve)?;

        let mut next = current.clone();
        next.status = status;
        let rec = self.store.swap_recommendation(&current, next).await?;

        self.audit.record(
            AuditEvent::new(EntityKind::Recommendation, id, AuditAction::Approved, actor)
                .transition(current.status, rec.status),
        );
        if let Some(text) = comment {
            self.attach_comment(id, actor, text).await;
        }
        info!(id, "recommendation approved");
        Ok(rec)
    }

    /// Reject and spawn the next regimen one level down the hierarchy.
    ///
    /// The successor starts PENDING with an empty drug list and inherits the
    /// patient's contraindications. `comment`, when given, lands on the
    /// rejected recommendation's thread.
    #[instrument(skip(self, reason, comment, actor), fields(actor = %actor.id))]
    pub async fn reject(
        &self,
        id: RecommendationId,
        reason: &str,
        comment: Option<&str>,
        actor: &Actor,
    ) -> Result<Rejection> {
        require_text("rejection reason", reason, &self.limits)?;
        let comment = non_blank(comment);
        if let Some(text) = comment {
            require_text("comment", text, &self.limits)?;
        }

        let current = self.store.get_recommendation(id).await?;
        let status = recommendation_transition(id, current.status, RecommendationEvent::Reject)?;

        let mut rejected = current.clone();
        rejected.status = status;
        rejected.rejected_reason = Some(reason.trim().to_string());

        let successor = NewRecommendation {
            patient_mrn: current.patient_mrn.clone(),
            regimen_hierarchy: current.regimen_hierarchy + 1,
            drugs: Vec::new(),
            contraindications: current.contraindications.clone(),
            previous_recommendation_id: Some(id),
            created_by: actor.id.clone(),
        };

        let (rejected, successor) = self
            .store
            .reject_with_successor(&current, rejected, successor)
            .await?;

        self.audit.record(
            AuditEvent::new(EntityKind::Recommendation, id, AuditAction::Rejected, actor)
                .transition(current.status, rejected.status),
        );
        self.audit.record(
            AuditEvent::new(
                EntityKind::Recommendation,
                successor.id,
                AuditAction::Created,
                actor,
            )
            .landed_in(successor.status),
        );
        if let Some(text) = comment {
            self.attach_comment(id, actor, text).await;
        }

        info!(
            id,
            successor = successor.id,
            hierarchy = successor.regimen_hierarchy,
            "recommendation rejected"
        );
        Ok(Rejection {
            rejected,
            successor,
        })
    }

    /// The decision is already committed when its comment is posted, so a
    /// failed post is logged and the decision still succeeds.
    async fn attach_comment(&self, id: RecommendationId, actor: &Actor, text: &str) {
        let parent = CommentParent::Recommendation(id);
        if let Err(e) = self.comments.add(parent, actor, text, false).await {
            warn!(id, error = %e, "decision committed but its comment was not posted");
        }
    }
}

fn non_blank(text: Option<&str>) -> Option<&str> {
    text.map(str::trim).filter(|t| !t.is_empty())
}
