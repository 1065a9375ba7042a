//! End-to-end review flows.
//!
//! [`ReviewCoordinator`] composes the managers into the two decisions an
//! anesthesiologist makes on an escalation:
//!
//! - approve-with-edit: update → approve → resolve(approved)
//! - reject-and-replace: reject (spawns successor) → resolve(not approved)
//!
//! Steps commit one by one. An interrupted flow leaves the completed steps in
//! place and re-running it picks up where it stopped: each step first checks
//! whether the store already reflects it. Every store-bound step runs under
//! the configured request timeout; nothing is retried here.

use pmr_core::schema::{require_text, validate_drugs};
use pmr_core::transitions::escalation_transition;
use pmr_core::{
    content_hash, Actor, Comment, CommentId, CommentParent, DrugEntry, EntityKind, Escalation,
    EscalationEvent, EscalationFilter, EscalationId, EscalationPriority, EscalationStats,
    EscalationStatus, EscalationTrigger, Limits, Protocol, ProtocolId, Recommendation,
    RecommendationId, RecommendationStatus, Result, ReviewConfig, ReviewError,
};
use pmr_storage::ReviewStore;
use serde::Serialize;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::audit::AuditSink;
use crate::comments::CommentThread;
use crate::escalation::EscalationManager;
use crate::patient::PatientDirectory;
use crate::protocol::ProtocolManager;
use crate::recommendation::{Rejection, RecommendationManager};

/// A step of a multi-step flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStep {
    Update,
    Approve,
    Reject,
    Resolve,
}

/// The reviewer's edit for approve-with-edit
#[derive(Debug, Clone, Default)]
pub struct ApprovalEdit {
    pub drugs: Vec<DrugEntry>,
    pub contraindications: BTreeSet<String>,
    pub comment: Option<String>,
    pub resolution: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApprovalOutcome {
    pub recommendation: Recommendation,
    pub escalation: Escalation,
    /// Steps that ran in this call; skipped steps were already committed
    pub completed: Vec<FlowStep>,
}

#[derive(Debug, Clone, Default)]
pub struct RejectionRequest {
    pub reason: String,
    pub comment: Option<String>,
    pub resolution: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RejectionOutcome {
    pub rejected: Recommendation,
    pub successor: Recommendation,
    pub escalation: Escalation,
    pub completed: Vec<FlowStep>,
}

/// Everything a reviewer looks at when opening a case
#[derive(Debug, Clone, Serialize)]
pub struct EscalationDetail {
    pub escalation: Escalation,
    pub recommendation: Recommendation,
    pub protocols: Vec<Protocol>,
    pub comments: Vec<Comment>,
}

pub struct ReviewCoordinator {
    recommendations: RecommendationManager,
    escalations: EscalationManager,
    protocols: ProtocolManager,
    comments: CommentThread,
    limits: Limits,
    timeout: Duration,
}

impl ReviewCoordinator {
    pub fn new(
        store: Arc<dyn ReviewStore>,
        audit: Arc<dyn AuditSink>,
        config: &ReviewConfig,
    ) -> Self {
        let limits = config.limits;
        let comments = CommentThread::new(store.clone(), audit.clone(), limits);
        Self {
            recommendations: RecommendationManager::new(
                store.clone(),
                audit.clone(),
                comments.clone(),
                limits,
            ),
            escalations: EscalationManager::new(store.clone(), audit.clone(), limits),
            protocols: ProtocolManager::new(store, audit, limits),
            comments,
            limits,
            timeout: config.request_timeout(),
        }
    }

    pub fn with_patient_directory(mut self, directory: Arc<dyn PatientDirectory>) -> Self {
        self.recommendations = self.recommendations.with_patient_directory(directory);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run one store-bound step under the request timeout
    async fn bounded<T, F>(&self, step: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.timeout, step).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout = ?self.timeout, "store request timed out");
                Err(ReviewError::Timeout(self.timeout))
            }
        }
    }

    // ===== Recommendations =====

    pub async fn create_recommendation(
        &self,
        patient_mrn: &str,
        drugs: Vec<DrugEntry>,
        contraindications: BTreeSet<String>,
        actor: &Actor,
    ) -> Result<Recommendation> {
        self.bounded(
            self.recommendations
                .create(patient_mrn, drugs, contraindications, actor),
        )
        .await
    }

    pub async fn recommendation(&self, id: RecommendationId) -> Result<Recommendation> {
        self.bounded(self.recommendations.fetch(id)).await
    }

    pub async fn patient_history(&self, patient_mrn: &str) -> Result<Vec<Recommendation>> {
        self.bounded(self.recommendations.history(patient_mrn)).await
    }

    pub async fn successor(&self, id: RecommendationId) -> Result<Option<Recommendation>> {
        self.bounded(self.recommendations.successor(id)).await
    }

    pub async fn escalate(&self, id: RecommendationId, actor: &Actor) -> Result<Recommendation> {
        self.bounded(self.recommendations.escalate(id, actor)).await
    }

    pub async fn update_recommendation(
        &self,
        id: RecommendationId,
        drugs: Vec<DrugEntry>,
        contraindications: BTreeSet<String>,
        actor: &Actor,
    ) -> Result<Recommendation> {
        self.bounded(
            self.recommendations
                .update(id, drugs, contraindications, actor),
        )
        .await
    }

    pub async fn approve_recommendation(
        &self,
        id: RecommendationId,
        comment: Option<&str>,
        actor: &Actor,
    ) -> Result<Recommendation> {
        self.bounded(self.recommendations.approve(id, comment, actor))
            .await
    }

    pub async fn reject_recommendation(
        &self,
        id: RecommendationId,
        reason: &str,
        comment: Option<&str>,
        actor: &Actor,
    ) -> Result<Rejection> {
        self.bounded(self.recommendations.reject(id, reason, comment, actor))
            .await
    }

    /// Escalate a recommendation and open its review case.
    ///
    /// Safe to re-run: an already ESCALATED recommendation skips straight to
    /// opening, and the store refuses a second active case with `Conflict`.
    #[instrument(skip(self, actor), fields(actor = %actor.id))]
    pub async fn escalate_recommendation(
        &self,
        id: RecommendationId,
        actor: &Actor,
        trigger: EscalationTrigger,
        priority: Option<EscalationPriority>,
    ) -> Result<(Recommendation, Escalation)> {
        let mut rec = self.bounded(self.recommendations.fetch(id)).await?;
        if rec.status != RecommendationStatus::Escalated {
            rec = self.bounded(self.recommendations.escalate(id, actor)).await?;
        }
        let escalation = self
            .bounded(self.escalations.open(id, actor, trigger, priority))
            .await?;
        Ok((rec, escalation))
    }

    // ===== Escalations =====

    pub async fn escalation(&self, id: EscalationId) -> Result<Escalation> {
        self.bounded(self.escalations.fetch(id)).await
    }

    pub async fn list_escalations(&self, filter: &EscalationFilter) -> Result<Vec<Escalation>> {
        self.bounded(self.escalations.list(filter)).await
    }

    pub async fn escalation_stats(&self) -> Result<EscalationStats> {
        self.bounded(self.escalations.stats()).await
    }

    pub async fn take(&self, id: EscalationId, actor: &Actor) -> Result<Escalation> {
        self.bounded(self.escalations.take(id, actor)).await
    }

    /// Ask the escalating doctor a question; it is also posted on the
    /// recommendation's thread.
    #[instrument(skip(self, question, actor), fields(actor = %actor.id))]
    pub async fn ask_question(
        &self,
        id: EscalationId,
        question: &str,
        actor: &Actor,
    ) -> Result<Escalation> {
        let escalation = self
            .bounded(self.escalations.ask_question(id, question, actor))
            .await?;
        let parent = CommentParent::Recommendation(escalation.recommendation_id);
        self.bounded(self.comments.add(parent, actor, question, true))
            .await?;
        Ok(escalation)
    }

    /// Record the doctor's answer and put the case back in review
    #[instrument(skip(self, answer, actor), fields(actor = %actor.id))]
    pub async fn answer_question(
        &self,
        id: EscalationId,
        answer: &str,
        actor: &Actor,
    ) -> Result<Escalation> {
        require_text("answer", answer, &self.limits)?;
        let escalation = self
            .bounded(self.escalations.answer_question(id, actor))
            .await?;
        let parent = CommentParent::Recommendation(escalation.recommendation_id);
        self.bounded(self.comments.add(parent, actor, answer, false))
            .await?;
        Ok(escalation)
    }

    pub async fn resolve(
        &self,
        id: EscalationId,
        resolution: &str,
        approved: bool,
        actor: &Actor,
    ) -> Result<Escalation> {
        self.bounded(self.escalations.resolve(id, resolution, approved, actor))
            .await
    }

    /// Escalation with its recommendation, protocols and the
    /// recommendation's comment thread
    pub async fn escalation_detail(&self, id: EscalationId) -> Result<EscalationDetail> {
        let escalation = self.bounded(self.escalations.fetch(id)).await?;
        let recommendation = self
            .bounded(self.recommendations.fetch(escalation.recommendation_id))
            .await?;
        let protocols = self
            .bounded(self.protocols.list_by_escalation(id))
            .await?;
        let comments = self
            .bounded(
                self.comments
                    .list_by_parent(CommentParent::Recommendation(recommendation.id)),
            )
            .await?
            .collect();
        Ok(EscalationDetail {
            escalation,
            recommendation,
            protocols,
            comments,
        })
    }

    // ===== Decisions =====

    /// Apply the reviewer's edit, approve the recommendation and resolve the
    /// escalation as approved.
    ///
    /// Re-running after an interruption skips the update when the stored
    /// drugs and contraindications already match the edit, and skips the
    /// approval when the recommendation is already APPROVED. A recommendation
    /// that left ESCALATED with a different regimen is a `Conflict`.
    #[instrument(skip(self, edit, actor), fields(actor = %actor.id))]
    pub async fn approve_with_edit(
        &self,
        escalation_id: EscalationId,
        edit: ApprovalEdit,
        actor: &Actor,
    ) -> Result<ApprovalOutcome> {
        require_text("resolution", &edit.resolution, &self.limits)?;
        validate_drugs(&edit.drugs, &self.limits)?;

        let mut escalation = self.bounded(self.escalations.fetch(escalation_id)).await?;
        let already_resolved = escalation.status == EscalationStatus::Resolved;
        if !already_resolved {
            // Refuse up front rather than after the recommendation is approved
            escalation_transition(
                escalation_id,
                escalation.status,
                EscalationEvent::Resolve { approved: true },
            )?;
        }

        let mut completed = Vec::new();
        let mut rec = self
            .bounded(self.recommendations.fetch(escalation.recommendation_id))
            .await?;

        let wanted = content_hash(&edit.drugs, &edit.contraindications);
        if rec.status != RecommendationStatus::Escalated && rec.content_hash() != wanted {
            // Decided elsewhere with a different regimen; the edit can no longer land
            return Err(ReviewError::conflict(
                EntityKind::Recommendation,
                rec.id,
                rec.status,
            ));
        }
        if rec.content_hash() != wanted {
            rec = self
                .bounded(self.recommendations.update(
                    rec.id,
                    edit.drugs,
                    edit.contraindications,
                    actor,
                ))
                .await?;
            completed.push(FlowStep::Update);
        } else {
            debug!(id = rec.id, "edit already applied");
        }

        if rec.status != RecommendationStatus::Approved {
            rec = self
                .bounded(
                    self.recommendations
                        .approve(rec.id, edit.comment.as_deref(), actor),
                )
                .await?;
            completed.push(FlowStep::Approve);
        }

        if !already_resolved {
            escalation = self
                .bounded(
                    self.escalations
                        .resolve(escalation_id, &edit.resolution, true, actor),
                )
                .await?;
            completed.push(FlowStep::Resolve);
        }

        info!(
            escalation_id,
            recommendation = rec.id,
            steps = completed.len(),
            "approve-with-edit complete"
        );
        Ok(ApprovalOutcome {
            recommendation: rec,
            escalation,
            completed,
        })
    }

    /// Reject the recommendation (spawning its successor) and cancel the
    /// escalation. Re-running after an interruption reuses the successor
    /// created by the first run.
    #[instrument(skip(self, request, actor), fields(actor = %actor.id))]
    pub async fn reject_and_replace(
        &self,
        escalation_id: EscalationId,
        request: RejectionRequest,
        actor: &Actor,
    ) -> Result<RejectionOutcome> {
        require_text("rejection reason", &request.reason, &self.limits)?;
        require_text("resolution", &request.resolution, &self.limits)?;

        let mut escalation = self.bounded(self.escalations.fetch(escalation_id)).await?;
        let already_cancelled = escalation.status == EscalationStatus::Cancelled;
        if !already_cancelled {
            escalation_transition(
                escalation_id,
                escalation.status,
                EscalationEvent::Resolve { approved: false },
            )?;
        }

        let mut completed = Vec::new();
        let rec = self
            .bounded(self.recommendations.fetch(escalation.recommendation_id))
            .await?;

        let (rejected, successor) = if rec.status == RecommendationStatus::Rejected {
            let successor = self
                .bounded(self.recommendations.successor(rec.id))
                .await?
                .ok_or_else(|| {
                    ReviewError::Storage(format!(
                        "recommendation {} is REJECTED but has no successor",
                        rec.id
                    ))
                })?;
            debug!(id = rec.id, successor = successor.id, "rejection already applied");
            (rec, successor)
        } else {
            let rejection = self
                .bounded(self.recommendations.reject(
                    rec.id,
                    &request.reason,
                    request.comment.as_deref(),
                    actor,
                ))
                .await?;
            completed.push(FlowStep::Reject);
            (rejection.rejected, rejection.successor)
        };

        if !already_cancelled {
            escalation = self
                .bounded(
                    self.escalations
                        .resolve(escalation_id, &request.resolution, false, actor),
                )
                .await?;
            completed.push(FlowStep::Resolve);
        }

        info!(
            escalation_id,
            rejected = rejected.id,
            successor = successor.id,
            "reject-and-replace complete"
        );
        Ok(RejectionOutcome {
            rejected,
            successor,
            escalation,
            completed,
        })
    }

    // ===== Protocols =====

    pub async fn draft_protocol(
        &self,
        escalation_id: EscalationId,
        title: &str,
        content: &str,
        actor: &Actor,
    ) -> Result<Protocol> {
        self.bounded(self.protocols.create(escalation_id, title, content, actor))
            .await
    }

    pub async fn edit_protocol(
        &self,
        id: ProtocolId,
        title: &str,
        content: &str,
        actor: &Actor,
    ) -> Result<Protocol> {
        self.bounded(self.protocols.edit(id, title, content, actor))
            .await
    }

    pub async fn approve_protocol(&self, id: ProtocolId, actor: &Actor) -> Result<Protocol> {
        self.bounded(self.protocols.approve(id, actor)).await
    }

    pub async fn reject_protocol(
        &self,
        id: ProtocolId,
        reason: &str,
        actor: &Actor,
    ) -> Result<Protocol> {
        self.bounded(self.protocols.reject(id, reason, actor)).await
    }

    pub async fn protocol(&self, id: ProtocolId) -> Result<Protocol> {
        self.bounded(self.protocols.fetch(id)).await
    }

    pub async fn protocols_for(&self, escalation_id: EscalationId) -> Result<Vec<Protocol>> {
        self.bounded(self.protocols.list_by_escalation(escalation_id))
            .await
    }

    // ===== Comments =====

    pub async fn add_comment(
        &self,
        parent: CommentParent,
        content: &str,
        is_question: bool,
        actor: &Actor,
    ) -> Result<Comment> {
        self.bounded(self.comments.add(parent, actor, content, is_question))
            .await
    }

    pub async fn comments(&self, parent: CommentParent) -> Result<Vec<Comment>> {
        Ok(self
            .bounded(self.comments.list_by_parent(parent))
            .await?
            .collect())
    }

    pub async fn delete_comment(&self, id: CommentId, requester: &Actor) -> Result<()> {
        self.bounded(self.comments.delete(id, requester)).await
    }
}
