//! The authoritative store contract.
//!
//! Every state-changing method is a compare-and-swap: the caller passes the
//! entity as it last read it (`current`) together with the desired next
//! value, and the store applies the write only if the stored row still has
//! the same revision and status. Otherwise it returns `Conflict` carrying the
//! stored status, or `NotFound`. The store assigns ids, timestamps and
//! revisions; the values callers put in those fields are ignored.
//!
//! Referential links are checked at write time:
//! - an escalation needs an ESCALATED recommendation with no other active
//!   escalation
//! - a protocol needs an existing, non-terminal escalation
//! - a comment needs an existing parent
//! - a successor needs a predecessor with no successor yet

use async_trait::async_trait;
use pmr_core::{
    Comment, CommentId, CommentParent, EntityKind, Escalation, EscalationFilter, EscalationId,
    NewComment, NewEscalation, NewProtocol, NewRecommendation, Protocol, ProtocolId,
    Recommendation, RecommendationId, Result, ReviewError,
};

#[async_trait]
pub trait ReviewStore: Send + Sync {
    // ===== Recommendations =====

    /// Insert a PENDING recommendation at revision 1
    async fn insert_recommendation(&self, new: NewRecommendation) -> Result<Recommendation>;

    async fn get_recommendation(&self, id: RecommendationId) -> Result<Recommendation>;

    /// All recommendations for a patient, by regimen hierarchy then id
    async fn recommendations_for_patient(&self, patient_mrn: &str) -> Result<Vec<Recommendation>>;

    /// The recommendation that replaced `id`, if any
    async fn successor_of(&self, id: RecommendationId) -> Result<Option<Recommendation>>;

    async fn swap_recommendation(
        &self,
        current: &Recommendation,
        next: Recommendation,
    ) -> Result<Recommendation>;

    /// Atomically write `rejected` (compare-and-swap against `current`) and
    /// insert `successor`. Neither write happens if either check fails.
    async fn reject_with_successor(
        &self,
        current: &Recommendation,
        rejected: Recommendation,
        successor: NewRecommendation,
    ) -> Result<(Recommendation, Recommendation)>;

    // ===== Escalations =====

    async fn insert_escalation(&self, new: NewEscalation) -> Result<Escalation>;

    async fn get_escalation(&self, id: EscalationId) -> Result<Escalation>;

    /// Escalations matching `filter`, CRITICAL first, then oldest first
    async fn list_escalations(&self, filter: &EscalationFilter) -> Result<Vec<Escalation>>;

    async fn swap_escalation(&self, current: &Escalation, next: Escalation) -> Result<Escalation>;

    // ===== Protocols =====

    async fn insert_protocol(&self, new: NewProtocol) -> Result<Protocol>;

    async fn get_protocol(&self, id: ProtocolId) -> Result<Protocol>;

    /// Protocols of one escalation in creation order
    async fn protocols_for_escalation(&self, escalation_id: EscalationId)
        -> Result<Vec<Protocol>>;

    async fn swap_protocol(&self, current: &Protocol, next: Protocol) -> Result<Protocol>;

    // ===== Comments =====

    async fn insert_comment(&self, new: NewComment) -> Result<Comment>;

    async fn get_comment(&self, id: CommentId) -> Result<Comment>;

    /// Comments on one parent, by creation time then insertion order
    async fn comments_for(&self, parent: CommentParent) -> Result<Vec<Comment>>;

    /// Remove a comment. Unknown ids are `NotFound`.
    async fn delete_comment(&self, id: CommentId) -> Result<()>;
}

/// Rejects swaps that try to change write-once recommendation fields.
pub(crate) fn check_recommendation_swap(
    stored: &Recommendation,
    current: &Recommendation,
    next: &Recommendation,
) -> Result<()> {
    check_ids(EntityKind::Recommendation, current.id, next.id)?;
    if stored.revision != current.revision || stored.status != current.status {
        return Err(ReviewError::conflict(
            EntityKind::Recommendation,
            stored.id,
            stored.status,
        ));
    }
    if next.patient_mrn != stored.patient_mrn
        || next.regimen_hierarchy != stored.regimen_hierarchy
        || next.previous_recommendation_id != stored.previous_recommendation_id
    {
        return Err(ReviewError::Validation(format!(
            "recommendation {}: patient, regimen hierarchy and predecessor are immutable",
            stored.id
        )));
    }
    Ok(())
}

pub(crate) fn check_escalation_swap(
    stored: &Escalation,
    current: &Escalation,
    next: &Escalation,
) -> Result<()> {
    check_ids(EntityKind::Escalation, current.id, next.id)?;
    if stored.revision != current.revision || stored.status != current.status {
        return Err(ReviewError::conflict(
            EntityKind::Escalation,
            stored.id,
            stored.status,
        ));
    }
    if next.recommendation_id != stored.recommendation_id {
        return Err(ReviewError::Validation(format!(
            "escalation {}: recommendation link is immutable",
            stored.id
        )));
    }
    Ok(())
}

pub(crate) fn check_protocol_swap(
    stored: &Protocol,
    current: &Protocol,
    next: &Protocol,
) -> Result<()> {
    check_ids(EntityKind::Protocol, current.id, next.id)?;
    if stored.revision != current.revision || stored.status != current.status {
        return Err(ReviewError::conflict(
            EntityKind::Protocol,
            stored.id,
            stored.status,
        ));
    }
    if next.escalation_id != stored.escalation_id || next.version != stored.version {
        return Err(ReviewError::Validation(format!(
            "protocol {}: escalation link and version are immutable",
            stored.id
        )));
    }
    Ok(())
}

/// A successor must point at `predecessor` and sit exactly one level deeper.
pub(crate) fn check_successor_link(
    predecessor: &Recommendation,
    successor: &NewRecommendation,
) -> Result<()> {
    if successor.previous_recommendation_id != Some(predecessor.id)
        || successor.regimen_hierarchy != predecessor.regimen_hierarchy + 1
        || successor.patient_mrn != predecessor.patient_mrn
    {
        return Err(ReviewError::Validation(format!(
            "successor of recommendation {} must reference it, share its patient and use regimen hierarchy {}",
            predecessor.id,
            predecessor.regimen_hierarchy + 1
        )));
    }
    Ok(())
}

fn check_ids(entity: EntityKind, current: i64, next: i64) -> Result<()> {
    if current != next {
        return Err(ReviewError::Validation(format!(
            "cannot swap {} {} with {} {}",
            entity, current, entity, next
        )));
    }
    Ok(())
}
