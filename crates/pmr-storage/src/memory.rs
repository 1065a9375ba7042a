//! In-process store.
//!
//! Holds every table behind one `RwLock`, so each compare-and-swap runs its
//! check and its write under the same write guard. Used by tests and by
//! embedders that do not need durability.

use async_trait::async_trait;
use chrono::Utc;
use pmr_core::{
    Comment, CommentId, CommentParent, EntityKind, Escalation, EscalationFilter, EscalationId,
    EscalationStatus, NewComment, NewEscalation, NewProtocol, NewRecommendation, Protocol,
    ProtocolId, ProtocolStatus, Recommendation, RecommendationId, RecommendationStatus, Result,
    ReviewError,
};
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::store::{
    check_escalation_swap, check_protocol_swap, check_recommendation_swap, check_successor_link,
    ReviewStore,
};

#[derive(Default)]
struct Tables {
    recommendations: BTreeMap<RecommendationId, Recommendation>,
    escalations: BTreeMap<EscalationId, Escalation>,
    protocols: BTreeMap<ProtocolId, Protocol>,
    comments: BTreeMap<CommentId, Comment>,
    next_recommendation: i64,
    next_escalation: i64,
    next_protocol: i64,
    next_comment: i64,
}

fn allocate(counter: &mut i64) -> i64 {
    *counter += 1;
    *counter
}

impl Tables {
    fn recommendation(&self, id: RecommendationId) -> Result<&Recommendation> {
        self.recommendations
            .get(&id)
            .ok_or_else(|| ReviewError::not_found(EntityKind::Recommendation, id))
    }

    fn escalation(&self, id: EscalationId) -> Result<&Escalation> {
        self.escalations
            .get(&id)
            .ok_or_else(|| ReviewError::not_found(EntityKind::Escalation, id))
    }

    fn protocol(&self, id: ProtocolId) -> Result<&Protocol> {
        self.protocols
            .get(&id)
            .ok_or_else(|| ReviewError::not_found(EntityKind::Protocol, id))
    }

    fn successor_of(&self, id: RecommendationId) -> Option<&Recommendation> {
        self.recommendations
            .values()
            .find(|r| r.previous_recommendation_id == Some(id))
    }

    fn build_recommendation(&mut self, new: NewRecommendation) -> Recommendation {
        let now = Utc::now();
        Recommendation {
            id: allocate(&mut self.next_recommendation),
            patient_mrn: new.patient_mrn,
            regimen_hierarchy: new.regimen_hierarchy,
            drugs: new.drugs,
            contraindications: new.contraindications,
            status: RecommendationStatus::Pending,
            rejected_reason: None,
            previous_recommendation_id: new.previous_recommendation_id,
            created_by: new.created_by,
            created_at: now,
            updated_at: now,
            revision: 1,
        }
    }

    /// Predecessor must exist and not have been replaced yet
    fn check_predecessor(&self, new: &NewRecommendation) -> Result<()> {
        if let Some(prev) = new.previous_recommendation_id {
            let predecessor = self.recommendation(prev)?;
            check_successor_link(predecessor, new)?;
            if self.successor_of(prev).is_some() {
                return Err(ReviewError::conflict(
                    EntityKind::Recommendation,
                    prev,
                    predecessor.status,
                ));
            }
        }
        Ok(())
    }

    fn parent_exists(&self, parent: CommentParent) -> Result<()> {
        match parent {
            CommentParent::Recommendation(id) => self.recommendation(id).map(|_| ()),
            CommentParent::Protocol(id) => self.protocol(id).map(|_| ()),
        }
    }
}

/// Store backed by in-memory maps
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReviewStore for MemoryStore {
    async fn insert_recommendation(&self, new: NewRecommendation) -> Result<Recommendation> {
        let mut tables = self.tables.write().await;
        tables.check_predecessor(&new)?;

        let rec = tables.build_recommendation(new);
        tables.recommendations.insert(rec.id, rec.clone());
        debug!(id = rec.id, "inserted recommendation");
        Ok(rec)
    }

    async fn get_recommendation(&self, id: RecommendationId) -> Result<Recommendation> {
        let tables = self.tables.read().await;
        tables.recommendation(id).cloned()
    }

    async fn recommendations_for_patient(&self, patient_mrn: &str) -> Result<Vec<Recommendation>> {
        let tables = self.tables.read().await;
        let mut recs: Vec<_> = tables
            .recommendations
            .values()
            .filter(|r| r.patient_mrn == patient_mrn)
            .cloned()
            .collect();
        recs.sort_by_key(|r| (r.regimen_hierarchy, r.id));
        Ok(recs)
    }

    async fn successor_of(&self, id: RecommendationId) -> Result<Option<Recommendation>> {
        let tables = self.tables.read().await;
        tables.recommendation(id)?;
        Ok(tables.successor_of(id).cloned())
    }

    async fn swap_recommendation(
        &self,
        current: &Recommendation,
        mut next: Recommendation,
    ) -> Result<Recommendation> {
        let mut tables = self.tables.write().await;
        let stored = tables.recommendation(current.id)?;
        check_recommendation_swap(stored, current, &next)?;

        next.created_by = stored.created_by.clone();
        next.created_at = stored.created_at;
        next.revision = stored.revision + 1;
        next.updated_at = Utc::now();
        tables.recommendations.insert(next.id, next.clone());
        Ok(next)
    }

    async fn reject_with_successor(
        &self,
        current: &Recommendation,
        mut rejected: Recommendation,
        successor: NewRecommendation,
    ) -> Result<(Recommendation, Recommendation)> {
        let mut tables = self.tables.write().await;
        let stored = tables.recommendation(current.id)?;
        check_recommendation_swap(stored, current, &rejected)?;
        check_successor_link(stored, &successor)?;
        if tables.successor_of(current.id).is_some() {
            return Err(ReviewError::conflict(
                EntityKind::Recommendation,
                stored.id,
                stored.status,
            ));
        }

        let now = Utc::now();
        rejected.created_by = stored.created_by.clone();
        rejected.created_at = stored.created_at;
        rejected.revision = stored.revision + 1;
        rejected.updated_at = now;

        let successor = tables.build_recommendation(successor);
        tables.recommendations.insert(rejected.id, rejected.clone());
        tables.recommendations.insert(successor.id, successor.clone());
        debug!(rejected = rejected.id, successor = successor.id, "rejected with successor");
        Ok((rejected, successor))
    }

    async fn insert_escalation(&self, new: NewEscalation) -> Result<Escalation> {
        new.validate()?;
        let mut tables = self.tables.write().await;

        let rec = tables.recommendation(new.recommendation_id)?;
        if rec.status != RecommendationStatus::Escalated {
            return Err(ReviewError::invalid_transition(
                EntityKind::Recommendation,
                rec.id,
                rec.status,
                "open an escalation for",
            ));
        }
        if let Some(active) = tables
            .escalations
            .values()
            .find(|e| e.recommendation_id == new.recommendation_id && e.status.is_active())
        {
            return Err(ReviewError::conflict(
                EntityKind::Escalation,
                active.id,
                active.status,
            ));
        }

        let now = Utc::now();
        let escalation = Escalation {
            id: allocate(&mut tables.next_escalation),
            recommendation_id: new.recommendation_id,
            escalated_by: new.escalated_by,
            escalated_at: now,
            trigger: new.trigger,
            priority: new.priority,
            status: EscalationStatus::Pending,
            reviewer: None,
            clarification: None,
            resolution: None,
            resolved_by: None,
            resolved_at: None,
            updated_at: now,
            revision: 1,
        };
        tables.escalations.insert(escalation.id, escalation.clone());
        Ok(escalation)
    }

    async fn get_escalation(&self, id: EscalationId) -> Result<Escalation> {
        let tables = self.tables.read().await;
        tables.escalation(id).cloned()
    }

    async fn list_escalations(&self, filter: &EscalationFilter) -> Result<Vec<Escalation>> {
        let tables = self.tables.read().await;
        let mut escalations: Vec<_> = tables
            .escalations
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        escalations.sort_by(|a, b| {
            a.priority
                .rank()
                .cmp(&b.priority.rank())
                .then(a.escalated_at.cmp(&b.escalated_at))
                .then(a.id.cmp(&b.id))
        });
        Ok(escalations)
    }

    async fn swap_escalation(&self, current: &Escalation, mut next: Escalation) -> Result<Escalation> {
        let mut tables = self.tables.write().await;
        let stored = tables.escalation(current.id)?;
        check_escalation_swap(stored, current, &next)?;

        next.escalated_by = stored.escalated_by.clone();
        next.escalated_at = stored.escalated_at;
        next.revision = stored.revision + 1;
        next.updated_at = Utc::now();
        tables.escalations.insert(next.id, next.clone());
        Ok(next)
    }

    async fn insert_protocol(&self, new: NewProtocol) -> Result<Protocol> {
        let mut tables = self.tables.write().await;
        let escalation = tables.escalation(new.escalation_id)?;
        if escalation.status.is_terminal() {
            return Err(ReviewError::invalid_transition(
                EntityKind::Escalation,
                escalation.id,
                escalation.status,
                "draft a protocol for",
            ));
        }

        let now = Utc::now();
        let protocol = Protocol {
            id: allocate(&mut tables.next_protocol),
            escalation_id: new.escalation_id,
            title: new.title,
            content: new.content,
            version: 1,
            status: ProtocolStatus::Draft,
            created_by: new.created_by,
            created_at: now,
            updated_at: now,
            approved_by: None,
            rejected_by: None,
            rejected_reason: None,
            decided_at: None,
            revision: 1,
        };
        tables.protocols.insert(protocol.id, protocol.clone());
        Ok(protocol)
    }

    async fn get_protocol(&self, id: ProtocolId) -> Result<Protocol> {
        let tables = self.tables.read().await;
        tables.protocol(id).cloned()
    }

    async fn protocols_for_escalation(
        &self,
        escalation_id: EscalationId,
    ) -> Result<Vec<Protocol>> {
        let tables = self.tables.read().await;
        tables.escalation(escalation_id)?;
        Ok(tables
            .protocols
            .values()
            .filter(|p| p.escalation_id == escalation_id)
            .cloned()
            .collect())
    }

    async fn swap_protocol(&self, current: &Protocol, mut next: Protocol) -> Result<Protocol> {
        let mut tables = self.tables.write().await;
        let stored = tables.protocol(current.id)?;
        check_protocol_swap(stored, current, &next)?;

        next.created_by = stored.created_by.clone();
        next.created_at = stored.created_at;
        next.revision = stored.revision + 1;
        next.updated_at = Utc::now();
        tables.protocols.insert(next.id, next.clone());
        Ok(next)
    }

    async fn insert_comment(&self, new: NewComment) -> Result<Comment> {
        let mut tables = self.tables.write().await;
        tables.parent_exists(new.parent)?;

        let comment = Comment {
            id: allocate(&mut tables.next_comment),
            parent: new.parent,
            author_id: new.author_id,
            author_name: new.author_name,
            content: new.content,
            is_question: new.is_question,
            created_at: Utc::now(),
        };
        tables.comments.insert(comment.id, comment.clone());
        Ok(comment)
    }

    async fn get_comment(&self, id: CommentId) -> Result<Comment> {
        let tables = self.tables.read().await;
        tables
            .comments
            .get(&id)
            .cloned()
            .ok_or_else(|| ReviewError::not_found(EntityKind::Comment, id))
    }

    async fn comments_for(&self, parent: CommentParent) -> Result<Vec<Comment>> {
        let tables = self.tables.read().await;
        tables.parent_exists(parent)?;
        let mut comments: Vec<_> = tables
            .comments
            .values()
            .filter(|c| c.parent == parent)
            .cloned()
            .collect();
        comments.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(comments)
    }

    async fn delete_comment(&self, id: CommentId) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables
            .comments
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| ReviewError::not_found(EntityKind::Comment, id))
    }
}
