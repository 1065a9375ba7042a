//! Comment threads on recommendations and protocols.

use pmr_core::{
    AuditAction, AuditEvent, Actor, Comment, CommentId, CommentParent, EntityKind, Limits,
    NewComment, Result, ReviewError,
};
use pmr_storage::ReviewStore;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::audit::AuditSink;

/// Append-mostly notes attached to one parent entity
#[derive(Clone)]
pub struct CommentThread {
    store: Arc<dyn ReviewStore>,
    audit: Arc<dyn AuditSink>,
    limits: Limits,
}

impl CommentThread {
    pub fn new(store: Arc<dyn ReviewStore>, audit: Arc<dyn AuditSink>, limits: Limits) -> Self {
        Self {
            store,
            audit,
            limits,
        }
    }

    #[instrument(skip(self, author, content), fields(author = %author.id))]
    pub async fn add(
        &self,
        parent: CommentParent,
        author: &Actor,
        content: &str,
        is_question: bool,
    ) -> Result<Comment> {
        let new = NewComment {
            parent,
            author_id: author.id.clone(),
            author_name: author.name.clone(),
            content: content.trim().to_string(),
            is_question,
        };
        new.validate(&self.limits)?;

        let comment = self.store.insert_comment(new).await?;
        self.audit.record(AuditEvent::new(
            EntityKind::Comment,
            comment.id,
            AuditAction::CommentAdded,
            author,
        ));
        debug!(id = comment.id, "comment added");
        Ok(comment)
    }

    /// Comments on `parent`, oldest first. The iterator is consumed once.
    pub async fn list_by_parent(&self, parent: CommentParent) -> Result<CommentIter> {
        let comments = self.store.comments_for(parent).await?;
        Ok(CommentIter {
            inner: comments.into_iter(),
        })
    }

    /// Only the author, or an elevated actor, may delete a comment.
    #[instrument(skip(self, requester), fields(requester = %requester.id))]
    pub async fn delete(&self, id: CommentId, requester: &Actor) -> Result<()> {
        let comment = self.store.get_comment(id).await?;
        if comment.author_id != requester.id && !requester.elevated {
            return Err(ReviewError::PermissionDenied(format!(
                "{} cannot delete comment {} written by {}",
                requester.id, id, comment.author_id
            )));
        }

        self.store.delete_comment(id).await?;
        self.audit.record(AuditEvent::new(
            EntityKind::Comment,
            id,
            AuditAction::CommentDeleted,
            requester,
        ));
        Ok(())
    }
}

/// Finite iterator over one thread
#[derive(Debug)]
pub struct CommentIter {
    inner: std::vec::IntoIter<Comment>,
}

impl Iterator for CommentIter {
    type Item = Comment;

    fn next(&mut self) -> Option<Comment> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for CommentIter {}
