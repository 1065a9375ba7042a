//! Durable store backed by Turso.
//!
//! Architecture:
//!   - Database file: .pmr/review.db (configurable)
//!   - WAL mode so readers are not blocked by the single writer
//!   - Schema: recommendations, escalations, protocols, comments
//!   - Every update carries `WHERE id = ? AND revision = ? AND status = ?`, so a
//!     second process writing the same file still loses cleanly
//!
//! Timestamps are stored as fixed-width RFC3339 strings (microseconds, `Z`)
//! so that text ordering matches time ordering.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use pmr_core::{
    Comment, CommentId, CommentParent, DrugEntry, EntityKind, Escalation, EscalationFilter,
    EscalationId, EscalationStatus, EscalationTrigger, NewComment, NewEscalation, NewProtocol,
    NewRecommendation, Protocol, ProtocolId, ProtocolStatus, Recommendation, RecommendationId,
    RecommendationStatus, ReviewError,
};
use std::collections::BTreeSet;
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{debug, instrument};
use turso::{params, Builder, Connection, IntoParams, Value};

use crate::store::{
    check_escalation_swap, check_protocol_swap, check_recommendation_swap, check_successor_link,
    ReviewStore,
};

/// Database errors
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("turso error: {0}")]
    Turso(#[from] turso::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt row: {0}")]
    Parse(String),

    #[error(transparent)]
    Review(#[from] ReviewError),
}

impl From<DbError> for ReviewError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Review(e) => e,
            other => ReviewError::Storage(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

const RECOMMENDATION_COLUMNS: &str = "id, patient_mrn, regimen_hierarchy, drugs, \
     contraindications, status, rejected_reason, previous_recommendation_id, created_by, \
     created_at, updated_at, revision";

const ESCALATION_COLUMNS: &str = "id, recommendation_id, escalated_by, escalated_at, \
     trigger_json, priority, status, reviewer, clarification, resolution, resolved_by, \
     resolved_at, updated_at, revision";

const PROTOCOL_COLUMNS: &str = "id, escalation_id, title, content, version, status, \
     created_by, created_at, updated_at, approved_by, rejected_by, rejected_reason, \
     decided_at, revision";

const COMMENT_COLUMNS: &str =
    "id, parent_type, parent_id, author_id, author_name, content, is_question, created_at";

/// Database connection wrapper for Turso
pub struct Database {
    conn: Mutex<Connection>,
    path: String,
}

impl Database {
    /// Open the database at `path`, creating parent directories as needed.
    ///
    /// Call [`Database::init_schema`] before first use.
    ///
    /// ```no_run
    /// use pmr_storage::Database;
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let db = Database::open(".pmr/review.db").await?;
    /// db.init_schema().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let db = Builder::new_local(&path_str).build().await?;
        let conn = db.connect()?;

        // PRAGMA statements may return rows, so use query()
        let _ = conn.query("PRAGMA journal_mode=WAL", params![]).await?;
        let _ = conn.query("PRAGMA busy_timeout=5000", params![]).await?;

        debug!(path = %path_str, "opened review database");
        Ok(Database {
            conn: Mutex::new(conn),
            path: path_str,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Create tables and indexes. Idempotent.
    pub async fn init_schema(&self) -> Result<()> {
        let statements = [
            r#"CREATE TABLE IF NOT EXISTS recommendations (
                id INTEGER PRIMARY KEY,
                patient_mrn TEXT NOT NULL,
                regimen_hierarchy INTEGER NOT NULL,
                drugs TEXT NOT NULL,
                contraindications TEXT NOT NULL,
                status TEXT NOT NULL,
                rejected_reason TEXT,
                previous_recommendation_id INTEGER,
                created_by TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                revision INTEGER NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS escalations (
                id INTEGER PRIMARY KEY,
                recommendation_id INTEGER NOT NULL,
                escalated_by TEXT NOT NULL,
                escalated_at TEXT NOT NULL,
                trigger_json TEXT NOT NULL,
                priority TEXT NOT NULL,
                priority_rank INTEGER NOT NULL,
                status TEXT NOT NULL,
                reviewer TEXT,
                clarification TEXT,
                resolution TEXT,
                resolved_by TEXT,
                resolved_at TEXT,
                updated_at TEXT NOT NULL,
                revision INTEGER NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS protocols (
                id INTEGER PRIMARY KEY,
                escalation_id INTEGER NOT NULL,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                version INTEGER NOT NULL,
                status TEXT NOT NULL,
                created_by TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                approved_by TEXT,
                rejected_by TEXT,
                rejected_reason TEXT,
                decided_at TEXT,
                revision INTEGER NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS comments (
                id INTEGER PRIMARY KEY,
                parent_type TEXT NOT NULL,
                parent_id INTEGER NOT NULL,
                author_id TEXT NOT NULL,
                author_name TEXT NOT NULL,
                content TEXT NOT NULL,
                is_question INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )"#,
            "CREATE INDEX IF NOT EXISTS idx_recommendations_patient ON recommendations(patient_mrn)",
            "CREATE INDEX IF NOT EXISTS idx_recommendations_previous ON recommendations(previous_recommendation_id)",
            "CREATE INDEX IF NOT EXISTS idx_escalations_recommendation ON escalations(recommendation_id)",
            "CREATE INDEX IF NOT EXISTS idx_escalations_queue ON escalations(status, priority_rank, escalated_at)",
            "CREATE INDEX IF NOT EXISTS idx_protocols_escalation ON protocols(escalation_id)",
            "CREATE INDEX IF NOT EXISTS idx_comments_parent ON comments(parent_type, parent_id, created_at)",
        ];

        let conn = self.conn.lock().await;
        for stmt in statements {
            conn.execute(stmt, params![]).await?;
        }
        Ok(())
    }

    /// Number of rows per table, for `pmr stats`
    pub async fn counts(&self) -> Result<TableCounts> {
        let conn = self.conn.lock().await;
        Ok(TableCounts {
            recommendations: count(&conn, "recommendations").await?,
            escalations: count(&conn, "escalations").await?,
            protocols: count(&conn, "protocols").await?,
            comments: count(&conn, "comments").await?,
        })
    }

    async fn insert_recommendation_row(
        conn: &Connection,
        new: NewRecommendation,
    ) -> Result<Recommendation> {
        let now = Utc::now();
        let rec = Recommendation {
            id: next_id(conn, "recommendations").await?,
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
        };

        let query = format!(
            "INSERT INTO recommendations ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            RECOMMENDATION_COLUMNS
        );
        let values: Vec<Value> = vec![
            rec.id.into(),
            rec.patient_mrn.clone().into(),
            i64::from(rec.regimen_hierarchy).into(),
            serde_json::to_string(&rec.drugs)?.into(),
            serde_json::to_string(&rec.contraindications)?.into(),
            rec.status.as_str().to_string().into(),
            Value::Null,
            opt_int(rec.previous_recommendation_id),
            rec.created_by.clone().into(),
            timestamp(&rec.created_at).into(),
            timestamp(&rec.updated_at).into(),
            1_i64.into(),
        ];
        conn.execute(&query, values).await?;
        Ok(rec)
    }

    /// Predecessor must exist and not have been replaced yet
    async fn check_predecessor(conn: &Connection, new: &NewRecommendation) -> Result<()> {
        if let Some(prev) = new.previous_recommendation_id {
            let predecessor = load_recommendation(conn, prev).await?;
            check_successor_link(&predecessor, new)?;
            if find_successor(conn, prev).await?.is_some() {
                return Err(
                    ReviewError::conflict(EntityKind::Recommendation, prev, predecessor.status)
                        .into(),
                );
            }
        }
        Ok(())
    }

    /// Write `next` over `current` if the stored row still matches it.
    async fn update_recommendation_row(
        conn: &Connection,
        current: &Recommendation,
        mut next: Recommendation,
    ) -> Result<Recommendation> {
        let stored = load_recommendation(conn, current.id).await?;
        check_recommendation_swap(&stored, current, &next)?;

        next.created_by = stored.created_by;
        next.created_at = stored.created_at;
        next.revision = stored.revision + 1;
        next.updated_at = Utc::now();

        let values: Vec<Value> = vec![
            serde_json::to_string(&next.drugs)?.into(),
            serde_json::to_string(&next.contraindications)?.into(),
            next.status.as_str().to_string().into(),
            opt_text(&next.rejected_reason),
            timestamp(&next.updated_at).into(),
            revision(next.revision).into(),
            next.id.into(),
            revision(stored.revision).into(),
            stored.status.as_str().to_string().into(),
        ];
        let changed = conn
            .execute(
                "UPDATE recommendations
                 SET drugs = ?, contraindications = ?, status = ?, rejected_reason = ?,
                     updated_at = ?, revision = ?
                 WHERE id = ? AND revision = ? AND status = ?",
                values,
            )
            .await?;
        if changed == 0 {
            let latest = load_recommendation(conn, current.id).await?;
            return Err(
                ReviewError::conflict(EntityKind::Recommendation, latest.id, latest.status).into(),
            );
        }
        Ok(next)
    }
}

/// Row counts per table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableCounts {
    pub recommendations: i64,
    pub escalations: i64,
    pub protocols: i64,
    pub comments: i64,
}

#[async_trait]
impl ReviewStore for Database {
    #[instrument(skip(self, new), fields(patient = %new.patient_mrn))]
    async fn insert_recommendation(
        &self,
        new: NewRecommendation,
    ) -> pmr_core::Result<Recommendation> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().await.map_err(DbError::from)?;

        Self::check_predecessor(&tx, &new).await?;
        let rec = Self::insert_recommendation_row(&tx, new).await?;

        tx.commit().await.map_err(DbError::from)?;
        debug!(id = rec.id, "inserted recommendation");
        Ok(rec)
    }

    async fn get_recommendation(&self, id: RecommendationId) -> pmr_core::Result<Recommendation> {
        let conn = self.conn.lock().await;
        Ok(load_recommendation(&conn, id).await?)
    }

    async fn recommendations_for_patient(
        &self,
        patient_mrn: &str,
    ) -> pmr_core::Result<Vec<Recommendation>> {
        let conn = self.conn.lock().await;
        let query = format!(
            "SELECT {} FROM recommendations WHERE patient_mrn = ? \
             ORDER BY regimen_hierarchy ASC, id ASC",
            RECOMMENDATION_COLUMNS
        );
        let mut rows = conn
            .query(&query, params![patient_mrn])
            .await
            .map_err(DbError::from)?;

        let mut recs = Vec::new();
        while let Some(row) = rows.next().await.map_err(DbError::from)? {
            recs.push(parse_recommendation_row(&row)?);
        }
        Ok(recs)
    }

    async fn successor_of(
        &self,
        id: RecommendationId,
    ) -> pmr_core::Result<Option<Recommendation>> {
        let conn = self.conn.lock().await;
        load_recommendation(&conn, id).await?;
        Ok(find_successor(&conn, id).await?)
    }

    #[instrument(skip(self, current, next), fields(id = current.id))]
    async fn swap_recommendation(
        &self,
        current: &Recommendation,
        next: Recommendation,
    ) -> pmr_core::Result<Recommendation> {
        let conn = self.conn.lock().await;
        Ok(Self::update_recommendation_row(&conn, current, next).await?)
    }

    #[instrument(skip(self, current, rejected, successor), fields(id = current.id))]
    async fn reject_with_successor(
        &self,
        current: &Recommendation,
        rejected: Recommendation,
        successor: NewRecommendation,
    ) -> pmr_core::Result<(Recommendation, Recommendation)> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().await.map_err(DbError::from)?;

        // Dropping the transaction without commit rolls both writes back
        Self::check_predecessor(&tx, &successor).await?;
        let rejected = Self::update_recommendation_row(&tx, current, rejected).await?;
        let successor = Self::insert_recommendation_row(&tx, successor).await?;

        tx.commit().await.map_err(DbError::from)?;
        debug!(rejected = rejected.id, successor = successor.id, "rejected with successor");
        Ok((rejected, successor))
    }

    #[instrument(skip(self, new), fields(recommendation = new.recommendation_id))]
    async fn insert_escalation(&self, new: NewEscalation) -> pmr_core::Result<Escalation> {
        new.validate()?;
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().await.map_err(DbError::from)?;

        let rec = load_recommendation(&tx, new.recommendation_id).await?;
        if rec.status != RecommendationStatus::Escalated {
            return Err(ReviewError::invalid_transition(
                EntityKind::Recommendation,
                rec.id,
                rec.status,
                "open an escalation for",
            ));
        }

        if let Some(active) = find_active_escalation(&tx, new.recommendation_id).await? {
            return Err(ReviewError::conflict(
                EntityKind::Escalation,
                active.id,
                active.status,
            ));
        }

        let now = Utc::now();
        let escalation = Escalation {
            id: next_id(&tx, "escalations").await?,
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

        let values: Vec<Value> = vec![
            escalation.id.into(),
            escalation.recommendation_id.into(),
            escalation.escalated_by.clone().into(),
            timestamp(&escalation.escalated_at).into(),
            serde_json::to_string(&escalation.trigger)
                .map_err(DbError::from)?
                .into(),
            escalation.priority.as_str().to_string().into(),
            i64::from(escalation.priority.rank()).into(),
            escalation.status.as_str().to_string().into(),
            timestamp(&escalation.updated_at).into(),
        ];
        tx.execute(
            "INSERT INTO escalations (id, recommendation_id, escalated_by, escalated_at,
                 trigger_json, priority, priority_rank, status, updated_at, revision)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 1)",
            values,
        )
        .await
        .map_err(DbError::from)?;

        tx.commit().await.map_err(DbError::from)?;
        Ok(escalation)
    }

    async fn get_escalation(&self, id: EscalationId) -> pmr_core::Result<Escalation> {
        let conn = self.conn.lock().await;
        Ok(load_escalation(&conn, id).await?)
    }

    async fn list_escalations(
        &self,
        filter: &EscalationFilter,
    ) -> pmr_core::Result<Vec<Escalation>> {
        let mut conditions = Vec::new();
        let mut params_vec: Vec<Value> = Vec::new();

        if let Some(status) = filter.status {
            conditions.push("status = ?");
            params_vec.push(status.as_str().to_string().into());
        }
        if let Some(priority) = filter.priority {
            conditions.push("priority = ?");
            params_vec.push(priority.as_str().to_string().into());
        }
        if filter.active_only {
            conditions.push("status IN (?, ?, ?)");
            for status in EscalationStatus::ALL.iter().filter(|s| s.is_active()) {
                params_vec.push(status.as_str().to_string().into());
            }
        }

        let mut query = format!("SELECT {} FROM escalations", ESCALATION_COLUMNS);
        if !conditions.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&conditions.join(" AND "));
        }
        query.push_str(" ORDER BY priority_rank ASC, escalated_at ASC, id ASC");

        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(&query, params_vec)
            .await
            .map_err(DbError::from)?;

        let mut escalations = Vec::new();
        while let Some(row) = rows.next().await.map_err(DbError::from)? {
            escalations.push(parse_escalation_row(&row)?);
        }
        Ok(escalations)
    }

    #[instrument(skip(self, current, next), fields(id = current.id))]
    async fn swap_escalation(
        &self,
        current: &Escalation,
        mut next: Escalation,
    ) -> pmr_core::Result<Escalation> {
        let conn = self.conn.lock().await;
        let stored = load_escalation(&conn, current.id).await?;
        check_escalation_swap(&stored, current, &next)?;

        next.escalated_by = stored.escalated_by;
        next.escalated_at = stored.escalated_at;
        next.revision = stored.revision + 1;
        next.updated_at = Utc::now();

        let values: Vec<Value> = vec![
            serde_json::to_string(&next.trigger)
                .map_err(DbError::from)?
                .into(),
            next.priority.as_str().to_string().into(),
            i64::from(next.priority.rank()).into(),
            next.status.as_str().to_string().into(),
            opt_text(&next.reviewer),
            opt_text(&next.clarification),
            opt_text(&next.resolution),
            opt_text(&next.resolved_by),
            opt_time(&next.resolved_at),
            timestamp(&next.updated_at).into(),
            revision(next.revision).into(),
            next.id.into(),
            revision(stored.revision).into(),
            stored.status.as_str().to_string().into(),
        ];
        let changed = conn
            .execute(
                "UPDATE escalations
                 SET trigger_json = ?, priority = ?, priority_rank = ?, status = ?,
                     reviewer = ?, clarification = ?, resolution = ?, resolved_by = ?,
                     resolved_at = ?, updated_at = ?, revision = ?
                 WHERE id = ? AND revision = ? AND status = ?",
                values,
            )
            .await
            .map_err(DbError::from)?;
        if changed == 0 {
            let latest = load_escalation(&conn, current.id).await?;
            return Err(ReviewError::conflict(
                EntityKind::Escalation,
                latest.id,
                latest.status,
            ));
        }
        Ok(next)
    }

    #[instrument(skip(self, new), fields(escalation = new.escalation_id))]
    async fn insert_protocol(&self, new: NewProtocol) -> pmr_core::Result<Protocol> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().await.map_err(DbError::from)?;

        let escalation = load_escalation(&tx, new.escalation_id).await?;
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
            id: next_id(&tx, "protocols").await?,
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

        let values: Vec<Value> = vec![
            protocol.id.into(),
            protocol.escalation_id.into(),
            protocol.title.clone().into(),
            protocol.content.clone().into(),
            protocol.status.as_str().to_string().into(),
            protocol.created_by.clone().into(),
            timestamp(&protocol.created_at).into(),
            timestamp(&protocol.updated_at).into(),
        ];
        tx.execute(
            "INSERT INTO protocols (id, escalation_id, title, content, version, status,
                 created_by, created_at, updated_at, revision)
             VALUES (?, ?, ?, ?, 1, ?, ?, ?, ?, 1)",
            values,
        )
        .await
        .map_err(DbError::from)?;

        tx.commit().await.map_err(DbError::from)?;
        Ok(protocol)
    }

    async fn get_protocol(&self, id: ProtocolId) -> pmr_core::Result<Protocol> {
        let conn = self.conn.lock().await;
        Ok(load_protocol(&conn, id).await?)
    }

    async fn protocols_for_escalation(
        &self,
        escalation_id: EscalationId,
    ) -> pmr_core::Result<Vec<Protocol>> {
        let conn = self.conn.lock().await;
        load_escalation(&conn, escalation_id).await?;

        let query = format!(
            "SELECT {} FROM protocols WHERE escalation_id = ? ORDER BY id ASC",
            PROTOCOL_COLUMNS
        );
        let mut rows = conn
            .query(&query, params![escalation_id])
            .await
            .map_err(DbError::from)?;

        let mut protocols = Vec::new();
        while let Some(row) = rows.next().await.map_err(DbError::from)? {
            protocols.push(parse_protocol_row(&row)?);
        }
        Ok(protocols)
    }

    #[instrument(skip(self, current, next), fields(id = current.id))]
    async fn swap_protocol(
        &self,
        current: &Protocol,
        mut next: Protocol,
    ) -> pmr_core::Result<Protocol> {
        let conn = self.conn.lock().await;
        let stored = load_protocol(&conn, current.id).await?;
        check_protocol_swap(&stored, current, &next)?;

        next.created_by = stored.created_by;
        next.created_at = stored.created_at;
        next.revision = stored.revision + 1;
        next.updated_at = Utc::now();

        let values: Vec<Value> = vec![
            next.title.clone().into(),
            next.content.clone().into(),
            next.status.as_str().to_string().into(),
            opt_text(&next.approved_by),
            opt_text(&next.rejected_by),
            opt_text(&next.rejected_reason),
            opt_time(&next.decided_at),
            timestamp(&next.updated_at).into(),
            revision(next.revision).into(),
            next.id.into(),
            revision(stored.revision).into(),
            stored.status.as_str().to_string().into(),
        ];
        let changed = conn
            .execute(
                "UPDATE protocols
                 SET title = ?, content = ?, status = ?, approved_by = ?, rejected_by = ?,
                     rejected_reason = ?, decided_at = ?, updated_at = ?, revision = ?
                 WHERE id = ? AND revision = ? AND status = ?",
                values,
            )
            .await
            .map_err(DbError::from)?;
        if changed == 0 {
            let latest = load_protocol(&conn, current.id).await?;
            return Err(ReviewError::conflict(
                EntityKind::Protocol,
                latest.id,
                latest.status,
            ));
        }
        Ok(next)
    }

    async fn insert_comment(&self, new: NewComment) -> pmr_core::Result<Comment> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().await.map_err(DbError::from)?;

        check_parent(&tx, new.parent).await?;
        let comment = Comment {
            id: next_id(&tx, "comments").await?,
            parent: new.parent,
            author_id: new.author_id,
            author_name: new.author_name,
            content: new.content,
            is_question: new.is_question,
            created_at: Utc::now(),
        };

        let query = format!(
            "INSERT INTO comments ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            COMMENT_COLUMNS
        );
        let values: Vec<Value> = vec![
            comment.id.into(),
            comment.parent.type_tag().to_string().into(),
            comment.parent.id().into(),
            comment.author_id.clone().into(),
            comment.author_name.clone().into(),
            comment.content.clone().into(),
            i64::from(comment.is_question).into(),
            timestamp(&comment.created_at).into(),
        ];
        tx.execute(&query, values).await.map_err(DbError::from)?;

        tx.commit().await.map_err(DbError::from)?;
        Ok(comment)
    }

    async fn get_comment(&self, id: CommentId) -> pmr_core::Result<Comment> {
        let conn = self.conn.lock().await;
        let query = format!("SELECT {} FROM comments WHERE id = ?", COMMENT_COLUMNS);
        match first_row(&conn, &query, params![id]).await? {
            Some(row) => Ok(parse_comment_row(&row)?),
            None => Err(ReviewError::not_found(EntityKind::Comment, id)),
        }
    }

    async fn comments_for(&self, parent: CommentParent) -> pmr_core::Result<Vec<Comment>> {
        let conn = self.conn.lock().await;
        check_parent(&conn, parent).await?;

        let query = format!(
            "SELECT {} FROM comments WHERE parent_type = ? AND parent_id = ? \
             ORDER BY created_at ASC, id ASC",
            COMMENT_COLUMNS
        );
        let mut rows = conn
            .query(&query, params![parent.type_tag(), parent.id()])
            .await
            .map_err(DbError::from)?;

        let mut comments = Vec::new();
        while let Some(row) = rows.next().await.map_err(DbError::from)? {
            comments.push(parse_comment_row(&row)?);
        }
        Ok(comments)
    }

    async fn delete_comment(&self, id: CommentId) -> pmr_core::Result<()> {
        let conn = self.conn.lock().await;
        let removed = conn
            .execute("DELETE FROM comments WHERE id = ?", params![id])
            .await
            .map_err(DbError::from)?;
        if removed == 0 {
            return Err(ReviewError::not_found(EntityKind::Comment, id));
        }
        Ok(())
    }
}

// ===== Row helpers =====

/// First row of a query, with the cursor read to the end.
///
/// Inside a transaction a half-read `Rows` ends the transaction when it is
/// dropped, which turns the following writes into autocommits.
async fn first_row(
    conn: &Connection,
    sql: &str,
    values: impl IntoParams,
) -> Result<Option<turso::Row>> {
    let mut rows = conn.query(sql, values).await?;
    let first = rows.next().await?;
    while rows.next().await?.is_some() {}
    Ok(first)
}

async fn count(conn: &Connection, table: &str) -> Result<i64> {
    let query = format!("SELECT COUNT(*) FROM {}", table);
    match first_row(conn, &query, params![]).await? {
        Some(row) => Ok(row.get(0)?),
        None => Ok(0),
    }
}

/// Ids are allocated under the connection lock, so MAX + 1 cannot race
async fn next_id(conn: &Connection, table: &str) -> Result<i64> {
    let query = format!("SELECT COALESCE(MAX(id), 0) + 1 FROM {}", table);
    match first_row(conn, &query, params![]).await? {
        Some(row) => Ok(row.get(0)?),
        None => Ok(1),
    }
}

async fn load_recommendation(conn: &Connection, id: RecommendationId) -> Result<Recommendation> {
    let query = format!(
        "SELECT {} FROM recommendations WHERE id = ?",
        RECOMMENDATION_COLUMNS
    );
    match first_row(conn, &query, params![id]).await? {
        Some(row) => parse_recommendation_row(&row),
        None => Err(ReviewError::not_found(EntityKind::Recommendation, id).into()),
    }
}

async fn find_successor(conn: &Connection, id: RecommendationId) -> Result<Option<Recommendation>> {
    let query = format!(
        "SELECT {} FROM recommendations WHERE previous_recommendation_id = ? LIMIT 1",
        RECOMMENDATION_COLUMNS
    );
    match first_row(conn, &query, params![id]).await? {
        Some(row) => Ok(Some(parse_recommendation_row(&row)?)),
        None => Ok(None),
    }
}

async fn load_escalation(conn: &Connection, id: EscalationId) -> Result<Escalation> {
    let query = format!("SELECT {} FROM escalations WHERE id = ?", ESCALATION_COLUMNS);
    match first_row(conn, &query, params![id]).await? {
        Some(row) => parse_escalation_row(&row),
        None => Err(ReviewError::not_found(EntityKind::Escalation, id).into()),
    }
}

/// Open case for a recommendation, if any
async fn find_active_escalation(
    conn: &Connection,
    recommendation_id: RecommendationId,
) -> Result<Option<Escalation>> {
    let query = format!(
        "SELECT {} FROM escalations WHERE recommendation_id = ? AND status IN (?, ?, ?) LIMIT 1",
        ESCALATION_COLUMNS
    );
    let row = first_row(
        conn,
        &query,
        params![
            recommendation_id,
            EscalationStatus::Pending.as_str(),
            EscalationStatus::InReview.as_str(),
            EscalationStatus::RequiresClarification.as_str()
        ],
    )
    .await?;
    row.map(|row| parse_escalation_row(&row)).transpose()
}

async fn load_protocol(conn: &Connection, id: ProtocolId) -> Result<Protocol> {
    let query = format!("SELECT {} FROM protocols WHERE id = ?", PROTOCOL_COLUMNS);
    match first_row(conn, &query, params![id]).await? {
        Some(row) => parse_protocol_row(&row),
        None => Err(ReviewError::not_found(EntityKind::Protocol, id).into()),
    }
}

async fn check_parent(conn: &Connection, parent: CommentParent) -> Result<()> {
    match parent {
        CommentParent::Recommendation(id) => load_recommendation(conn, id).await.map(|_| ()),
        CommentParent::Protocol(id) => load_protocol(conn, id).await.map(|_| ()),
    }
}

fn parse_recommendation_row(row: &turso::Row) -> Result<Recommendation> {
    let drugs_json: String = row.get(3)?;
    let contraindications_json: String = row.get(4)?;
    let status: String = row.get(5)?;
    let hierarchy: i64 = row.get(2)?;
    let created_at: String = row.get(9)?;
    let updated_at: String = row.get(10)?;
    let rev: i64 = row.get(11)?;

    let drugs: Vec<DrugEntry> = serde_json::from_str(&drugs_json)?;
    let contraindications: BTreeSet<String> = serde_json::from_str(&contraindications_json)?;

    Ok(Recommendation {
        id: row.get(0)?,
        patient_mrn: row.get(1)?,
        regimen_hierarchy: to_u32(hierarchy, "regimen_hierarchy")?,
        drugs,
        contraindications,
        status: parse_status(&status)?,
        rejected_reason: row.get(6)?,
        previous_recommendation_id: row.get(7)?,
        created_by: row.get(8)?,
        created_at: parse_time(&created_at, "created_at")?,
        updated_at: parse_time(&updated_at, "updated_at")?,
        revision: to_u64(rev)?,
    })
}

fn parse_escalation_row(row: &turso::Row) -> Result<Escalation> {
    let escalated_at: String = row.get(3)?;
    let trigger_json: String = row.get(4)?;
    let priority: String = row.get(5)?;
    let status: String = row.get(6)?;
    let resolved_at: Option<String> = row.get(11)?;
    let updated_at: String = row.get(12)?;
    let rev: i64 = row.get(13)?;

    let trigger: EscalationTrigger = serde_json::from_str(&trigger_json)?;

    Ok(Escalation {
        id: row.get(0)?,
        recommendation_id: row.get(1)?,
        escalated_by: row.get(2)?,
        escalated_at: parse_time(&escalated_at, "escalated_at")?,
        trigger,
        priority: parse_status(&priority)?,
        status: parse_status(&status)?,
        reviewer: row.get(7)?,
        clarification: row.get(8)?,
        resolution: row.get(9)?,
        resolved_by: row.get(10)?,
        resolved_at: resolved_at
            .map(|s| parse_time(&s, "resolved_at"))
            .transpose()?,
        updated_at: parse_time(&updated_at, "updated_at")?,
        revision: to_u64(rev)?,
    })
}

fn parse_protocol_row(row: &turso::Row) -> Result<Protocol> {
    let version: i64 = row.get(4)?;
    let status: String = row.get(5)?;
    let created_at: String = row.get(7)?;
    let updated_at: String = row.get(8)?;
    let decided_at: Option<String> = row.get(12)?;
    let rev: i64 = row.get(13)?;

    Ok(Protocol {
        id: row.get(0)?,
        escalation_id: row.get(1)?,
        title: row.get(2)?,
        content: row.get(3)?,
        version: to_u32(version, "version")?,
        status: parse_status(&status)?,
        created_by: row.get(6)?,
        created_at: parse_time(&created_at, "created_at")?,
        updated_at: parse_time(&updated_at, "updated_at")?,
        approved_by: row.get(9)?,
        rejected_by: row.get(10)?,
        rejected_reason: row.get(11)?,
        decided_at: decided_at.map(|s| parse_time(&s, "decided_at")).transpose()?,
        revision: to_u64(rev)?,
    })
}

fn parse_comment_row(row: &turso::Row) -> Result<Comment> {
    let parent_type: String = row.get(1)?;
    let parent_id: i64 = row.get(2)?;
    let is_question: i64 = row.get(6)?;
    let created_at: String = row.get(7)?;

    Ok(Comment {
        id: row.get(0)?,
        parent: CommentParent::from_parts(&parent_type, parent_id)?,
        author_id: row.get(3)?,
        author_name: row.get(4)?,
        content: row.get(5)?,
        is_question: is_question != 0,
        created_at: parse_time(&created_at, "created_at")?,
    })
}

fn parse_status<T>(value: &str) -> Result<T>
where
    T: std::str::FromStr<Err = ReviewError>,
{
    value
        .parse()
        .map_err(|e: ReviewError| DbError::Parse(e.to_string()))
}

fn parse_time(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::Parse(format!("failed to parse {}: {}", field, e)))
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn to_u32(value: i64, field: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| DbError::Parse(format!("{} out of range: {}", field, value)))
}

fn to_u64(value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| DbError::Parse(format!("revision out of range: {}", value)))
}

fn revision(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn opt_text(value: &Option<String>) -> Value {
    match value {
        Some(s) => Value::Text(s.clone()),
        None => Value::Null,
    }
}

fn opt_int(value: Option<i64>) -> Value {
    match value {
        Some(v) => Value::Integer(v),
        None => Value::Null,
    }
}

fn opt_time(value: &Option<DateTime<Utc>>) -> Value {
    match value {
        Some(at) => Value::Text(timestamp(at)),
        None => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamps_sort_lexicographically() {
        let early = DateTime::parse_from_rfc3339("2024-01-01T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let late = DateTime::parse_from_rfc3339("2024-01-01T09:00:00.5Z")
            .unwrap()
            .with_timezone(&Utc);

        let (a, b) = (timestamp(&early), timestamp(&late));
        assert_eq!(a.len(), b.len());
        assert!(a < b);
        assert_eq!(parse_time(&b, "at").unwrap(), late);
    }

    #[test]
    fn test_db_error_maps_to_review_error() {
        let err: ReviewError = DbError::Parse("bad status".to_string()).into();
        assert_eq!(err.kind(), pmr_core::ErrorKind::Storage);

        let conflict = ReviewError::conflict(EntityKind::Escalation, 3, "IN_REVIEW");
        let err: ReviewError = DbError::Review(conflict).into();
        assert_eq!(err.kind(), pmr_core::ErrorKind::Conflict);
    }
}
