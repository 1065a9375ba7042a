//! Core data structures for the review workflow.
//!
//! This module defines the entities exchanged between the lifecycle managers
//! and the store: Recommendations, Escalations, Protocols and Comments, along
//! with their closed status enums.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::{ReviewError, Result};

pub type RecommendationId = i64;
pub type EscalationId = i64;
pub type ProtocolId = i64;
pub type CommentId = i64;

/// Which kind of entity an error or audit event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Recommendation,
    Escalation,
    Protocol,
    Comment,
    Patient,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Recommendation => write!(f, "recommendation"),
            EntityKind::Escalation => write!(f, "escalation"),
            EntityKind::Protocol => write!(f, "protocol"),
            EntityKind::Comment => write!(f, "comment"),
            EntityKind::Patient => write!(f, "patient"),
        }
    }
}

// ===== Actor =====

/// The person (or system) performing an operation.
///
/// Identity is always passed explicitly; nothing in the core reads the current
/// user from ambient state. `elevated` is the only authorization input the core
/// consumes, and it is decided by the session layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub elevated: bool,
}

impl Actor {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            elevated: false,
        }
    }

    pub fn elevated(mut self, elevated: bool) -> Self {
        self.elevated = elevated;
        self
    }
}

// ===== Recommendations =====

/// Role of a drug within a regimen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DrugRole {
    Main,
    Alternative,
}

impl DrugRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            DrugRole::Main => "MAIN",
            DrugRole::Alternative => "ALTERNATIVE",
        }
    }
}

impl fmt::Display for DrugRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DrugRole {
    type Err = ReviewError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MAIN" => Ok(DrugRole::Main),
            "ALTERNATIVE" | "ALT" => Ok(DrugRole::Alternative),
            other => Err(ReviewError::Validation(format!("unknown drug role: {}", other))),
        }
    }
}

/// A single drug line of a recommendation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrugEntry {
    pub name: String,
    pub active_moiety: String,
    pub dosing: String,
    pub interval: String,
    pub route: String,
    pub role: DrugRole,
}

impl DrugEntry {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ReviewError::Validation("drug name is required".to_string()));
        }
        if self.dosing.trim().is_empty() {
            return Err(ReviewError::Validation(format!(
                "dosing is required for {}",
                self.name
            )));
        }
        Ok(())
    }
}

/// Parses `name:active_moiety:dosing:interval:route[:role]`.
///
/// Role defaults to MAIN when omitted.
impl FromStr for DrugEntry {
    type Err = ReviewError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').map(str::trim).collect();
        if parts.len() != 5 && parts.len() != 6 {
            return Err(ReviewError::Validation(format!(
                "expected name:moiety:dosing:interval:route[:role], got '{}'",
                s
            )));
        }
        let role = match parts.get(5) {
            Some(role) => role.parse()?,
            None => DrugRole::Main,
        };
        let entry = DrugEntry {
            name: parts[0].to_string(),
            active_moiety: parts[1].to_string(),
            dosing: parts[2].to_string(),
            interval: parts[3].to_string(),
            route: parts[4].to_string(),
            role,
        };
        entry.validate()?;
        Ok(entry)
    }
}

/// Status of a drug recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecommendationStatus {
    Pending,
    Escalated,
    Approved,
    Rejected,
}

impl RecommendationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationStatus::Pending => "PENDING",
            RecommendationStatus::Escalated => "ESCALATED",
            RecommendationStatus::Approved => "APPROVED",
            RecommendationStatus::Rejected => "REJECTED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RecommendationStatus::Approved | RecommendationStatus::Rejected
        )
    }
}

impl fmt::Display for RecommendationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecommendationStatus {
    type Err = ReviewError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(RecommendationStatus::Pending),
            "ESCALATED" => Ok(RecommendationStatus::Escalated),
            "APPROVED" => Ok(RecommendationStatus::Approved),
            "REJECTED" => Ok(RecommendationStatus::Rejected),
            other => Err(ReviewError::Validation(format!(
                "unknown recommendation status: {}",
                other
            ))),
        }
    }
}

/// A drug recommendation for one patient episode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    // ===== Identification =====
    pub id: RecommendationId,
    pub patient_mrn: String,

    // ===== Regimen =====
    /// Depth within the rejection/replacement chain, starting at 1
    pub regimen_hierarchy: u32,
    pub drugs: Vec<DrugEntry>,
    #[serde(default)]
    pub contraindications: BTreeSet<String>,

    // ===== Workflow =====
    pub status: RecommendationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_recommendation_id: Option<RecommendationId>,

    // ===== Audit =====
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency token, bumped by the store on every write
    pub revision: u64,
}

impl Recommendation {
    /// Hash of the clinically editable content (drugs and contraindications).
    pub fn content_hash(&self) -> String {
        content_hash(&self.drugs, &self.contraindications)
    }
}

/// Deterministic SHA-256 over a drug list and contraindication set.
///
/// Drug order is significant; contraindications are hashed in sorted order.
pub fn content_hash(drugs: &[DrugEntry], contraindications: &BTreeSet<String>) -> String {
    let mut hasher = Sha256::new();
    for drug in drugs {
        hash_str(&mut hasher, &drug.name);
        hash_str(&mut hasher, &drug.active_moiety);
        hash_str(&mut hasher, &drug.dosing);
        hash_str(&mut hasher, &drug.interval);
        hash_str(&mut hasher, &drug.route);
        hash_str(&mut hasher, drug.role.as_str());
    }
    hasher.update([1u8]);
    for item in contraindications {
        hash_str(&mut hasher, item);
    }
    hex::encode(hasher.finalize())
}

fn hash_str(hasher: &mut Sha256, s: &str) {
    hasher.update(s.as_bytes());
    hasher.update([0u8]);
}

// ===== Escalations =====

/// Status of an escalation case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscalationStatus {
    Pending,
    InReview,
    RequiresClarification,
    Resolved,
    Cancelled,
}

impl EscalationStatus {
    pub const ALL: [EscalationStatus; 5] = [
        EscalationStatus::Pending,
        EscalationStatus::InReview,
        EscalationStatus::RequiresClarification,
        EscalationStatus::Resolved,
        EscalationStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationStatus::Pending => "PENDING",
            EscalationStatus::InReview => "IN_REVIEW",
            EscalationStatus::RequiresClarification => "REQUIRES_CLARIFICATION",
            EscalationStatus::Resolved => "RESOLVED",
            EscalationStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EscalationStatus::Resolved | EscalationStatus::Cancelled)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for EscalationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EscalationStatus {
    type Err = ReviewError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "PENDING" => Ok(EscalationStatus::Pending),
            // IN_PROGRESS is the label some clients use for the claimed state
            "IN_REVIEW" | "IN_PROGRESS" => Ok(EscalationStatus::InReview),
            "REQUIRES_CLARIFICATION" => Ok(EscalationStatus::RequiresClarification),
            "RESOLVED" => Ok(EscalationStatus::Resolved),
            "CANCELLED" => Ok(EscalationStatus::Cancelled),
            other => Err(ReviewError::Validation(format!(
                "unknown escalation status: {}",
                other
            ))),
        }
    }
}

/// Escalation priority. Informational only; never gates a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscalationPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl EscalationPriority {
    pub const ALL: [EscalationPriority; 4] = [
        EscalationPriority::Critical,
        EscalationPriority::High,
        EscalationPriority::Medium,
        EscalationPriority::Low,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationPriority::Critical => "CRITICAL",
            EscalationPriority::High => "HIGH",
            EscalationPriority::Medium => "MEDIUM",
            EscalationPriority::Low => "LOW",
        }
    }

    /// Sort rank, CRITICAL first
    pub fn rank(&self) -> u8 {
        match self {
            EscalationPriority::Critical => 0,
            EscalationPriority::High => 1,
            EscalationPriority::Medium => 2,
            EscalationPriority::Low => 3,
        }
    }

    /// Default priority for a pain-score triggered escalation.
    pub fn from_vas(vas: u8) -> Self {
        match vas {
            9..=u8::MAX => EscalationPriority::Critical,
            7 | 8 => EscalationPriority::High,
            4..=6 => EscalationPriority::Medium,
            _ => EscalationPriority::Low,
        }
    }
}

impl fmt::Display for EscalationPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EscalationPriority {
    type Err = ReviewError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CRITICAL" => Ok(EscalationPriority::Critical),
            "HIGH" => Ok(EscalationPriority::High),
            "MEDIUM" => Ok(EscalationPriority::Medium),
            "LOW" => Ok(EscalationPriority::Low),
            other => Err(ReviewError::Validation(format!(
                "unknown escalation priority: {}",
                other
            ))),
        }
    }
}

/// What caused a recommendation to be escalated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EscalationTrigger {
    /// A doctor rejected the recommendation
    DoctorRejection,
    /// A pain-escalation rule fired on the patient's VAS score (0-10)
    PainScore { vas: u8 },
    Manual,
}

impl fmt::Display for EscalationTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EscalationTrigger::DoctorRejection => write!(f, "doctor rejection"),
            EscalationTrigger::PainScore { vas } => write!(f, "pain score (VAS {})", vas),
            EscalationTrigger::Manual => write!(f, "manual"),
        }
    }
}

/// A review case linking one recommendation to an anesthesiologist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Escalation {
    pub id: EscalationId,
    /// Immutable after creation
    pub recommendation_id: RecommendationId,

    pub escalated_by: String,
    pub escalated_at: DateTime<Utc>,
    pub trigger: EscalationTrigger,
    pub priority: EscalationPriority,
    pub status: EscalationStatus,

    /// Actor that claimed the case with `take`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewer: Option<String>,
    /// Open question while REQUIRES_CLARIFICATION
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clarification: Option<String>,

    // ===== Closure (terminal states only) =====
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,

    pub updated_at: DateTime<Utc>,
    pub revision: u64,
}

/// Filter for listing escalations. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct EscalationFilter {
    pub status: Option<EscalationStatus>,
    pub priority: Option<EscalationPriority>,
    /// Only PENDING, IN_REVIEW and REQUIRES_CLARIFICATION
    pub active_only: bool,
}

impl EscalationFilter {
    pub fn matches(&self, escalation: &Escalation) -> bool {
        if let Some(status) = self.status {
            if escalation.status != status {
                return false;
            }
        }
        if let Some(priority) = self.priority {
            if escalation.priority != priority {
                return false;
            }
        }
        !(self.active_only && escalation.status.is_terminal())
    }
}

/// Escalation counts for dashboards
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationStats {
    pub total: usize,
    pub active: usize,
    pub pending: usize,
    pub in_review: usize,
    pub requires_clarification: usize,
    pub resolved: usize,
    pub cancelled: usize,
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl EscalationStats {
    pub fn tally<'a>(escalations: impl IntoIterator<Item = &'a Escalation>) -> Self {
        let mut stats = Self::default();
        for escalation in escalations {
            stats.total += 1;
            if escalation.status.is_active() {
                stats.active += 1;
            }
            match escalation.status {
                EscalationStatus::Pending => stats.pending += 1,
                EscalationStatus::InReview => stats.in_review += 1,
                EscalationStatus::RequiresClarification => stats.requires_clarification += 1,
                EscalationStatus::Resolved => stats.resolved += 1,
                EscalationStatus::Cancelled => stats.cancelled += 1,
            }
            match escalation.priority {
                EscalationPriority::Critical => stats.critical += 1,
                EscalationPriority::High => stats.high += 1,
                EscalationPriority::Medium => stats.medium += 1,
                EscalationPriority::Low => stats.low += 1,
            }
        }
        stats
    }
}

// ===== Protocols =====

/// Status of a clinical protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProtocolStatus {
    Draft,
    Approved,
    Rejected,
}

impl ProtocolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolStatus::Draft => "DRAFT",
            ProtocolStatus::Approved => "APPROVED",
            ProtocolStatus::Rejected => "REJECTED",
        }
    }
}

impl fmt::Display for ProtocolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolStatus {
    type Err = ReviewError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DRAFT" => Ok(ProtocolStatus::Draft),
            "APPROVED" => Ok(ProtocolStatus::Approved),
            "REJECTED" => Ok(ProtocolStatus::Rejected),
            other => Err(ReviewError::Validation(format!(
                "unknown protocol status: {}",
                other
            ))),
        }
    }
}

/// Clinical documentation drafted during an escalation review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Protocol {
    pub id: ProtocolId,
    /// Immutable after creation
    pub escalation_id: EscalationId,
    pub title: String,
    pub content: String,
    /// Document version, starts at 1. Edits while DRAFT do not bump it.
    pub version: u32,
    pub status: ProtocolStatus,

    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,

    pub revision: u64,
}

// ===== Comments =====

/// What a comment is attached to. Exactly one parent per comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum CommentParent {
    Recommendation(RecommendationId),
    Protocol(ProtocolId),
}

impl CommentParent {
    pub fn kind(&self) -> EntityKind {
        match self {
            CommentParent::Recommendation(_) => EntityKind::Recommendation,
            CommentParent::Protocol(_) => EntityKind::Protocol,
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            CommentParent::Recommendation(id) | CommentParent::Protocol(id) => *id,
        }
    }

    /// Storage tag for the parent type
    pub fn type_tag(&self) -> &'static str {
        match self {
            CommentParent::Recommendation(_) => "recommendation",
            CommentParent::Protocol(_) => "protocol",
        }
    }

    pub fn from_parts(type_tag: &str, id: i64) -> Result<Self> {
        match type_tag {
            "recommendation" => Ok(CommentParent::Recommendation(id)),
            "protocol" => Ok(CommentParent::Protocol(id)),
            other => Err(ReviewError::Validation(format!(
                "unknown comment parent type: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for CommentParent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.type_tag(), self.id())
    }
}

/// An append-only note on a recommendation or protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub parent: CommentParent,
    pub author_id: String,
    pub author_name: String,
    pub content: String,
    pub is_question: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn morphine() -> DrugEntry {
        DrugEntry {
            name: "Morphine".to_string(),
            active_moiety: "morphine".to_string(),
            dosing: "2 mg".to_string(),
            interval: "q4h".to_string(),
            route: "IV".to_string(),
            role: DrugRole::Main,
        }
    }

    #[test]
    fn test_drug_entry_parse() {
        let entry: DrugEntry = "Morphine:morphine:2 mg:q4h:IV".parse().unwrap();
        assert_eq!(entry, morphine());

        let alt: DrugEntry = "Paracetamol:paracetamol:1 g:q6h:PO:alternative"
            .parse()
            .unwrap();
        assert_eq!(alt.role, DrugRole::Alternative);

        assert!("Morphine:morphine".parse::<DrugEntry>().is_err());
        assert!(":morphine:2 mg:q4h:IV".parse::<DrugEntry>().is_err());
    }

    #[test]
    fn test_content_hash_is_order_sensitive_for_drugs() {
        let mut second = morphine();
        second.name = "Ketamine".to_string();
        second.role = DrugRole::Alternative;

        let none = BTreeSet::new();
        let a = content_hash(&[morphine(), second.clone()], &none);
        let b = content_hash(&[second, morphine()], &none);
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_content_hash_ignores_contraindication_insert_order() {
        let mut first = BTreeSet::new();
        first.insert("renal impairment".to_string());
        first.insert("nsaid allergy".to_string());
        let mut second = BTreeSet::new();
        second.insert("nsaid allergy".to_string());
        second.insert("renal impairment".to_string());

        assert_eq!(
            content_hash(&[morphine()], &first),
            content_hash(&[morphine()], &second)
        );
        assert_ne!(
            content_hash(&[morphine()], &first),
            content_hash(&[morphine()], &BTreeSet::new())
        );
    }

    #[test]
    fn test_status_round_trip_through_strings() {
        for status in EscalationStatus::ALL {
            assert_eq!(status.as_str().parse::<EscalationStatus>().unwrap(), status);
        }
        assert_eq!(
            "in_progress".parse::<EscalationStatus>().unwrap(),
            EscalationStatus::InReview
        );
        assert!("closed".parse::<EscalationStatus>().is_err());
    }

    #[test]
    fn test_priority_from_vas() {
        assert_eq!(EscalationPriority::from_vas(10), EscalationPriority::Critical);
        assert_eq!(EscalationPriority::from_vas(7), EscalationPriority::High);
        assert_eq!(EscalationPriority::from_vas(5), EscalationPriority::Medium);
        assert_eq!(EscalationPriority::from_vas(2), EscalationPriority::Low);
    }

    #[test]
    fn test_comment_parent_parts() {
        let parent = CommentParent::Protocol(12);
        assert_eq!(parent.to_string(), "protocol:12");
        assert_eq!(
            CommentParent::from_parts(parent.type_tag(), parent.id()).unwrap(),
            parent
        );
        assert!(CommentParent::from_parts("escalation", 1).is_err());
    }

    #[test]
    fn test_stats_tally() {
        let now = Utc::now();
        let base = Escalation {
            id: 1,
            recommendation_id: 1,
            escalated_by: "dr_house".to_string(),
            escalated_at: now,
            trigger: EscalationTrigger::DoctorRejection,
            priority: EscalationPriority::Critical,
            status: EscalationStatus::Pending,
            reviewer: None,
            clarification: None,
            resolution: None,
            resolved_by: None,
            resolved_at: None,
            updated_at: now,
            revision: 1,
        };
        let mut resolved = base.clone();
        resolved.id = 2;
        resolved.status = EscalationStatus::Resolved;
        resolved.priority = EscalationPriority::Low;

        let stats = EscalationStats::tally([&base, &resolved]);
        assert_eq!(stats.total, 2);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.resolved, 1);
        assert_eq!(stats.critical, 1);
        assert_eq!(stats.low, 1);

        let filter = EscalationFilter {
            active_only: true,
            ..Default::default()
        };
        assert!(filter.matches(&base));
        assert!(!filter.matches(&resolved));
    }
}
