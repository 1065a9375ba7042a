//! Insert-side record definitions.
//!
//! These are the shapes handed to a store when a new entity is created. The
//! store assigns ids, timestamps, initial status and revision.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::config::Limits;
use crate::types::{
    CommentParent, DrugEntry, EscalationId, EscalationPriority, EscalationTrigger,
    RecommendationId,
};
use crate::{ReviewError, Result};

/// Rejects empty (after trimming) or oversized free text.
pub fn require_text(field: &str, value: &str, limits: &Limits) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ReviewError::Validation(format!("{} is required", field)));
    }
    if value.chars().count() > limits.max_text_length {
        return Err(ReviewError::Validation(format!(
            "{} must be {} characters or less (got {})",
            field,
            limits.max_text_length,
            value.chars().count()
        )));
    }
    Ok(())
}

/// Validates a drug list against the configured limits.
pub fn validate_drugs(drugs: &[DrugEntry], limits: &Limits) -> Result<()> {
    if drugs.len() > limits.max_drugs {
        return Err(ReviewError::Validation(format!(
            "a regimen may list at most {} drugs (got {})",
            limits.max_drugs,
            drugs.len()
        )));
    }
    for drug in drugs {
        drug.validate()?;
    }
    Ok(())
}

/// A recommendation about to be inserted. Always starts PENDING.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRecommendation {
    pub patient_mrn: String,
    pub regimen_hierarchy: u32,
    pub drugs: Vec<DrugEntry>,
    #[serde(default)]
    pub contraindications: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_recommendation_id: Option<RecommendationId>,
    pub created_by: String,
}

impl NewRecommendation {
    pub fn validate(&self, limits: &Limits) -> Result<()> {
        if self.patient_mrn.trim().is_empty() {
            return Err(ReviewError::Validation("patient MRN is required".to_string()));
        }
        if self.regimen_hierarchy == 0 {
            return Err(ReviewError::Validation(
                "regimen hierarchy must be positive".to_string(),
            ));
        }
        // Replacements sit one level deeper than the recommendation they replace
        if self.previous_recommendation_id.is_some() && self.regimen_hierarchy < 2 {
            return Err(ReviewError::Validation(format!(
                "a replacement recommendation cannot have regimen hierarchy {}",
                self.regimen_hierarchy
            )));
        }
        if self.created_by.trim().is_empty() {
            return Err(ReviewError::Validation("created_by is required".to_string()));
        }
        validate_drugs(&self.drugs, limits)
    }
}

/// An escalation about to be opened. Always starts PENDING.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEscalation {
    pub recommendation_id: RecommendationId,
    pub escalated_by: String,
    pub trigger: EscalationTrigger,
    pub priority: EscalationPriority,
}

impl NewEscalation {
    pub fn validate(&self) -> Result<()> {
        if self.escalated_by.trim().is_empty() {
            return Err(ReviewError::Validation("escalated_by is required".to_string()));
        }
        if let EscalationTrigger::PainScore { vas } = self.trigger {
            if vas > 10 {
                return Err(ReviewError::Validation(format!(
                    "VAS score must be between 0 and 10 (got {})",
                    vas
                )));
            }
        }
        Ok(())
    }
}

/// A protocol draft about to be created. Always starts DRAFT at version 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProtocol {
    pub escalation_id: EscalationId,
    pub title: String,
    pub content: String,
    pub created_by: String,
}

impl NewProtocol {
    pub fn validate(&self, limits: &Limits) -> Result<()> {
        require_text("title", &self.title, limits)?;
        if self.content.chars().count() > limits.max_text_length {
            return Err(ReviewError::Validation(format!(
                "content must be {} characters or less",
                limits.max_text_length
            )));
        }
        Ok(())
    }
}

/// A comment about to be appended to a thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewComment {
    pub parent: CommentParent,
    pub author_id: String,
    pub author_name: String,
    pub content: String,
    pub is_question: bool,
}

impl NewComment {
    pub fn validate(&self, limits: &Limits) -> Result<()> {
        if self.author_id.trim().is_empty() {
            return Err(ReviewError::Validation("author is required".to_string()));
        }
        require_text("comment", &self.content, limits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DrugRole;

    fn limits() -> Limits {
        Limits::default()
    }

    #[test]
    fn test_require_text() {
        assert!(require_text("resolution", "Patient stabilized", &limits()).is_ok());
        assert!(require_text("resolution", "   ", &limits()).is_err());

        let tight = Limits {
            max_text_length: 4,
            ..Limits::default()
        };
        assert!(require_text("reason", "allergy risk", &tight).is_err());
    }

    #[test]
    fn test_new_recommendation_validation() {
        let mut rec = NewRecommendation {
            patient_mrn: "MRN-001".to_string(),
            regimen_hierarchy: 1,
            drugs: vec![DrugEntry {
                name: "Oxycodone".to_string(),
                active_moiety: "oxycodone".to_string(),
                dosing: "5 mg".to_string(),
                interval: "q6h".to_string(),
                route: "PO".to_string(),
                role: DrugRole::Main,
            }],
            contraindications: BTreeSet::new(),
            previous_recommendation_id: None,
            created_by: "cds".to_string(),
        };
        assert!(rec.validate(&limits()).is_ok());

        rec.previous_recommendation_id = Some(3);
        assert!(rec.validate(&limits()).is_err());
        rec.regimen_hierarchy = 2;
        assert!(rec.validate(&limits()).is_ok());

        rec.patient_mrn = String::new();
        assert!(rec.validate(&limits()).is_err());
    }

    #[test]
    fn test_new_escalation_rejects_out_of_range_vas() {
        let esc = NewEscalation {
            recommendation_id: 1,
            escalated_by: "dr_grey".to_string(),
            trigger: EscalationTrigger::PainScore { vas: 11 },
            priority: EscalationPriority::High,
        };
        assert!(esc.validate().is_err());
    }

    #[test]
    fn test_new_comment_requires_content() {
        let comment = NewComment {
            parent: CommentParent::Recommendation(1),
            author_id: "nurse_1".to_string(),
            author_name: "Nurse Joy".to_string(),
            content: String::new(),
            is_question: false,
        };
        assert!(comment.validate(&limits()).is_err());
    }
}
