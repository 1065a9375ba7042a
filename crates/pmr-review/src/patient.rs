//! Read-only patient directory.

use async_trait::async_trait;
use pmr_core::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What the review workflow needs to know about a patient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientRecord {
    pub mrn: String,
    pub display_name: String,
}

/// MRN lookup against the hospital's patient registry
#[async_trait]
pub trait PatientDirectory: Send + Sync {
    /// `Ok(None)` for MRNs the registry does not know
    async fn lookup(&self, mrn: &str) -> Result<Option<PatientRecord>>;
}

/// Fixed in-memory directory
#[derive(Debug, Clone, Default)]
pub struct StaticPatientDirectory {
    patients: HashMap<String, PatientRecord>,
}

impl StaticPatientDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_patient(mut self, mrn: impl Into<String>, display_name: impl Into<String>) -> Self {
        let mrn = mrn.into();
        self.patients.insert(
            mrn.clone(),
            PatientRecord {
                mrn,
                display_name: display_name.into(),
            },
        );
        self
    }
}

#[async_trait]
impl PatientDirectory for StaticPatientDirectory {
    async fn lookup(&self, mrn: &str) -> Result<Option<PatientRecord>> {
        Ok(self.patients.get(mrn.trim()).cloned())
    }
}
