//! Materialized case hierarchy handed to the eligibility policy.
//!
//! A case groups the patients of one family unit; each patient owns zero or
//! more specimens. Consent codes may be attached at any level — an empty
//! vector means "no consent recorded here", and resolution walks outward
//! (specimen, then patient, then case).

use crate::types::DbId;

/// A biological sample, the unit ultimately included in or excluded from a
/// release.
#[derive(Debug, Clone)]
pub struct SpecimenDetail {
    pub id: DbId,
    pub external_id: String,
    pub consent_codes: Vec<String>,
}

/// An individual within a case.
#[derive(Debug, Clone)]
pub struct PatientDetail {
    pub id: DbId,
    pub external_id: String,
    pub consent_codes: Vec<String>,
    pub specimens: Vec<SpecimenDetail>,
}

/// A family/clinical unit with its nested patients and specimens.
#[derive(Debug, Clone)]
pub struct CaseDetail {
    pub id: DbId,
    pub external_id: String,
    pub consent_codes: Vec<String>,
    pub patients: Vec<PatientDetail>,
}

impl CaseDetail {
    /// Total number of specimens across all patients of this case.
    pub fn specimen_count(&self) -> usize {
        self.patients.iter().map(|p| p.specimens.len()).sum()
    }
}
