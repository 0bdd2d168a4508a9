//! Row models for the case/patient/specimen hierarchy.

use specshare_core::types::DbId;
use sqlx::FromRow;

/// A row from the `cases` table.
#[derive(Debug, Clone, FromRow)]
pub struct CaseRow {
    pub id: DbId,
    pub dataset_id: DbId,
    pub external_id: String,
    pub consent_codes: Vec<String>,
}

/// A row from the `patients` table.
#[derive(Debug, Clone, FromRow)]
pub struct PatientRow {
    pub id: DbId,
    pub case_id: DbId,
    pub external_id: String,
    pub consent_codes: Vec<String>,
}

/// A row from the `specimens` table.
#[derive(Debug, Clone, FromRow)]
pub struct SpecimenRow {
    pub id: DbId,
    pub patient_id: DbId,
    pub external_id: String,
    pub consent_codes: Vec<String>,
}
