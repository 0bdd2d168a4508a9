//! Release entity models.

use serde::Serialize;
use specshare_core::types::{DbId, Timestamp};
use sqlx::FromRow;

/// A row from the `releases` table.
///
/// `application_codes` is the coded data-access application the eligibility
/// policy evaluates specimens against.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Release {
    pub id: DbId,
    pub name: String,
    pub application_codes: Vec<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// One entry of a release's authoritative selection, joined with the
/// specimen for display.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SelectedSpecimen {
    pub specimen_id: DbId,
    pub external_id: String,
    pub patient_id: DbId,
}
