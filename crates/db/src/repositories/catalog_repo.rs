//! Read-only work catalog over the case/patient/specimen hierarchy.
//!
//! Supplies the initial queue population for a selection job and
//! materializes claimed cases for evaluation. Never writes.

use std::collections::HashMap;

use sqlx::PgConnection;

use specshare_core::types::DbId;
use specshare_core::{CaseDetail, PatientDetail, SpecimenDetail};

use crate::models::case::{CaseRow, PatientRow, SpecimenRow};

pub struct CatalogRepo;

impl CatalogRepo {
    /// All case ids belonging to the datasets identified by `dataset_uris`.
    pub async fn all_cases_for_datasets(
        conn: &mut PgConnection,
        dataset_uris: &[String],
    ) -> Result<Vec<DbId>, sqlx::Error> {
        sqlx::query_scalar::<_, DbId>(
            "SELECT c.id FROM cases c \
             JOIN datasets d ON d.id = c.dataset_id \
             WHERE d.uri = ANY($1) \
             ORDER BY c.id",
        )
        .bind(dataset_uris)
        .fetch_all(conn)
        .await
    }

    /// Materialize cases with their nested patients and specimens.
    ///
    /// Case ids without a catalog row are silently absent from the result;
    /// the caller decides how to record them.
    pub async fn materialize(
        conn: &mut PgConnection,
        case_ids: &[DbId],
    ) -> Result<Vec<CaseDetail>, sqlx::Error> {
        let cases = sqlx::query_as::<_, CaseRow>(
            "SELECT id, dataset_id, external_id, consent_codes \
             FROM cases WHERE id = ANY($1) ORDER BY id",
        )
        .bind(case_ids)
        .fetch_all(&mut *conn)
        .await?;

        let patients = sqlx::query_as::<_, PatientRow>(
            "SELECT id, case_id, external_id, consent_codes \
             FROM patients WHERE case_id = ANY($1) ORDER BY id",
        )
        .bind(case_ids)
        .fetch_all(&mut *conn)
        .await?;

        let specimens = sqlx::query_as::<_, SpecimenRow>(
            "SELECT s.id, s.patient_id, s.external_id, s.consent_codes \
             FROM specimens s \
             JOIN patients p ON p.id = s.patient_id \
             WHERE p.case_id = ANY($1) \
             ORDER BY s.id",
        )
        .bind(case_ids)
        .fetch_all(&mut *conn)
        .await?;

        let mut specimens_by_patient: HashMap<DbId, Vec<SpecimenDetail>> = HashMap::new();
        for row in specimens {
            specimens_by_patient
                .entry(row.patient_id)
                .or_default()
                .push(SpecimenDetail {
                    id: row.id,
                    external_id: row.external_id,
                    consent_codes: row.consent_codes,
                });
        }

        let mut patients_by_case: HashMap<DbId, Vec<PatientDetail>> = HashMap::new();
        for row in patients {
            let specimens = specimens_by_patient.remove(&row.id).unwrap_or_default();
            patients_by_case
                .entry(row.case_id)
                .or_default()
                .push(PatientDetail {
                    id: row.id,
                    external_id: row.external_id,
                    consent_codes: row.consent_codes,
                    specimens,
                });
        }

        Ok(cases
            .into_iter()
            .map(|row| {
                let patients = patients_by_case.remove(&row.id).unwrap_or_default();
                CaseDetail {
                    id: row.id,
                    external_id: row.external_id,
                    consent_codes: row.consent_codes,
                    patients,
                }
            })
            .collect())
    }
}
