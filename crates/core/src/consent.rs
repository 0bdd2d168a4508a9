//! Eligibility evaluation seam and the default consent-code policy.
//!
//! The selection engine treats the policy as an external collaborator: a
//! pure predicate over one specimen in its case/patient context. Anything
//! implementing [`EligibilityPolicy`] can drive a selection job.

use async_trait::async_trait;

use crate::cases::{CaseDetail, PatientDetail, SpecimenDetail};
use crate::error::CoreError;

/// The coded data-access application attached to a release.
///
/// `codes` are the use categories the applicant requested (e.g. DUO terms).
/// The policy decides per specimen whether its recorded consent permits
/// every requested code.
#[derive(Debug, Clone, Default)]
pub struct ApplicationContext {
    pub codes: Vec<String>,
}

impl ApplicationContext {
    pub fn new(codes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            codes: codes.into_iter().map(Into::into).collect(),
        }
    }
}

/// Decides whether one specimen may be included in a release.
///
/// Implementations must be pure: no side effects, no mutation of shared
/// state. They may be slow (e.g. consult an ontology service), which is why
/// the method is async. A returned error aborts the enclosing batch commit
/// without any partial mutation.
#[async_trait]
pub trait EligibilityPolicy: Send + Sync {
    async fn is_selectable(
        &self,
        application: &ApplicationContext,
        case: &CaseDetail,
        patient: &PatientDetail,
        specimen: &SpecimenDetail,
    ) -> Result<bool, CoreError>;
}

/// Consent-code gate: a specimen is selectable iff its effective consent
/// permits every code of the application.
///
/// The effective consent is the nearest non-empty consent-code set walking
/// specimen, then patient, then case. No consent recorded anywhere (or an
/// application with no codes) means not selectable.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsentCodePolicy;

impl ConsentCodePolicy {
    /// Resolve the consent codes that apply to `specimen`.
    fn effective_consent<'a>(
        case: &'a CaseDetail,
        patient: &'a PatientDetail,
        specimen: &'a SpecimenDetail,
    ) -> &'a [String] {
        if !specimen.consent_codes.is_empty() {
            &specimen.consent_codes
        } else if !patient.consent_codes.is_empty() {
            &patient.consent_codes
        } else {
            &case.consent_codes
        }
    }
}

#[async_trait]
impl EligibilityPolicy for ConsentCodePolicy {
    async fn is_selectable(
        &self,
        application: &ApplicationContext,
        case: &CaseDetail,
        patient: &PatientDetail,
        specimen: &SpecimenDetail,
    ) -> Result<bool, CoreError> {
        if application.codes.is_empty() {
            return Ok(false);
        }

        let consent = Self::effective_consent(case, patient, specimen);
        Ok(application
            .codes
            .iter()
            .all(|code| consent.iter().any(|c| c == code)))
    }
}
