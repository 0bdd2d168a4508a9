use crate::types::DbId;

/// Domain error type shared by the engine, stores, and callers.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: DbId },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// A selection job is already running for the release. Carries the
    /// conflicting job id(s) so callers can report or inspect them.
    #[error("A selection job is already running for release {release_id} (job ids: {job_ids:?})")]
    JobAlreadyRunning { release_id: DbId, job_ids: Vec<DbId> },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The eligibility policy raised an unexpected fault while evaluating a
    /// specimen. The enclosing batch is rolled back, so retrying the batch
    /// is always safe.
    #[error("Eligibility policy fault: {0}")]
    PolicyFault(String),

    /// Optimistic concurrency failure during an atomic commit. Nothing was
    /// applied; the caller should retry.
    #[error("Transient storage conflict: {0}")]
    Transient(String),

    /// The job's internal bookkeeping no longer adds up (queue size versus
    /// initial count). Fatal to that job only — it must be finalized as
    /// failed and never touches other jobs or the release.
    #[error("Invariant violation on job {job_id}: {detail}")]
    InvariantViolation { job_id: DbId, detail: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether the failed operation may be retried as-is. True for policy
    /// faults and transient storage conflicts, where the batch transaction
    /// left durable state untouched.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::PolicyFault(_) | CoreError::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_fault_and_transient_are_retryable() {
        assert!(CoreError::PolicyFault("boom".into()).is_retryable());
        assert!(CoreError::Transient("serialization".into()).is_retryable());
    }

    #[test]
    fn invariant_violation_is_not_retryable() {
        let err = CoreError::InvariantViolation {
            job_id: 7,
            detail: "queue grew".into(),
        };
        assert!(!err.is_retryable());
    }
}
