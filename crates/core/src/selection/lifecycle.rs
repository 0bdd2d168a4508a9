//! Job lifecycle control: create, cancel, finalize, history.
//!
//! Thin orchestration over the injected [`SelectionStore`]; the store's
//! transactions carry the actual consistency guarantees. Finalize is the
//! only path that ever writes a release's selection.

use crate::error::CoreError;
use crate::selection::store::SelectionStore;
use crate::selection::{FinalOutcome, RunningJob, SelectJob};
use crate::types::DbId;

pub struct SelectionController<S> {
    store: S,
}

impl<S: SelectionStore> SelectionController<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Start a selection job for the release.
    ///
    /// Fails with [`CoreError::JobAlreadyRunning`] (carrying the existing
    /// job ids) when the release already has a running job; the existing
    /// job is left untouched.
    pub async fn start_job(&self, release_id: DbId) -> Result<SelectJob, CoreError> {
        let job = self.store.create_job(release_id).await?;
        tracing::info!(
            job_id = job.id,
            release_id,
            initial_todo_count = job.initial_todo_count,
            "Selection job started",
        );
        Ok(job)
    }

    /// Request cooperative cancellation of a running job.
    ///
    /// Sets the flag only; the poller observes it and finalizes with
    /// [`FinalOutcome::Cancelled`]. Idempotent.
    pub async fn request_cancellation(&self, job_id: DbId) -> Result<SelectJob, CoreError> {
        let job = self.store.request_cancellation(job_id).await?;
        tracing::info!(job_id, release_id = job.release_id, "Cancellation requested");
        Ok(job)
    }

    /// Transition a running job to its terminal status.
    ///
    /// On success the job's accumulated specimens are unioned into the
    /// release's selection; cancelled and failed jobs never touch the
    /// release. A job finalizes exactly once — a second call is a Conflict.
    pub async fn finalize(
        &self,
        job_id: DbId,
        outcome: FinalOutcome,
        note: Option<&str>,
    ) -> Result<SelectJob, CoreError> {
        let job = self.store.finalize(job_id, outcome, note).await?;
        tracing::info!(
            job_id,
            release_id = job.release_id,
            status = ?job.status,
            selected_count = job.selected_count,
            "Selection job finalized",
        );
        Ok(job)
    }

    /// Fetch one job with its messages.
    pub async fn job(&self, job_id: DbId) -> Result<SelectJob, CoreError> {
        self.store.job(job_id).await
    }

    /// All currently running jobs, for the poller.
    pub async fn running_jobs(&self) -> Result<Vec<RunningJob>, CoreError> {
        self.store.running_jobs().await
    }

    /// Terminal jobs of a release, newest first ("previous jobs").
    pub async fn list_previous(&self, release_id: DbId) -> Result<Vec<SelectJob>, CoreError> {
        self.store.previous_jobs(release_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cases::{CaseDetail, PatientDetail, SpecimenDetail};
    use crate::consent::{ApplicationContext, EligibilityPolicy};
    use crate::selection::memory::MemoryStore;
    use crate::selection::JobStatus;
    use assert_matches::assert_matches;
    use async_trait::async_trait;

    struct SelectAll;

    #[async_trait]
    impl EligibilityPolicy for SelectAll {
        async fn is_selectable(
            &self,
            _application: &ApplicationContext,
            _case: &CaseDetail,
            _patient: &PatientDetail,
            _specimen: &SpecimenDetail,
        ) -> Result<bool, CoreError> {
            Ok(true)
        }
    }

    fn simple_case(case_id: i64) -> CaseDetail {
        CaseDetail {
            id: case_id,
            external_id: format!("CS-{case_id}"),
            consent_codes: vec!["GRU".into()],
            patients: vec![PatientDetail {
                id: case_id * 10,
                external_id: format!("PT-{case_id}"),
                consent_codes: vec![],
                specimens: vec![SpecimenDetail {
                    id: case_id * 100,
                    external_id: format!("SP-{case_id}"),
                    consent_codes: vec![],
                }],
            }],
        }
    }

    async fn setup(case_count: i64) -> (MemoryStore, SelectionController<MemoryStore>, i64) {
        let store = MemoryStore::new();
        store
            .add_dataset(
                "urn:fdc:example.org:ds1",
                (1..=case_count).map(simple_case).collect(),
            )
            .await;
        let release_id = store
            .add_release(
                ApplicationContext::new(["GRU"]),
                vec!["urn:fdc:example.org:ds1".into()],
            )
            .await;
        let controller = SelectionController::new(store.clone());
        (store, controller, release_id)
    }

    #[tokio::test]
    async fn second_start_conflicts_and_leaves_first_job_untouched() {
        let (store, controller, release_id) = setup(3).await;
        let first = controller.start_job(release_id).await.unwrap();

        let err = controller.start_job(release_id).await.unwrap_err();
        assert_matches!(
            &err,
            CoreError::JobAlreadyRunning { job_ids, .. } if job_ids == &vec![first.id]
        );

        let unchanged = store.job(first.id).await.unwrap();
        assert_eq!(unchanged.status, JobStatus::Running);
        assert_eq!(unchanged.todo_remaining, 3);
    }

    #[tokio::test]
    async fn start_is_allowed_again_after_the_previous_job_ends() {
        let (_store, controller, release_id) = setup(1).await;
        let first = controller.start_job(release_id).await.unwrap();
        controller
            .finalize(first.id, FinalOutcome::Cancelled, None)
            .await
            .unwrap();

        let second = controller.start_job(release_id).await.unwrap();
        assert_ne!(second.id, first.id);
    }

    #[tokio::test]
    async fn finalize_is_running_to_terminal_exactly_once() {
        let (_store, controller, release_id) = setup(1).await;
        let job = controller.start_job(release_id).await.unwrap();

        let done = controller
            .finalize(job.id, FinalOutcome::Succeeded, None)
            .await
            .unwrap();
        assert_eq!(done.status, JobStatus::Succeeded);
        assert_eq!(done.percent_done, 100);
        assert!(done.ended_at.is_some());

        assert_matches!(
            controller.finalize(job.id, FinalOutcome::Failed, None).await,
            Err(CoreError::Conflict(_))
        );
    }

    #[tokio::test]
    async fn cancelled_job_stays_in_history_with_its_accumulated_selection() {
        let (store, controller, release_id) = setup(3).await;
        let job = controller.start_job(release_id).await.unwrap();

        store.process_batch(job.id, 1, &SelectAll).await.unwrap();
        controller.request_cancellation(job.id).await.unwrap();
        controller
            .finalize(job.id, FinalOutcome::Cancelled, None)
            .await
            .unwrap();

        // Never merged into the release...
        assert!(store.release_selection(release_id).await.unwrap().is_empty());
        // ...but kept on the job for audit, and visible in history.
        assert_eq!(store.job_selection(job.id).await.unwrap(), vec![100]);
        let previous = controller.list_previous(release_id).await.unwrap();
        assert_eq!(previous.len(), 1);
        assert_eq!(previous[0].id, job.id);
        assert_eq!(previous[0].status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn running_jobs_reports_the_cancellation_flag() {
        let (_store, controller, release_id) = setup(1).await;
        let job = controller.start_job(release_id).await.unwrap();

        let running = controller.running_jobs().await.unwrap();
        assert_eq!(running.len(), 1);
        assert!(!running[0].requested_cancellation);

        controller.request_cancellation(job.id).await.unwrap();
        let running = controller.running_jobs().await.unwrap();
        assert!(running[0].requested_cancellation);
    }

    #[tokio::test]
    async fn failed_finalize_appends_the_diagnostic_note() {
        let (_store, controller, release_id) = setup(1).await;
        let job = controller.start_job(release_id).await.unwrap();

        let done = controller
            .finalize(job.id, FinalOutcome::Failed, Some("queue bookkeeping mismatch"))
            .await
            .unwrap();
        assert_eq!(done.status, JobStatus::Failed);
        assert!(done
            .messages
            .iter()
            .any(|m| m.contains("queue bookkeeping mismatch")));
    }
}
