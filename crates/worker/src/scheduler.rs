//! Background selection scheduler.
//!
//! A single long-lived task that polls for running selection jobs every
//! `poll_interval` and drives each through the batch loop. Jobs are handled
//! sequentially within a tick, so there is never more than one in-flight
//! batch run per job — the serialization the store contract requires.

use tokio_util::sync::CancellationToken;

use specshare_core::{
    BatchRunner, CoreError, EligibilityPolicy, FinalOutcome, RunningJob, SelectionController,
    SelectionStore,
};

use crate::config::WorkerConfig;

pub struct SelectionScheduler<S, P> {
    controller: SelectionController<S>,
    runner: BatchRunner<S, P>,
    config: WorkerConfig,
}

impl<S, P> SelectionScheduler<S, P>
where
    S: SelectionStore + Clone,
    P: EligibilityPolicy,
{
    pub fn new(store: S, policy: P, config: WorkerConfig) -> Self {
        let controller = SelectionController::new(store.clone());
        let runner = BatchRunner::new(store, policy).with_batch_size(config.batch_size);
        Self {
            controller,
            runner,
            config,
        }
    }

    /// Run the scheduler loop until the cancellation token is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        tracing::info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            batch_budget_ms = self.config.batch_budget.as_millis() as u64,
            batch_size = self.config.batch_size,
            "Selection scheduler started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Selection scheduler shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        tracing::error!(error = %e, "Scheduler tick failed");
                    }
                }
            }
        }
    }

    /// One tick: advance every running job. Returns the number of cases
    /// processed across all jobs.
    pub async fn poll_once(&self) -> Result<u64, CoreError> {
        let running = self.controller.running_jobs().await?;
        let mut total: u64 = 0;

        for job in running {
            total += self.advance_job(&job).await;
        }

        Ok(total)
    }

    /// Advance one job: honor cancellation, otherwise work the queue within
    /// this tick's budget and finalize when it drains.
    ///
    /// Per-job failures are contained here so one broken job never stalls
    /// the others.
    async fn advance_job(&self, job: &RunningJob) -> u64 {
        if job.requested_cancellation {
            // Cooperative cancellation: committed progress is retained on
            // the job, but nothing is merged into the release.
            if let Err(e) = self
                .controller
                .finalize(job.job_id, FinalOutcome::Cancelled, None)
                .await
            {
                tracing::error!(job_id = job.job_id, error = %e, "Failed to finalize cancelled job");
            }
            return 0;
        }

        let processed = match self
            .runner
            .run_batches(job.job_id, self.config.batch_budget)
            .await
        {
            Ok(processed) => processed,
            Err(err) if err.is_retryable() => {
                // Policy fault or transient storage conflict: the failed
                // batch committed nothing, so the next tick resumes at the
                // same case.
                tracing::warn!(job_id = job.job_id, error = %err, "Batch run will be retried");
                return 0;
            }
            Err(CoreError::InvariantViolation { detail, .. }) => {
                tracing::error!(job_id = job.job_id, %detail, "Job invariant violated");
                if let Err(e) = self
                    .controller
                    .finalize(job.job_id, FinalOutcome::Failed, Some(&detail))
                    .await
                {
                    tracing::error!(job_id = job.job_id, error = %e, "Failed to finalize corrupt job");
                }
                return 0;
            }
            Err(err) => {
                tracing::error!(job_id = job.job_id, error = %err, "Batch run failed");
                return 0;
            }
        };

        match self.controller.job(job.job_id).await {
            Ok(view) if view.todo_remaining == 0 => {
                if let Err(e) = self
                    .controller
                    .finalize(job.job_id, FinalOutcome::Succeeded, None)
                    .await
                {
                    tracing::error!(job_id = job.job_id, error = %e, "Failed to finalize drained job");
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(job_id = job.job_id, error = %e, "Failed to re-read job after batches");
            }
        }

        processed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use specshare_core::cases::{CaseDetail, PatientDetail, SpecimenDetail};
    use specshare_core::{ApplicationContext, JobStatus, MemoryStore};

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

    /// Faults on every evaluation until the shared flag is cleared.
    struct FaultySwitch(std::sync::Arc<std::sync::atomic::AtomicBool>);

    #[async_trait]
    impl EligibilityPolicy for FaultySwitch {
        async fn is_selectable(
            &self,
            _application: &ApplicationContext,
            _case: &CaseDetail,
            _patient: &PatientDetail,
            _specimen: &SpecimenDetail,
        ) -> Result<bool, CoreError> {
            if self.0.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(CoreError::PolicyFault("ontology service down".into()));
            }
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

    async fn seeded(case_count: i64) -> (MemoryStore, i64) {
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
        (store, release_id)
    }

    #[tokio::test]
    async fn one_tick_drains_and_finalizes_a_job() {
        let (store, release_id) = seeded(5).await;
        let job = store.create_job(release_id).await.unwrap();

        let scheduler =
            SelectionScheduler::new(store.clone(), SelectAll, WorkerConfig::default());
        let processed = scheduler.poll_once().await.unwrap();
        assert_eq!(processed, 5);

        let view = store.job(job.id).await.unwrap();
        assert_eq!(view.status, JobStatus::Succeeded);
        assert_eq!(view.percent_done, 100);
        assert_eq!(store.release_selection(release_id).await.unwrap().len(), 5);

        // Nothing left running: the next tick is a no-op.
        assert_eq!(scheduler.poll_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cancellation_flag_short_circuits_the_tick() {
        let (store, release_id) = seeded(5).await;
        let job = store.create_job(release_id).await.unwrap();
        store.request_cancellation(job.id).await.unwrap();

        let scheduler =
            SelectionScheduler::new(store.clone(), SelectAll, WorkerConfig::default());
        let processed = scheduler.poll_once().await.unwrap();
        assert_eq!(processed, 0);

        let view = store.job(job.id).await.unwrap();
        assert_eq!(view.status, JobStatus::Cancelled);
        assert!(store.release_selection(release_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn policy_fault_leaves_the_job_running_for_the_next_tick() {
        let (store, release_id) = seeded(3).await;
        let job = store.create_job(release_id).await.unwrap();

        let faulting = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(true));
        let policy = FaultySwitch(faulting.clone());
        let scheduler = SelectionScheduler::new(store.clone(), policy, WorkerConfig::default());

        assert_eq!(scheduler.poll_once().await.unwrap(), 0);
        let view = store.job(job.id).await.unwrap();
        assert_eq!(view.status, JobStatus::Running);
        assert_eq!(view.todo_remaining, 3);

        // The fault clears; the next tick picks up where nothing was lost.
        faulting.store(false, std::sync::atomic::Ordering::SeqCst);
        assert_eq!(scheduler.poll_once().await.unwrap(), 3);
        let view = store.job(job.id).await.unwrap();
        assert_eq!(view.status, JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn two_jobs_on_different_releases_advance_in_one_tick() {
        let store = MemoryStore::new();
        store
            .add_dataset("urn:fdc:example.org:ds1", vec![simple_case(1)])
            .await;
        store
            .add_dataset("urn:fdc:example.org:ds2", vec![simple_case(2)])
            .await;
        let release_a = store
            .add_release(
                ApplicationContext::new(["GRU"]),
                vec!["urn:fdc:example.org:ds1".into()],
            )
            .await;
        let release_b = store
            .add_release(
                ApplicationContext::new(["GRU"]),
                vec!["urn:fdc:example.org:ds2".into()],
            )
            .await;
        let job_a = store.create_job(release_a).await.unwrap();
        let job_b = store.create_job(release_b).await.unwrap();

        let scheduler =
            SelectionScheduler::new(store.clone(), SelectAll, WorkerConfig::default());
        assert_eq!(scheduler.poll_once().await.unwrap(), 2);

        for job_id in [job_a.id, job_b.id] {
            assert_matches!(
                store.job(job_id).await.unwrap().status,
                JobStatus::Succeeded
            );
        }
    }
}
