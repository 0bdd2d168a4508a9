//! In-process [`SelectionStore`] backed by a mutex.
//!
//! Provides the same per-call atomicity as the Postgres store (every
//! operation runs under one lock acquisition) and is what the engine and
//! scheduler tests drive. Catalog content is seeded through
//! [`MemoryStore::add_dataset`] / [`MemoryStore::add_release`].

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::cases::CaseDetail;
use crate::consent::{ApplicationContext, EligibilityPolicy};
use crate::error::CoreError;
use crate::selection::progress::progress_percent;
use crate::selection::store::{BatchOutcome, SelectionStore};
use crate::selection::{FinalOutcome, JobStatus, RunningJob, SelectJob};
use crate::types::{DbId, Timestamp};

#[derive(Default)]
struct ReleaseState {
    application: ApplicationContext,
    dataset_uris: Vec<String>,
    selected: BTreeSet<DbId>,
}

struct JobState {
    release_id: DbId,
    status: JobStatus,
    requested_cancellation: bool,
    percent_done: i16,
    initial_todo_count: i64,
    todo: VecDeque<DbId>,
    processed: BTreeSet<DbId>,
    selected: BTreeSet<DbId>,
    messages: Vec<String>,
    created_at: Timestamp,
    started_at: Timestamp,
    ended_at: Option<Timestamp>,
}

impl JobState {
    fn to_job(&self, id: DbId) -> SelectJob {
        SelectJob {
            id,
            release_id: self.release_id,
            status: self.status,
            requested_cancellation: self.requested_cancellation,
            percent_done: self.percent_done,
            initial_todo_count: self.initial_todo_count,
            todo_remaining: self.todo.len() as i64,
            selected_count: self.selected.len() as i64,
            created_at: self.created_at,
            started_at: self.started_at,
            ended_at: self.ended_at,
            messages: self.messages.clone(),
        }
    }

    /// `|todo| + processed == initial` must hold at every commit point.
    fn check_invariant(&self, id: DbId) -> Result<(), CoreError> {
        let observed = self.todo.len() as i64 + self.processed.len() as i64;
        if observed != self.initial_todo_count {
            return Err(CoreError::InvariantViolation {
                job_id: id,
                detail: format!(
                    "todo ({}) + processed ({}) != initial ({})",
                    self.todo.len(),
                    self.processed.len(),
                    self.initial_todo_count
                ),
            });
        }
        Ok(())
    }
}

#[derive(Default)]
struct Inner {
    next_id: DbId,
    cases: HashMap<DbId, CaseDetail>,
    dataset_cases: BTreeMap<String, Vec<DbId>>,
    releases: BTreeMap<DbId, ReleaseState>,
    jobs: BTreeMap<DbId, JobState>,
}

impl Inner {
    fn alloc_id(&mut self) -> DbId {
        self.next_id += 1;
        self.next_id
    }
}

/// Mutex-guarded in-memory selection store.
///
/// Cheaply cloneable; clones share state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a dataset and its full case hierarchy under `uri`.
    pub async fn add_dataset(&self, uri: impl Into<String>, cases: Vec<CaseDetail>) {
        let mut g = self.inner.lock().await;
        let uri = uri.into();
        let ids: Vec<DbId> = cases.iter().map(|c| c.id).collect();
        for case in cases {
            g.cases.insert(case.id, case);
        }
        g.dataset_cases.entry(uri).or_default().extend(ids);
    }

    /// Create a release drawing from `dataset_uris` with the given coded
    /// application. Returns the release id.
    pub async fn add_release(
        &self,
        application: ApplicationContext,
        dataset_uris: Vec<String>,
    ) -> DbId {
        let mut g = self.inner.lock().await;
        let id = g.alloc_id();
        g.releases.insert(
            id,
            ReleaseState {
                application,
                dataset_uris,
                selected: BTreeSet::new(),
            },
        );
        id
    }

    /// The release's authoritative selection, sorted by specimen id.
    pub async fn release_selection(&self, release_id: DbId) -> Result<Vec<DbId>, CoreError> {
        let g = self.inner.lock().await;
        let release = g.releases.get(&release_id).ok_or(CoreError::NotFound {
            entity: "Release",
            id: release_id,
        })?;
        Ok(release.selected.iter().copied().collect())
    }

    /// The job's accumulated (possibly unmerged) selection.
    pub async fn job_selection(&self, job_id: DbId) -> Result<Vec<DbId>, CoreError> {
        let g = self.inner.lock().await;
        let job = g.jobs.get(&job_id).ok_or(CoreError::NotFound {
            entity: "SelectJob",
            id: job_id,
        })?;
        Ok(job.selected.iter().copied().collect())
    }
}

#[async_trait]
impl SelectionStore for MemoryStore {
    async fn create_job(&self, release_id: DbId) -> Result<SelectJob, CoreError> {
        let mut g = self.inner.lock().await;

        let running: Vec<DbId> = g
            .jobs
            .iter()
            .filter(|(_, j)| j.release_id == release_id && j.status == JobStatus::Running)
            .map(|(id, _)| *id)
            .collect();
        if !running.is_empty() {
            return Err(CoreError::JobAlreadyRunning {
                release_id,
                job_ids: running,
            });
        }

        let release = g.releases.get(&release_id).ok_or(CoreError::NotFound {
            entity: "Release",
            id: release_id,
        })?;

        let mut snapshot: Vec<DbId> = Vec::new();
        for uri in &release.dataset_uris {
            if let Some(ids) = g.dataset_cases.get(uri) {
                snapshot.extend(ids.iter().copied());
            }
        }

        let now = Utc::now();
        let id = g.alloc_id();
        let job = JobState {
            release_id,
            status: JobStatus::Running,
            requested_cancellation: false,
            percent_done: 0,
            initial_todo_count: snapshot.len() as i64,
            todo: snapshot.into(),
            processed: BTreeSet::new(),
            selected: BTreeSet::new(),
            messages: vec!["Created".to_string()],
            created_at: now,
            started_at: now,
            ended_at: None,
        };
        let view = job.to_job(id);
        g.jobs.insert(id, job);
        Ok(view)
    }

    async fn job(&self, job_id: DbId) -> Result<SelectJob, CoreError> {
        let g = self.inner.lock().await;
        let job = g.jobs.get(&job_id).ok_or(CoreError::NotFound {
            entity: "SelectJob",
            id: job_id,
        })?;
        Ok(job.to_job(job_id))
    }

    async fn running_jobs(&self) -> Result<Vec<RunningJob>, CoreError> {
        let g = self.inner.lock().await;
        Ok(g.jobs
            .iter()
            .filter(|(_, j)| j.status == JobStatus::Running)
            .map(|(id, j)| RunningJob {
                job_id: *id,
                release_id: j.release_id,
                requested_cancellation: j.requested_cancellation,
            })
            .collect())
    }

    async fn previous_jobs(&self, release_id: DbId) -> Result<Vec<SelectJob>, CoreError> {
        let g = self.inner.lock().await;
        let mut jobs: Vec<SelectJob> = g
            .jobs
            .iter()
            .filter(|(_, j)| j.release_id == release_id && j.status.is_terminal())
            .map(|(id, j)| j.to_job(*id))
            .collect();
        jobs.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(jobs)
    }

    async fn request_cancellation(&self, job_id: DbId) -> Result<SelectJob, CoreError> {
        let mut g = self.inner.lock().await;
        let job = match g.jobs.get_mut(&job_id) {
            Some(job) if job.status == JobStatus::Running => job,
            _ => {
                return Err(CoreError::NotFound {
                    entity: "running SelectJob",
                    id: job_id,
                })
            }
        };
        if !job.requested_cancellation {
            job.requested_cancellation = true;
            job.messages.push("Cancellation requested".to_string());
        }
        Ok(job.to_job(job_id))
    }

    async fn process_batch(
        &self,
        job_id: DbId,
        batch_size: u32,
        policy: &dyn EligibilityPolicy,
    ) -> Result<BatchOutcome, CoreError> {
        let mut g = self.inner.lock().await;
        let g = &mut *g;

        // Claim phase: read everything the evaluation needs.
        let (claimed, application, initial) = {
            let job = g.jobs.get(&job_id).ok_or(CoreError::NotFound {
                entity: "SelectJob",
                id: job_id,
            })?;
            if job.status != JobStatus::Running {
                return Err(CoreError::Conflict(format!(
                    "SelectJob {job_id} is not running"
                )));
            }
            let release = g
                .releases
                .get(&job.release_id)
                .ok_or_else(|| CoreError::Internal(format!(
                    "release {} missing for job {job_id}",
                    job.release_id
                )))?;
            let claimed: Vec<DbId> = job
                .todo
                .iter()
                .take(batch_size.max(1) as usize)
                .copied()
                .collect();
            (claimed, release.application.clone(), job.initial_todo_count)
        };

        if claimed.is_empty() {
            return Ok(BatchOutcome {
                cases_processed: 0,
                specimens_selected: 0,
                initial_todo_count: initial,
                todo_remaining: 0,
            });
        }

        // Evaluation phase: no mutation yet, so a policy fault here leaves
        // the store exactly as it was.
        let mut picked: Vec<DbId> = Vec::new();
        let mut missing: Vec<DbId> = Vec::new();
        for case_id in &claimed {
            let Some(case) = g.cases.get(case_id) else {
                missing.push(*case_id);
                continue;
            };
            for patient in &case.patients {
                for specimen in &patient.specimens {
                    if policy
                        .is_selectable(&application, case, patient, specimen)
                        .await?
                    {
                        picked.push(specimen.id);
                    }
                }
            }
        }

        // Commit phase.
        let job = g
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| CoreError::Internal(format!("job {job_id} vanished mid-batch")))?;
        job.todo.retain(|id| !claimed.contains(id));
        job.processed.extend(claimed.iter().copied());
        let mut added: u64 = 0;
        for specimen_id in picked {
            if job.selected.insert(specimen_id) {
                added += 1;
            }
        }
        for case_id in &missing {
            job.messages
                .push(format!("Case {case_id} not found in catalog; recorded with no specimens"));
        }
        let remaining = job.todo.len() as i64;
        job.percent_done = job.percent_done.max(progress_percent(initial, remaining));
        job.check_invariant(job_id)?;

        Ok(BatchOutcome {
            cases_processed: claimed.len() as u64,
            specimens_selected: added,
            initial_todo_count: initial,
            todo_remaining: remaining,
        })
    }

    async fn finalize(
        &self,
        job_id: DbId,
        outcome: FinalOutcome,
        note: Option<&str>,
    ) -> Result<SelectJob, CoreError> {
        let mut g = self.inner.lock().await;
        let g = &mut *g;

        let (release_id, accumulated) = {
            let job = g.jobs.get(&job_id).ok_or(CoreError::NotFound {
                entity: "SelectJob",
                id: job_id,
            })?;
            if job.status != JobStatus::Running {
                return Err(CoreError::Conflict(format!(
                    "SelectJob {job_id} is already terminal"
                )));
            }
            (job.release_id, job.selected.clone())
        };

        if outcome == FinalOutcome::Succeeded {
            let release = g
                .releases
                .get_mut(&release_id)
                .ok_or_else(|| CoreError::Internal(format!(
                    "release {release_id} missing for job {job_id}"
                )))?;
            release.selected.extend(accumulated.iter().copied());
        }

        let job = g
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| CoreError::Internal(format!("job {job_id} vanished in finalize")))?;
        job.status = outcome.status();
        job.percent_done = 100;
        job.ended_at = Some(Utc::now());
        job.messages.push(match outcome {
            FinalOutcome::Succeeded => format!(
                "Selection succeeded: {} specimen(s) merged into release",
                accumulated.len()
            ),
            FinalOutcome::Cancelled => {
                "Selection cancelled; accumulated specimens were not merged".to_string()
            }
            FinalOutcome::Failed => "Selection failed".to_string(),
        });
        if let Some(note) = note {
            job.messages.push(note.to_string());
        }

        Ok(job.to_job(job_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cases::{PatientDetail, SpecimenDetail};
    use assert_matches::assert_matches;

    /// One case with one patient and one specimen; ids derived from the
    /// case id so they stay unique across cases.
    fn simple_case(case_id: DbId) -> CaseDetail {
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

    async fn seeded_store(case_count: DbId) -> (MemoryStore, DbId) {
        let store = MemoryStore::new();
        let cases: Vec<CaseDetail> = (1..=case_count).map(simple_case).collect();
        store.add_dataset("urn:fdc:example.org:ds1", cases).await;
        let release_id = store
            .add_release(
                ApplicationContext::new(["GRU"]),
                vec!["urn:fdc:example.org:ds1".into()],
            )
            .await;
        (store, release_id)
    }

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

    #[tokio::test]
    async fn create_job_snapshots_the_case_set() {
        let (store, release_id) = seeded_store(4).await;
        let job = store.create_job(release_id).await.unwrap();

        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.initial_todo_count, 4);
        assert_eq!(job.todo_remaining, 4);
        assert_eq!(job.selected_count, 0);
        assert_eq!(job.percent_done, 0);
        assert_eq!(job.messages, vec!["Created".to_string()]);
    }

    #[tokio::test]
    async fn create_job_for_unknown_release_is_not_found() {
        let store = MemoryStore::new();
        assert_matches!(
            store.create_job(999).await,
            Err(CoreError::NotFound { entity: "Release", .. })
        );
    }

    #[tokio::test]
    async fn queue_invariant_holds_at_every_batch_commit() {
        let (store, release_id) = seeded_store(6).await;
        let job = store.create_job(release_id).await.unwrap();

        for step in 1..=6 {
            let out = store.process_batch(job.id, 1, &SelectAll).await.unwrap();
            assert_eq!(out.cases_processed, 1);
            assert_eq!(out.todo_remaining, 6 - step);
            let view = store.job(job.id).await.unwrap();
            assert_eq!(view.todo_remaining + view.processed(), view.initial_todo_count);
        }

        let out = store.process_batch(job.id, 1, &SelectAll).await.unwrap();
        assert_eq!(out.cases_processed, 0);
    }

    #[tokio::test]
    async fn missing_catalog_case_is_recorded_not_retried() {
        let store = MemoryStore::new();
        store
            .add_dataset("urn:fdc:example.org:ds1", vec![simple_case(1)])
            .await;
        // Point the dataset at a second case that has no catalog entry.
        {
            let mut g = store.inner.lock().await;
            g.dataset_cases
                .get_mut("urn:fdc:example.org:ds1")
                .unwrap()
                .push(2);
        }
        let release_id = store
            .add_release(
                ApplicationContext::new(["GRU"]),
                vec!["urn:fdc:example.org:ds1".into()],
            )
            .await;
        let job = store.create_job(release_id).await.unwrap();
        assert_eq!(job.initial_todo_count, 2);

        store.process_batch(job.id, 2, &SelectAll).await.unwrap();
        let view = store.job(job.id).await.unwrap();
        assert_eq!(view.todo_remaining, 0);
        assert_eq!(view.selected_count, 1);
        assert!(view
            .messages
            .iter()
            .any(|m| m.contains("not found in catalog")));
    }

    #[tokio::test]
    async fn cancellation_flag_is_idempotent_and_message_logged_once() {
        let (store, release_id) = seeded_store(2).await;
        let job = store.create_job(release_id).await.unwrap();

        let first = store.request_cancellation(job.id).await.unwrap();
        assert!(first.requested_cancellation);
        let second = store.request_cancellation(job.id).await.unwrap();
        assert!(second.requested_cancellation);
        assert_eq!(
            second
                .messages
                .iter()
                .filter(|m| *m == "Cancellation requested")
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn cancellation_of_terminal_job_is_not_found() {
        let (store, release_id) = seeded_store(1).await;
        let job = store.create_job(release_id).await.unwrap();
        store
            .finalize(job.id, FinalOutcome::Failed, None)
            .await
            .unwrap();

        assert_matches!(
            store.request_cancellation(job.id).await,
            Err(CoreError::NotFound { .. })
        );
    }

    #[tokio::test]
    async fn successive_jobs_union_into_the_release() {
        let (store, release_id) = seeded_store(3).await;

        let first = store.create_job(release_id).await.unwrap();
        while store
            .process_batch(first.id, 1, &SelectAll)
            .await
            .unwrap()
            .cases_processed
            > 0
        {}
        store
            .finalize(first.id, FinalOutcome::Succeeded, None)
            .await
            .unwrap();
        assert_eq!(
            store.release_selection(release_id).await.unwrap(),
            vec![100, 200, 300]
        );

        // A second run over the same catalog merges the same set; the union
        // collapses duplicates.
        let second = store.create_job(release_id).await.unwrap();
        while store
            .process_batch(second.id, 1, &SelectAll)
            .await
            .unwrap()
            .cases_processed
            > 0
        {}
        store
            .finalize(second.id, FinalOutcome::Succeeded, None)
            .await
            .unwrap();
        assert_eq!(
            store.release_selection(release_id).await.unwrap(),
            vec![100, 200, 300]
        );
    }
}
