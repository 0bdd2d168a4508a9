//! Postgres-backed [`SelectionStore`].
//!
//! Every trait method is one database transaction, making each batch step
//! and lifecycle operation an all-or-nothing unit: a crash or a policy
//! fault mid-step rolls the transaction back, so the queue/selection
//! bookkeeping can never be observed half-applied.

use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::PgConnection;

use specshare_core::selection::progress::progress_percent;
use specshare_core::types::DbId;
use specshare_core::{
    ApplicationContext, BatchOutcome, CoreError, EligibilityPolicy, FinalOutcome, JobStatus,
    RunningJob, SelectJob, SelectionStore,
};

use crate::models::status::job_status_id;
use crate::repositories::{CatalogRepo, ReleaseRepo, SelectJobRepo};
use crate::DbPool;

/// Map a sqlx error onto the domain taxonomy.
///
/// Serialization/deadlock failures (SQLSTATE 40001, 40P01) become
/// [`CoreError::Transient`]: the transaction applied nothing, so the caller
/// retries the same step. Everything else is internal.
fn map_db_err(err: sqlx::Error) -> CoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if matches!(db_err.code().as_deref(), Some("40001") | Some("40P01")) {
            return CoreError::Transient(db_err.to_string());
        }
    }
    CoreError::Internal(format!("database error: {err}"))
}

/// Durable selection store over a Postgres pool. Cheaply cloneable.
#[derive(Clone)]
pub struct PgSelectionStore {
    pool: DbPool,
}

impl PgSelectionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_job(conn: &mut PgConnection, job_id: DbId) -> Result<SelectJob, CoreError> {
        let row = SelectJobRepo::find_by_id(&mut *conn, job_id)
            .await
            .map_err(map_db_err)?
            .ok_or(CoreError::NotFound {
                entity: "SelectJob",
                id: job_id,
            })?;
        let messages = SelectJobRepo::messages(&mut *conn, job_id)
            .await
            .map_err(map_db_err)?;
        row.into_job(messages)
    }
}

#[async_trait]
impl SelectionStore for PgSelectionStore {
    async fn create_job(&self, release_id: DbId) -> Result<SelectJob, CoreError> {
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;

        // The release row lock serializes concurrent creates per release,
        // so the running-job check below cannot race.
        if !ReleaseRepo::lock_row(&mut tx, release_id)
            .await
            .map_err(map_db_err)?
        {
            return Err(CoreError::NotFound {
                entity: "Release",
                id: release_id,
            });
        }

        let running = SelectJobRepo::running_ids_for_release(&mut tx, release_id)
            .await
            .map_err(map_db_err)?;
        if !running.is_empty() {
            return Err(CoreError::JobAlreadyRunning {
                release_id,
                job_ids: running,
            });
        }

        let uris = ReleaseRepo::dataset_uris(&mut tx, release_id)
            .await
            .map_err(map_db_err)?;
        let case_ids = CatalogRepo::all_cases_for_datasets(&mut tx, &uris)
            .await
            .map_err(map_db_err)?;

        let job_id = SelectJobRepo::insert_running(&mut tx, release_id, case_ids.len() as i64)
            .await
            .map_err(map_db_err)?;
        SelectJobRepo::seed_todo(&mut tx, job_id, &case_ids)
            .await
            .map_err(map_db_err)?;
        SelectJobRepo::append_message(&mut tx, job_id, "Created")
            .await
            .map_err(map_db_err)?;
        tracing::debug!(
            job_id,
            release_id,
            case_count = case_ids.len(),
            "Seeded selection queue",
        );

        let job = Self::load_job(&mut tx, job_id).await?;
        tx.commit().await.map_err(map_db_err)?;
        Ok(job)
    }

    async fn job(&self, job_id: DbId) -> Result<SelectJob, CoreError> {
        let mut conn = self.pool.acquire().await.map_err(map_db_err)?;
        Self::load_job(&mut conn, job_id).await
    }

    async fn running_jobs(&self) -> Result<Vec<RunningJob>, CoreError> {
        let mut conn = self.pool.acquire().await.map_err(map_db_err)?;
        let rows = SelectJobRepo::running(&mut conn).await.map_err(map_db_err)?;
        Ok(rows.into_iter().map(RunningJob::from).collect())
    }

    async fn previous_jobs(&self, release_id: DbId) -> Result<Vec<SelectJob>, CoreError> {
        let mut conn = self.pool.acquire().await.map_err(map_db_err)?;
        let rows = SelectJobRepo::list_previous(&mut conn, release_id)
            .await
            .map_err(map_db_err)?;
        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            let messages = SelectJobRepo::messages(&mut conn, row.id)
                .await
                .map_err(map_db_err)?;
            jobs.push(row.into_job(messages)?);
        }
        Ok(jobs)
    }

    async fn request_cancellation(&self, job_id: DbId) -> Result<SelectJob, CoreError> {
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;

        let row = SelectJobRepo::find_by_id_for_update(&mut tx, job_id)
            .await
            .map_err(map_db_err)?;
        let row = match row {
            Some(row) if row.status_id == job_status_id(JobStatus::Running) => row,
            // Terminal jobs are immutable history; treat them like absent.
            _ => {
                return Err(CoreError::NotFound {
                    entity: "running SelectJob",
                    id: job_id,
                })
            }
        };

        if !row.requested_cancellation {
            SelectJobRepo::mark_cancellation_requested(&mut tx, job_id)
                .await
                .map_err(map_db_err)?;
            SelectJobRepo::append_message(&mut tx, job_id, "Cancellation requested")
                .await
                .map_err(map_db_err)?;
        }

        let job = Self::load_job(&mut tx, job_id).await?;
        tx.commit().await.map_err(map_db_err)?;
        Ok(job)
    }

    async fn process_batch(
        &self,
        job_id: DbId,
        batch_size: u32,
        policy: &dyn EligibilityPolicy,
    ) -> Result<BatchOutcome, CoreError> {
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;

        let row = SelectJobRepo::find_by_id_for_update(&mut tx, job_id)
            .await
            .map_err(map_db_err)?
            .ok_or(CoreError::NotFound {
                entity: "SelectJob",
                id: job_id,
            })?;
        if row.status_id != job_status_id(JobStatus::Running) {
            return Err(CoreError::Conflict(format!(
                "SelectJob {job_id} is not running"
            )));
        }

        let claimed =
            SelectJobRepo::claim_cases(&mut tx, job_id, i64::from(batch_size.max(1)))
                .await
                .map_err(map_db_err)?;
        if claimed.is_empty() {
            return Ok(BatchOutcome {
                cases_processed: 0,
                specimens_selected: 0,
                initial_todo_count: row.initial_todo_count,
                todo_remaining: row.todo_remaining,
            });
        }

        let codes = ReleaseRepo::application_codes(&mut tx, row.release_id)
            .await
            .map_err(map_db_err)?
            .ok_or_else(|| {
                CoreError::Internal(format!(
                    "release {} missing for job {job_id}",
                    row.release_id
                ))
            })?;
        let application = ApplicationContext { codes };

        let cases = CatalogRepo::materialize(&mut tx, &claimed)
            .await
            .map_err(map_db_err)?;

        // Evaluate before any mutation: a policy fault here drops the
        // transaction and the claimed cases stay queued.
        let mut picked: Vec<DbId> = Vec::new();
        for case in &cases {
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

        let materialized: HashSet<DbId> = cases.iter().map(|c| c.id).collect();

        let specimens_selected = SelectJobRepo::add_specimens(&mut tx, job_id, &picked)
            .await
            .map_err(map_db_err)?;
        SelectJobRepo::remove_todo(&mut tx, job_id, &claimed)
            .await
            .map_err(map_db_err)?;
        for case_id in claimed.iter().filter(|id| !materialized.contains(id)) {
            SelectJobRepo::append_message(
                &mut tx,
                job_id,
                &format!("Case {case_id} not found in catalog; recorded with no specimens"),
            )
            .await
            .map_err(map_db_err)?;
        }

        let todo_remaining = SelectJobRepo::todo_remaining(&mut tx, job_id)
            .await
            .map_err(map_db_err)?;
        let percent = progress_percent(row.initial_todo_count, todo_remaining);
        SelectJobRepo::set_progress(&mut tx, job_id, percent)
            .await
            .map_err(map_db_err)?;

        tx.commit().await.map_err(map_db_err)?;

        Ok(BatchOutcome {
            cases_processed: claimed.len() as u64,
            specimens_selected,
            initial_todo_count: row.initial_todo_count,
            todo_remaining,
        })
    }

    async fn finalize(
        &self,
        job_id: DbId,
        outcome: FinalOutcome,
        note: Option<&str>,
    ) -> Result<SelectJob, CoreError> {
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;

        let row = SelectJobRepo::find_by_id_for_update(&mut tx, job_id)
            .await
            .map_err(map_db_err)?
            .ok_or(CoreError::NotFound {
                entity: "SelectJob",
                id: job_id,
            })?;
        if row.status_id != job_status_id(JobStatus::Running) {
            return Err(CoreError::Conflict(format!(
                "SelectJob {job_id} is already terminal"
            )));
        }

        // The ONLY write path into the release's selection.
        if outcome == FinalOutcome::Succeeded {
            ReleaseRepo::merge_job_selection(&mut tx, row.release_id, job_id)
                .await
                .map_err(map_db_err)?;
        }

        let updated =
            SelectJobRepo::finalize_row(&mut tx, job_id, job_status_id(outcome.status()))
                .await
                .map_err(map_db_err)?;
        if updated == 0 {
            return Err(CoreError::Internal(format!(
                "finalize raced on locked job {job_id}"
            )));
        }

        let closing = match outcome {
            FinalOutcome::Succeeded => format!(
                "Selection succeeded: {} specimen(s) merged into release",
                row.selected_count
            ),
            FinalOutcome::Cancelled => {
                "Selection cancelled; accumulated specimens were not merged".to_string()
            }
            FinalOutcome::Failed => "Selection failed".to_string(),
        };
        SelectJobRepo::append_message(&mut tx, job_id, &closing)
            .await
            .map_err(map_db_err)?;
        if let Some(note) = note {
            SelectJobRepo::append_message(&mut tx, job_id, note)
                .await
                .map_err(map_db_err)?;
        }

        let job = Self::load_job(&mut tx, job_id).await?;
        tx.commit().await.map_err(map_db_err)?;
        Ok(job)
    }
}
