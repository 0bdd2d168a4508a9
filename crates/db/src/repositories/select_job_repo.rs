//! Repository for the `select_jobs` table and its owned relations
//! (`select_job_todo`, `select_job_specimens`, `select_job_messages`).
//!
//! Methods take `&mut PgConnection` so the store can compose them into one
//! transaction per batch or lifecycle operation — the atomicity unit the
//! engine's consistency contract relies on.

use sqlx::PgConnection;

use specshare_core::types::DbId;
use specshare_core::JobStatus;

use crate::models::select_job::{RunningJobRow, SelectJobRow};
use crate::models::status::{job_status_id, StatusId};

/// Column list for `select_jobs` queries (aliased `j`), including the live
/// queue and selection counts.
const COLUMNS: &str = "\
    j.id, j.release_id, j.status_id, j.requested_cancellation, \
    j.percent_done, j.initial_todo_count, \
    j.created_at, j.started_at, j.ended_at, \
    (SELECT COUNT(*) FROM select_job_todo t WHERE t.job_id = j.id) AS todo_remaining, \
    (SELECT COUNT(*) FROM select_job_specimens sp WHERE sp.job_id = j.id) AS selected_count";

pub struct SelectJobRepo;

impl SelectJobRepo {
    /// Find a job by its ID.
    pub async fn find_by_id(
        conn: &mut PgConnection,
        id: DbId,
    ) -> Result<Option<SelectJobRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM select_jobs j WHERE j.id = $1");
        sqlx::query_as::<_, SelectJobRow>(&query)
            .bind(id)
            .fetch_optional(conn)
            .await
    }

    /// Find a job by its ID, row-locking it for the current transaction.
    pub async fn find_by_id_for_update(
        conn: &mut PgConnection,
        id: DbId,
    ) -> Result<Option<SelectJobRow>, sqlx::Error> {
        let query =
            format!("SELECT {COLUMNS} FROM select_jobs j WHERE j.id = $1 FOR UPDATE OF j");
        sqlx::query_as::<_, SelectJobRow>(&query)
            .bind(id)
            .fetch_optional(conn)
            .await
    }

    /// Ids of running jobs for a release, row-locked.
    ///
    /// Part of the transactional one-running-job-per-release check; there
    /// is deliberately no uniqueness constraint, because terminal jobs for
    /// the same release coexist as history.
    pub async fn running_ids_for_release(
        conn: &mut PgConnection,
        release_id: DbId,
    ) -> Result<Vec<DbId>, sqlx::Error> {
        sqlx::query_scalar::<_, DbId>(
            "SELECT id FROM select_jobs \
             WHERE release_id = $1 AND status_id = $2 \
             ORDER BY id \
             FOR UPDATE",
        )
        .bind(release_id)
        .bind(job_status_id(JobStatus::Running))
        .fetch_all(conn)
        .await
    }

    /// Insert a running job row. Queue seeding is a separate step inside
    /// the same transaction.
    pub async fn insert_running(
        conn: &mut PgConnection,
        release_id: DbId,
        initial_todo_count: i64,
    ) -> Result<DbId, sqlx::Error> {
        sqlx::query_scalar::<_, DbId>(
            "INSERT INTO select_jobs (release_id, status_id, initial_todo_count) \
             VALUES ($1, $2, $3) \
             RETURNING id",
        )
        .bind(release_id)
        .bind(job_status_id(JobStatus::Running))
        .bind(initial_todo_count)
        .fetch_one(conn)
        .await
    }

    /// Populate the todo queue from a case-id snapshot.
    pub async fn seed_todo(
        conn: &mut PgConnection,
        job_id: DbId,
        case_ids: &[DbId],
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO select_job_todo (job_id, case_id) \
             SELECT $1, unnest($2::BIGINT[]) \
             ON CONFLICT DO NOTHING",
        )
        .bind(job_id)
        .bind(case_ids)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// Claim up to `limit` cases from the head of the todo queue.
    ///
    /// `SKIP LOCKED` keeps a straggling previous claimant from blocking the
    /// batch; callers serialize batches per job, so under the normal
    /// single-poller contract every queued case is visible.
    pub async fn claim_cases(
        conn: &mut PgConnection,
        job_id: DbId,
        limit: i64,
    ) -> Result<Vec<DbId>, sqlx::Error> {
        sqlx::query_scalar::<_, DbId>(
            "SELECT case_id FROM select_job_todo \
             WHERE job_id = $1 \
             ORDER BY case_id \
             LIMIT $2 \
             FOR UPDATE SKIP LOCKED",
        )
        .bind(job_id)
        .bind(limit)
        .fetch_all(conn)
        .await
    }

    /// Remove claimed cases from the todo queue.
    pub async fn remove_todo(
        conn: &mut PgConnection,
        job_id: DbId,
        case_ids: &[DbId],
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM select_job_todo WHERE job_id = $1 AND case_id = ANY($2)",
        )
        .bind(job_id)
        .bind(case_ids)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// Union specimens into the job's accumulated selection. Returns the
    /// number of newly added rows (duplicates collapse).
    pub async fn add_specimens(
        conn: &mut PgConnection,
        job_id: DbId,
        specimen_ids: &[DbId],
    ) -> Result<u64, sqlx::Error> {
        if specimen_ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "INSERT INTO select_job_specimens (job_id, specimen_id) \
             SELECT $1, unnest($2::BIGINT[]) \
             ON CONFLICT DO NOTHING",
        )
        .bind(job_id)
        .bind(specimen_ids)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// Current todo-queue size.
    pub async fn todo_remaining(
        conn: &mut PgConnection,
        job_id: DbId,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM select_job_todo WHERE job_id = $1",
        )
        .bind(job_id)
        .fetch_one(conn)
        .await
    }

    /// Raise the progress percentage. `GREATEST` keeps it monotonic even if
    /// a recomputation lands low.
    pub async fn set_progress(
        conn: &mut PgConnection,
        job_id: DbId,
        percent: i16,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE select_jobs SET percent_done = GREATEST(percent_done, $2) WHERE id = $1",
        )
        .bind(job_id)
        .bind(percent)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Append one progress note to the job's message log.
    pub async fn append_message(
        conn: &mut PgConnection,
        job_id: DbId,
        message: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO select_job_messages (job_id, message) VALUES ($1, $2)")
            .bind(job_id)
            .bind(message)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// The job's messages in append order.
    pub async fn messages(
        conn: &mut PgConnection,
        job_id: DbId,
    ) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>(
            "SELECT message FROM select_job_messages WHERE job_id = $1 ORDER BY id",
        )
        .bind(job_id)
        .fetch_all(conn)
        .await
    }

    /// Flip the cooperative cancellation flag on a running job.
    ///
    /// Returns the number of rows changed: 0 either because the job is not
    /// running or because the flag was already set.
    pub async fn mark_cancellation_requested(
        conn: &mut PgConnection,
        job_id: DbId,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE select_jobs \
             SET requested_cancellation = TRUE \
             WHERE id = $1 AND status_id = $2 AND requested_cancellation = FALSE",
        )
        .bind(job_id)
        .bind(job_status_id(JobStatus::Running))
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// Transition a running job to a terminal status, setting percent 100
    /// and the end timestamp. Returns 0 when the job was not running.
    pub async fn finalize_row(
        conn: &mut PgConnection,
        job_id: DbId,
        status_id: StatusId,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE select_jobs \
             SET status_id = $2, percent_done = 100, ended_at = NOW() \
             WHERE id = $1 AND status_id = $3",
        )
        .bind(job_id)
        .bind(status_id)
        .bind(job_status_id(JobStatus::Running))
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// Historical (non-running) jobs for a release, newest first.
    pub async fn list_previous(
        conn: &mut PgConnection,
        release_id: DbId,
    ) -> Result<Vec<SelectJobRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM select_jobs j \
             WHERE j.release_id = $1 AND j.status_id <> $2 \
             ORDER BY j.created_at DESC, j.id DESC"
        );
        sqlx::query_as::<_, SelectJobRow>(&query)
            .bind(release_id)
            .bind(job_status_id(JobStatus::Running))
            .fetch_all(conn)
            .await
    }

    /// All running jobs across releases, for the poller.
    pub async fn running(conn: &mut PgConnection) -> Result<Vec<RunningJobRow>, sqlx::Error> {
        sqlx::query_as::<_, RunningJobRow>(
            "SELECT id, release_id, requested_cancellation \
             FROM select_jobs WHERE status_id = $1 ORDER BY id",
        )
        .bind(job_status_id(JobStatus::Running))
        .fetch_all(conn)
        .await
    }
}
