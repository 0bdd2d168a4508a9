//! Selection-job row models.

use specshare_core::types::{DbId, Timestamp};
use specshare_core::{CoreError, RunningJob, SelectJob};
use sqlx::FromRow;

use super::status::{job_status_from_id, StatusId};

/// A row from the `select_jobs` table, enriched with the live queue and
/// selection counts.
#[derive(Debug, Clone, FromRow)]
pub struct SelectJobRow {
    pub id: DbId,
    pub release_id: DbId,
    pub status_id: StatusId,
    pub requested_cancellation: bool,
    pub percent_done: i16,
    pub initial_todo_count: i64,
    pub created_at: Timestamp,
    pub started_at: Timestamp,
    pub ended_at: Option<Timestamp>,
    pub todo_remaining: i64,
    pub selected_count: i64,
}

impl SelectJobRow {
    /// Convert into the domain view, attaching the job's messages.
    pub fn into_job(self, messages: Vec<String>) -> Result<SelectJob, CoreError> {
        let status = job_status_from_id(self.status_id).ok_or_else(|| {
            CoreError::Internal(format!(
                "select job {} has unknown status id {}",
                self.id, self.status_id
            ))
        })?;
        Ok(SelectJob {
            id: self.id,
            release_id: self.release_id,
            status,
            requested_cancellation: self.requested_cancellation,
            percent_done: self.percent_done,
            initial_todo_count: self.initial_todo_count,
            todo_remaining: self.todo_remaining,
            selected_count: self.selected_count,
            created_at: self.created_at,
            started_at: self.started_at,
            ended_at: self.ended_at,
            messages,
        })
    }
}

/// Compact row backing the poller's running-jobs view.
#[derive(Debug, Clone, FromRow)]
pub struct RunningJobRow {
    pub id: DbId,
    pub release_id: DbId,
    pub requested_cancellation: bool,
}

impl From<RunningJobRow> for RunningJob {
    fn from(row: RunningJobRow) -> Self {
        RunningJob {
            job_id: row.id,
            release_id: row.release_id,
            requested_cancellation: row.requested_cancellation,
        }
    }
}
