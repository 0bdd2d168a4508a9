//! The durable job-record seam.
//!
//! The engine mutates selection state exclusively through this trait; every
//! method is an atomic all-or-nothing unit against the backing store.
//! `specshare-db` provides the Postgres implementation,
//! [`super::memory::MemoryStore`] the in-process one.

use async_trait::async_trait;

use crate::consent::EligibilityPolicy;
use crate::error::CoreError;
use crate::selection::{FinalOutcome, RunningJob, SelectJob};
use crate::types::DbId;

/// Effect of one atomic batch step.
#[derive(Debug, Clone, Copy)]
pub struct BatchOutcome {
    /// Cases claimed and durably committed in this step. Zero means the
    /// queue was empty.
    pub cases_processed: u64,
    /// Specimens judged selectable and added to the job's accumulated set.
    pub specimens_selected: u64,
    /// Queue-size snapshot at job creation.
    pub initial_todo_count: i64,
    /// Queue size after this step's commit.
    pub todo_remaining: i64,
}

/// Durable persisted state for selection jobs.
///
/// Callers must serialize `process_batch` invocations per job id; the store
/// only guarantees atomicity of each individual call.
#[async_trait]
pub trait SelectionStore: Send + Sync {
    /// Create a running job for the release, snapshotting the full case set
    /// of the release's datasets into the todo queue.
    ///
    /// Atomic: verifies no job is currently running for the release (error
    /// [`CoreError::JobAlreadyRunning`] with the conflicting ids otherwise),
    /// then creates the job with percent 0 and a "Created" message.
    async fn create_job(&self, release_id: DbId) -> Result<SelectJob, CoreError>;

    /// Fetch one job, including its messages.
    async fn job(&self, job_id: DbId) -> Result<SelectJob, CoreError>;

    /// All currently running jobs across releases.
    async fn running_jobs(&self) -> Result<Vec<RunningJob>, CoreError>;

    /// Non-running (historical) jobs for a release, newest first.
    async fn previous_jobs(&self, release_id: DbId) -> Result<Vec<SelectJob>, CoreError>;

    /// Set the cooperative cancellation flag on a running job. Idempotent;
    /// `NotFound` when no running job matches.
    async fn request_cancellation(&self, job_id: DbId) -> Result<SelectJob, CoreError>;

    /// One atomic batch step: claim up to `batch_size` cases from the todo
    /// queue, evaluate every specimen of every claimed case via `policy`,
    /// and commit the effect (selection grows, queue shrinks, progress
    /// recomputed) as a single unit.
    ///
    /// A policy fault aborts the step with nothing applied; the same cases
    /// will be claimed again on retry.
    async fn process_batch(
        &self,
        job_id: DbId,
        batch_size: u32,
        policy: &dyn EligibilityPolicy,
    ) -> Result<BatchOutcome, CoreError>;

    /// Transition a running job to its terminal status, exactly once.
    ///
    /// On [`FinalOutcome::Succeeded`] the job's accumulated specimens are
    /// unioned into the release's selection; on any other outcome the
    /// release is left untouched. Always sets percent 100 and the end
    /// timestamp, and appends a closing message (plus `note`, if given).
    async fn finalize(
        &self,
        job_id: DbId,
        outcome: FinalOutcome,
        note: Option<&str>,
    ) -> Result<SelectJob, CoreError>;
}
