//! The time-budgeted batch worker loop.
//!
//! One invocation of [`BatchRunner::run_batches`] performs as many atomic
//! batch steps as the budget allows. Each step is a single store
//! transaction (claim + evaluate + commit), so an interruption — crash,
//! budget expiry, cancellation — lands between batches, never inside one.

use std::time::{Duration, Instant};

use crate::consent::EligibilityPolicy;
use crate::error::CoreError;
use crate::selection::store::SelectionStore;
use crate::types::DbId;

/// One case per commit: the smallest restart granularity. Larger batches
/// trade restart granularity for throughput; the atomicity argument is the
/// same either way.
pub const DEFAULT_BATCH_SIZE: u32 = 1;

pub struct BatchRunner<S, P> {
    store: S,
    policy: P,
    batch_size: u32,
}

impl<S: SelectionStore, P: EligibilityPolicy> BatchRunner<S, P> {
    pub fn new(store: S, policy: P) -> Self {
        Self {
            store,
            policy,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Override the number of cases claimed per atomic step (minimum 1).
    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Work the job's queue until the time budget elapses, the queue
    /// empties, or a step processes zero cases. Returns the number of cases
    /// processed across all committed steps.
    ///
    /// The budget is only checked between steps. Callers must not run two
    /// invocations for the same job concurrently.
    ///
    /// Retryable errors ([`CoreError::PolicyFault`], [`CoreError::Transient`])
    /// propagate with the queue unchanged for the failed step — invoking
    /// again resumes exactly where the last commit left off. A queue that
    /// grows between observations is reported as
    /// [`CoreError::InvariantViolation`], fatal to the job.
    pub async fn run_batches(&self, job_id: DbId, budget: Duration) -> Result<u64, CoreError> {
        let started = Instant::now();
        let mut total: u64 = 0;
        let mut last_remaining: Option<i64> = None;

        loop {
            let outcome = self
                .store
                .process_batch(job_id, self.batch_size, &self.policy)
                .await?;

            if outcome.todo_remaining > outcome.initial_todo_count {
                return Err(CoreError::InvariantViolation {
                    job_id,
                    detail: format!(
                        "todo queue ({}) exceeds initial snapshot ({})",
                        outcome.todo_remaining, outcome.initial_todo_count
                    ),
                });
            }
            if let Some(previous) = last_remaining {
                if outcome.todo_remaining > previous {
                    return Err(CoreError::InvariantViolation {
                        job_id,
                        detail: format!(
                            "todo queue grew between batches ({previous} -> {})",
                            outcome.todo_remaining
                        ),
                    });
                }
            }
            last_remaining = Some(outcome.todo_remaining);

            if outcome.cases_processed == 0 {
                break;
            }
            total += outcome.cases_processed;

            tracing::debug!(
                job_id,
                cases_processed = outcome.cases_processed,
                specimens_selected = outcome.specimens_selected,
                todo_remaining = outcome.todo_remaining,
                "Batch committed",
            );

            if started.elapsed() >= budget {
                break;
            }
        }

        Ok(total)
    }
}
