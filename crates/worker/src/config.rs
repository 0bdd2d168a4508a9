use std::time::Duration;

/// Worker configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often the scheduler polls for running jobs (default: 1s).
    pub poll_interval: Duration,
    /// Per-tick time budget handed to the batch loop for each job
    /// (default: 10s).
    pub batch_budget: Duration,
    /// Cases claimed per atomic batch commit (default: 1 — the smallest
    /// restart granularity).
    pub batch_size: u32,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var             | Default |
    /// |---------------------|---------|
    /// | `POLL_INTERVAL_SECS`| `1`     |
    /// | `BATCH_BUDGET_SECS` | `10`    |
    /// | `BATCH_SIZE`        | `1`     |
    pub fn from_env() -> Self {
        let poll_interval_secs: u64 = std::env::var("POLL_INTERVAL_SECS")
            .unwrap_or_else(|_| "1".into())
            .parse()
            .expect("POLL_INTERVAL_SECS must be a valid u64");

        let batch_budget_secs: u64 = std::env::var("BATCH_BUDGET_SECS")
            .unwrap_or_else(|_| "10".into())
            .parse()
            .expect("BATCH_BUDGET_SECS must be a valid u64");

        let batch_size: u32 = std::env::var("BATCH_SIZE")
            .unwrap_or_else(|_| "1".into())
            .parse()
            .expect("BATCH_SIZE must be a valid u32");

        Self {
            poll_interval: Duration::from_secs(poll_interval_secs),
            batch_budget: Duration::from_secs(batch_budget_secs),
            batch_size: batch_size.max(1),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            batch_budget: Duration::from_secs(10),
            batch_size: 1,
        }
    }
}
