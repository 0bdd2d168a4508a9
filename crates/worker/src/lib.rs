//! Specshare selection worker.
//!
//! Hosts the [`SelectionScheduler`]: the single poller that drives every
//! running selection job through the batch loop and finalizes jobs when
//! their queue drains or cancellation is requested.

pub mod config;
pub mod scheduler;

pub use config::WorkerConfig;
pub use scheduler::SelectionScheduler;
