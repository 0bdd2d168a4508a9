//! Specshare domain core.
//!
//! Pure domain logic for the controlled-release portal: the case/patient/
//! specimen hierarchy, consent-gated eligibility evaluation, and the
//! resumable selection-job engine. This crate never talks to the database
//! directly — durable state goes through the [`SelectionStore`] seam, which
//! `specshare-db` implements over Postgres and [`MemoryStore`] implements
//! in-process.

pub mod cases;
pub mod consent;
pub mod error;
pub mod selection;
pub mod types;

pub use cases::{CaseDetail, PatientDetail, SpecimenDetail};
pub use consent::{ApplicationContext, ConsentCodePolicy, EligibilityPolicy};
pub use error::CoreError;
pub use selection::batch::{BatchRunner, DEFAULT_BATCH_SIZE};
pub use selection::lifecycle::SelectionController;
pub use selection::memory::MemoryStore;
pub use selection::store::{BatchOutcome, SelectionStore};
pub use selection::{FinalOutcome, JobStatus, RunningJob, SelectJob};
pub use types::{DbId, Timestamp};
