//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that take
//! a `&mut PgConnection`, so they compose inside a single transaction when
//! the caller needs atomicity across steps.

pub mod catalog_repo;
pub mod release_repo;
pub mod select_job_repo;

pub use catalog_repo::CatalogRepo;
pub use release_repo::ReleaseRepo;
pub use select_job_repo::SelectJobRepo;
