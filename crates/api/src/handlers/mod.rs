pub mod health;
pub mod releases;
pub mod select_jobs;
