//! Route definitions for the `/select-jobs` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::select_jobs;
use crate::state::AppState;

/// Routes mounted at `/select-jobs`.
///
/// ```text
/// GET    /running        -> running_jobs
/// GET    /{id}           -> get_select_job
/// POST   /{id}/cancel    -> cancel_select_job
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/running", get(select_jobs::running_jobs))
        .route("/{id}", get(select_jobs::get_select_job))
        .route("/{id}/cancel", post(select_jobs::cancel_select_job))
}
