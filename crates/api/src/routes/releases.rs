//! Route definitions for the `/releases` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::{releases, select_jobs};
use crate::state::AppState;

/// Routes mounted at `/releases`.
///
/// ```text
/// GET    /{id}               -> get_release
/// GET    /{id}/specimens     -> list_selected_specimens
/// GET    /{id}/select-jobs   -> list_previous_jobs
/// POST   /{id}/select-jobs   -> start_select_job
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{id}", get(releases::get_release))
        .route("/{id}/specimens", get(releases::list_selected_specimens))
        .route(
            "/{id}/select-jobs",
            get(select_jobs::list_previous_jobs).post(select_jobs::start_select_job),
        )
}
