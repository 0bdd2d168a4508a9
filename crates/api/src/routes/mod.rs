pub mod health;
pub mod releases;
pub mod select_jobs;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /releases/{id}                     release detail
/// /releases/{id}/specimens           authoritative selection
/// /releases/{id}/select-jobs         list previous (GET), start (POST)
///
/// /select-jobs/running               running jobs + cancellation flags
/// /select-jobs/{id}                  job detail with messages
/// /select-jobs/{id}/cancel           request cancellation (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/releases", releases::router())
        .nest("/select-jobs", select_jobs::router())
}
