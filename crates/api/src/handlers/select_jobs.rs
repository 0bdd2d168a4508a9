//! Handlers for selection jobs.
//!
//! Thin plumbing over the lifecycle controller; the controller and store
//! carry the actual semantics (single running job per release, cooperative
//! cancellation, append-only history).

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use specshare_core::types::DbId;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// POST /api/v1/releases/{id}/select-jobs
///
/// Start a selection job for the release. Returns 201 with the created
/// job, or 409 carrying the conflicting job ids when one is already
/// running.
pub async fn start_select_job(
    State(state): State<AppState>,
    Path(release_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let job = state.controller().start_job(release_id).await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: job })))
}

/// GET /api/v1/releases/{id}/select-jobs
///
/// Previous (terminal) jobs for the release, newest first.
pub async fn list_previous_jobs(
    State(state): State<AppState>,
    Path(release_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let jobs = state.controller().list_previous(release_id).await?;
    Ok(Json(DataResponse { data: jobs }))
}

/// GET /api/v1/select-jobs/running
///
/// All running jobs across releases, with their cancellation flags.
pub async fn running_jobs(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let jobs = state.controller().running_jobs().await?;
    Ok(Json(DataResponse { data: jobs }))
}

/// GET /api/v1/select-jobs/{id}
///
/// One job with its progress counters and message log.
pub async fn get_select_job(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let job = state.controller().job(job_id).await?;
    Ok(Json(DataResponse { data: job }))
}

/// POST /api/v1/select-jobs/{id}/cancel
///
/// Request cooperative cancellation of a running job. Idempotent; the
/// worker observes the flag and finalizes the job as cancelled. Returns
/// 204, or 404 when no running job matches.
pub async fn cancel_select_job(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    state.controller().request_cancellation(job_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
