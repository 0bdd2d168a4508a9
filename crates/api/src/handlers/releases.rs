//! Handlers for the `/releases` resource.
//!
//! Read-only display of a release and its authoritative selection; the
//! selection itself only ever changes through job finalization.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use specshare_core::types::DbId;
use specshare_core::CoreError;
use specshare_db::repositories::ReleaseRepo;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/releases/{id}
pub async fn get_release(
    State(state): State<AppState>,
    Path(release_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let mut conn = state.pool.acquire().await?;
    let release = ReleaseRepo::find_by_id(&mut conn, release_id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "Release",
            id: release_id,
        }))?;
    Ok(Json(DataResponse { data: release }))
}

/// GET /api/v1/releases/{id}/specimens
///
/// The release's current selection — what the researcher is entitled to
/// see and download.
pub async fn list_selected_specimens(
    State(state): State<AppState>,
    Path(release_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let mut conn = state.pool.acquire().await?;
    if ReleaseRepo::find_by_id(&mut conn, release_id).await?.is_none() {
        return Err(AppError::Core(CoreError::NotFound {
            entity: "Release",
            id: release_id,
        }));
    }
    let specimens = ReleaseRepo::selected_specimens(&mut conn, release_id).await?;
    Ok(Json(DataResponse { data: specimens }))
}
