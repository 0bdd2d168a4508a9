//! Repository for the `releases`, `release_datasets`, and
//! `release_specimens` tables.

use sqlx::PgConnection;

use specshare_core::types::DbId;

use crate::models::release::{Release, SelectedSpecimen};

/// Column list for `releases` queries.
const COLUMNS: &str = "id, name, application_codes, created_at, updated_at";

pub struct ReleaseRepo;

impl ReleaseRepo {
    /// Find a release by its ID.
    pub async fn find_by_id(
        conn: &mut PgConnection,
        id: DbId,
    ) -> Result<Option<Release>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM releases WHERE id = $1");
        sqlx::query_as::<_, Release>(&query)
            .bind(id)
            .fetch_optional(conn)
            .await
    }

    /// Row-lock a release inside the current transaction.
    ///
    /// Serializes concurrent job creation per release; returns `false` when
    /// the release does not exist.
    pub async fn lock_row(conn: &mut PgConnection, id: DbId) -> Result<bool, sqlx::Error> {
        let locked = sqlx::query_scalar::<_, DbId>("SELECT id FROM releases WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(conn)
            .await?;
        Ok(locked.is_some())
    }

    /// URIs of the datasets this release draws from.
    pub async fn dataset_uris(
        conn: &mut PgConnection,
        release_id: DbId,
    ) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>(
            "SELECT dataset_uri FROM release_datasets \
             WHERE release_id = $1 ORDER BY dataset_uri",
        )
        .bind(release_id)
        .fetch_all(conn)
        .await
    }

    /// The release's coded application, `None` when the release is unknown.
    pub async fn application_codes(
        conn: &mut PgConnection,
        release_id: DbId,
    ) -> Result<Option<Vec<String>>, sqlx::Error> {
        sqlx::query_scalar::<_, Vec<String>>(
            "SELECT application_codes FROM releases WHERE id = $1",
        )
        .bind(release_id)
        .fetch_optional(conn)
        .await
    }

    /// The release's authoritative selection, for display.
    pub async fn selected_specimens(
        conn: &mut PgConnection,
        release_id: DbId,
    ) -> Result<Vec<SelectedSpecimen>, sqlx::Error> {
        sqlx::query_as::<_, SelectedSpecimen>(
            "SELECT s.id AS specimen_id, s.external_id, s.patient_id \
             FROM release_specimens rs \
             JOIN specimens s ON s.id = rs.specimen_id \
             WHERE rs.release_id = $1 \
             ORDER BY s.id",
        )
        .bind(release_id)
        .fetch_all(conn)
        .await
    }

    /// Union a job's accumulated specimens into the release's selection.
    ///
    /// Additive only; duplicates collapse on the primary key. Returns the
    /// number of newly added rows.
    pub async fn merge_job_selection(
        conn: &mut PgConnection,
        release_id: DbId,
        job_id: DbId,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO release_specimens (release_id, specimen_id) \
             SELECT $1, js.specimen_id FROM select_job_specimens js \
             WHERE js.job_id = $2 \
             ON CONFLICT DO NOTHING",
        )
        .bind(release_id)
        .bind(job_id)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }
}
