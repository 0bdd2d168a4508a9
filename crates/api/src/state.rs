use std::sync::Arc;

use specshare_core::SelectionController;
use specshare_db::PgSelectionStore;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via
/// `State<AppState>`.
///
/// Cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: specshare_db::DbPool,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Lifecycle controller over the durable Postgres store.
    ///
    /// Construction is cheap (the store wraps the pool), so handlers build
    /// one per request instead of sharing a long-lived instance.
    pub fn controller(&self) -> SelectionController<PgSelectionStore> {
        SelectionController::new(PgSelectionStore::new(self.pool.clone()))
    }
}
