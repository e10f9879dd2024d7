//! Administration endpoints.

use axum::extract::State;

use super::{success, ApiResult};
use crate::db::OutboundMail;
use crate::AppState;

/// GET /api/admin/outbox - Queued notification mails.
pub async fn list_outbox(State(state): State<AppState>) -> ApiResult<Vec<OutboundMail>> {
    success(state.repo.list_outbox().await?)
}

/// POST /api/admin/search/rebuild - Rebuild the search index from the database.
pub async fn rebuild_search(State(state): State<AppState>) -> ApiResult<usize> {
    let machines = state.repo.list_machines().await?;
    let sensors = state.repo.list_sensors().await?;
    state.search.rebuild(&machines, &sensors).await?;
    success(machines.len() + sensors.len())
}
