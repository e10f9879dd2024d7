//! Search API endpoints.

use axum::extract::State;
use serde::{Deserialize, Serialize};

use super::{success, ApiResult, Query};
use crate::errors::AppError;
use crate::models::{Machine, Sensor};
use crate::search::{KIND_MACHINE, KIND_SENSOR, MAX_RESULT_WINDOW};
use crate::AppState;

/// `?q=&limit=&offset=` for catalog search.
#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    /// Defaults to 20, capped at 100.
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

const DEFAULT_SEARCH_LIMIT: usize = 20;
const MAX_SEARCH_LIMIT: usize = 100;
const MAX_SEARCH_OFFSET: usize = MAX_RESULT_WINDOW - MAX_SEARCH_LIMIT;

/// Search results and paging metadata.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub results: Vec<SearchResultItem>,
    /// Matches across all pages.
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

/// A matched catalog entry.
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SearchResultItem {
    Machine { machine: Machine, score: f32 },
    Sensor { sensor: Sensor, score: f32 },
}

/// GET /api/search - Search machines and sensors.
pub async fn search_catalog(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> ApiResult<SearchResponse> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_SEARCH_LIMIT)
        .min(MAX_SEARCH_LIMIT);
    if params.offset > MAX_SEARCH_OFFSET {
        return Err(AppError::Validation(format!(
            "offset cannot exceed {}",
            MAX_SEARCH_OFFSET
        )));
    }
    let found = state.search.search(&params.q, limit, params.offset)?;

    // Entries deleted since indexing are skipped.
    let mut results = Vec::with_capacity(found.hits.len());
    for hit in found.hits {
        let item = match hit.kind.as_str() {
            KIND_MACHINE => state
                .repo
                .get_machine(&hit.id)
                .await?
                .map(|machine| SearchResultItem::Machine {
                    machine,
                    score: hit.score,
                }),
            KIND_SENSOR => state
                .repo
                .get_sensor(&hit.id)
                .await?
                .map(|sensor| SearchResultItem::Sensor {
                    sensor,
                    score: hit.score,
                }),
            _ => None,
        };
        results.extend(item);
    }

    success(SearchResponse {
        results,
        total: found.total,
        limit,
        offset: params.offset,
    })
}
