//! Sensor catalog endpoints.

use axum::extract::{Path, State};

use super::{success, ApiResult, Json, Query};
use crate::errors::AppError;
use crate::models::{CreateSensorRequest, Page, Sensor, SensorFilter, UpdateSensorRequest};
use crate::AppState;

/// GET /api/sensors - List sensors matching the filter.
pub async fn list_sensors(
    State(state): State<AppState>,
    Query(filter): Query<SensorFilter>,
) -> ApiResult<Page<Sensor>> {
    let sensors: Vec<Sensor> = state
        .repo
        .list_sensors()
        .await?
        .into_iter()
        .filter(|s| filter.matches(s))
        .collect();

    success(Page::paginate(sensors, filter.page, filter.per_page))
}

/// GET /api/sensors/{id} - Get a single sensor.
pub async fn get_sensor(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Sensor> {
    match state.repo.get_sensor(&id).await? {
        Some(sensor) => success(sensor),
        None => Err(AppError::NotFound(format!("Sensor {} not found", id))),
    }
}

/// POST /api/sensors - Create a sensor (admin).
pub async fn create_sensor(
    State(state): State<AppState>,
    Json(request): Json<CreateSensorRequest>,
) -> ApiResult<Sensor> {
    if request.designation.trim().is_empty() {
        return Err(AppError::Validation("Designation is required".to_string()));
    }

    let sensor = state.repo.create_sensor(&request).await?;
    if let Err(e) = state.search.index_sensor(&sensor).await {
        tracing::warn!("Failed to index sensor: {}", e);
    }
    success(sensor)
}

/// PUT /api/sensors/{id} - Update a sensor (admin).
pub async fn update_sensor(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateSensorRequest>,
) -> ApiResult<Sensor> {
    let sensor = state.repo.update_sensor(&id, &request).await?;
    if let Err(e) = state.search.index_sensor(&sensor).await {
        tracing::warn!("Failed to re-index sensor: {}", e);
    }
    success(sensor)
}

/// DELETE /api/sensors/{id} - Delete a sensor (admin).
pub async fn delete_sensor(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<()> {
    state.repo.delete_sensor(&id).await?;
    if let Err(e) = state.search.remove(&id).await {
        tracing::warn!("Failed to remove sensor from index: {}", e);
    }
    success(())
}
