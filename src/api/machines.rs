//! Machine, work cycle and usage endpoints.

use axum::extract::{Path, State};
use serde::Serialize;

use super::{success, ApiResult, Json, Query};
use crate::auth::CurrentUser;
use crate::errors::AppError;
use crate::models::{
    required_grade, CreateMachineRequest, Cycle, DailySeries, Grade, Machine, MachineFilter,
    Page, Reading, RecordReadingRequest, Sensor, StartCycleResponse, UpdateMachineRequest,
    UsageQuery,
};
use crate::usage;
use crate::AppState;

/// A machine with its attached sensors resolved.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineDetails {
    #[serde(flatten)]
    pub machine: Machine,
    pub sensors: Vec<Sensor>,
    pub required_grade: Grade,
}

/// GET /api/machines - List machines matching the filter, one page at a time.
pub async fn list_machines(
    State(state): State<AppState>,
    Query(filter): Query<MachineFilter>,
) -> ApiResult<Page<Machine>> {
    let machines: Vec<Machine> = state
        .repo
        .list_machines()
        .await?
        .into_iter()
        .filter(|m| filter.matches(m))
        .collect();

    success(Page::paginate(machines, filter.page, filter.per_page))
}

/// GET /api/machines/{id} - Get a machine with its sensors.
pub async fn get_machine(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<MachineDetails> {
    let machine = state
        .repo
        .get_machine(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Machine {} not found", id)))?;

    let sensors = state.repo.get_sensors(&machine.available_sensors).await?;
    success(MachineDetails {
        required_grade: required_grade(&sensors),
        machine,
        sensors,
    })
}

/// POST /api/machines - Create a machine (admin).
pub async fn create_machine(
    State(state): State<AppState>,
    Json(request): Json<CreateMachineRequest>,
) -> ApiResult<Machine> {
    let machine = state.repo.create_machine(&request).await?;

    if let Err(e) = state.search.index_machine(&machine).await {
        tracing::warn!("Failed to index machine: {}", e);
    }
    tracing::info!(machine_id = %machine.id, name = %machine.name, "Machine created");
    success(machine)
}

/// PUT /api/machines/{id} - Update a machine (admin).
pub async fn update_machine(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateMachineRequest>,
) -> ApiResult<Machine> {
    let machine = state.repo.update_machine(&id, &request).await?;

    if let Err(e) = state.search.index_machine(&machine).await {
        tracing::warn!("Failed to re-index machine: {}", e);
    }
    success(machine)
}

/// DELETE /api/machines/{id} - Delete a machine (admin).
pub async fn delete_machine(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<()> {
    state.repo.delete_machine(&id).await?;

    if let Err(e) = state.search.remove(&id).await {
        tracing::warn!("Failed to remove machine from index: {}", e);
    }
    tracing::info!(machine_id = %id, "Machine deleted");
    success(())
}

/// POST /api/machines/{id}/start-cycle - Join the machine and earn its points.
pub async fn start_cycle(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<StartCycleResponse> {
    let started = state.repo.start_cycle(&id, &user.id).await?;

    tracing::info!(
        machine_id = %id,
        user = %user.username,
        points = started.points_awarded,
        "Cycle started"
    );
    success(started)
}

/// POST /api/machines/{id}/end-cycle - Leave the machine.
pub async fn end_cycle(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Machine> {
    let machine = state.repo.end_cycle(&id, &user.id).await?;

    tracing::info!(machine_id = %id, user = %user.username, "Cycle ended");
    success(machine)
}

/// GET /api/machines/{id}/cycles - Cycle history of a machine.
pub async fn list_machine_cycles(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Vec<Cycle>> {
    if state.repo.get_machine(&id).await?.is_none() {
        return Err(AppError::NotFound(format!("Machine {} not found", id)));
    }
    success(state.repo.list_cycles_for_machine(&id).await?)
}

/// POST /api/machines/{id}/readings - Record a sensor reading (admin).
pub async fn record_reading(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<RecordReadingRequest>,
) -> ApiResult<Reading> {
    success(state.repo.record_reading(&id, &request).await?)
}

/// GET /api/machines/{id}/usage?sensorId=..&day=YYYY-MM-DD - Daily series of a sensor.
pub async fn get_usage(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<UsageQuery>,
) -> ApiResult<DailySeries> {
    let machine = state
        .repo
        .get_machine(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Machine {} not found", id)))?;

    if !machine.available_sensors.contains(&query.sensor_id) {
        return Err(AppError::Validation(format!(
            "Sensor {} is not attached to machine {}",
            query.sensor_id, machine.name
        )));
    }

    let readings = state
        .repo
        .readings_for_day(&machine.id, &query.sensor_id, query.day)
        .await?;

    success(usage::daily_series(
        &machine.id,
        &query.sensor_id,
        query.day,
        &readings,
    ))
}
