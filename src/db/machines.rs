//! Machines and work cycles.

use chrono::{Duration, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use super::repository::{new_id, now, parse_json_array, timestamp, to_json_array, Repository};
use super::sensors::fetch_sensors;
use super::users::{award_points, fetch_user};
use crate::errors::AppError;
use crate::models::{
    required_grade, CreateMachineRequest, Cycle, Machine, MachineStatus, StartCycleResponse,
    UpdateMachineRequest,
};

impl Repository {
    /// List all machines.
    pub async fn list_machines(&self) -> Result<Vec<Machine>, AppError> {
        let rows = sqlx::query(
            r#"SELECT id, name, main_pole, sub_pole, status, max_users, current_users,
                      points_per_cycle, cycle_duration_secs, available_sensors,
                      created_at, updated_at, version
               FROM machines ORDER BY main_pole, sub_pole, name"#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(machine_from_row).collect())
    }

    /// Get a machine by ID.
    pub async fn get_machine(&self, id: &str) -> Result<Option<Machine>, AppError> {
        let mut conn = self.pool.acquire().await?;
        fetch_machine(&mut conn, id).await
    }

    /// Create a new machine.
    pub async fn create_machine(
        &self,
        request: &CreateMachineRequest,
    ) -> Result<Machine, AppError> {
        let mut tx = self.pool.begin().await?;
        let machine = insert_machine(&mut tx, request).await?;
        tx.commit().await?;
        Ok(machine)
    }

    /// Update a machine with optimistic concurrency control.
    pub async fn update_machine(
        &self,
        id: &str,
        request: &UpdateMachineRequest,
    ) -> Result<Machine, AppError> {
        request.validate().map_err(AppError::Validation)?;

        let mut tx = self.pool.begin().await?;
        let existing = fetch_machine(&mut tx, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Machine {} not found", id)))?;

        // Check version for optimistic concurrency
        if let Some(expected) = request.expected_version {
            if existing.version != expected {
                return Err(AppError::Conflict(format!(
                    "Version mismatch: expected {}, current {}",
                    expected, existing.version
                )));
            }
        }

        let available_sensors = match &request.available_sensors {
            Some(ids) => checked_sensor_ids(&mut tx, ids).await?,
            None => existing.available_sensors.clone(),
        };

        let max_users = request.max_users.unwrap_or(existing.max_users);
        if (existing.current_users.len() as i64) > max_users {
            return Err(AppError::Validation(format!(
                "maxUsers cannot be below the {} users currently on the machine",
                existing.current_users.len()
            )));
        }

        let now = now();
        let mut machine = Machine {
            id: existing.id.clone(),
            name: request.name.clone().unwrap_or(existing.name.clone()),
            main_pole: request.main_pole.clone().unwrap_or(existing.main_pole.clone()),
            sub_pole: request.sub_pole.clone().unwrap_or(existing.sub_pole.clone()),
            status: request.status.unwrap_or(existing.status),
            max_users,
            current_users: existing.current_users.clone(),
            points_per_cycle: request.points_per_cycle.unwrap_or(existing.points_per_cycle),
            cycle_duration_secs: request
                .cycle_duration_secs
                .unwrap_or(existing.cycle_duration_secs),
            available_sensors,
            created_at: existing.created_at.clone(),
            updated_at: now.clone(),
            version: existing.version + 1,
        };
        machine.status = machine.occupancy_status();

        // Use conditional UPDATE with version check to prevent race conditions
        let result = sqlx::query(
            r#"UPDATE machines SET
                name = ?, main_pole = ?, sub_pole = ?, status = ?, max_users = ?,
                points_per_cycle = ?, cycle_duration_secs = ?, available_sensors = ?,
                updated_at = ?, version = ?
            WHERE id = ? AND version = ?"#,
        )
        .bind(&machine.name)
        .bind(&machine.main_pole)
        .bind(&machine.sub_pole)
        .bind(machine.status.as_str())
        .bind(machine.max_users)
        .bind(machine.points_per_cycle)
        .bind(machine.cycle_duration_secs)
        .bind(to_json_array(&machine.available_sensors))
        .bind(&now)
        .bind(machine.version)
        .bind(id)
        .bind(existing.version)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(
                "Concurrent modification detected".to_string(),
            ));
        }

        tx.commit().await?;
        Ok(machine)
    }

    /// Delete a machine.
    pub async fn delete_machine(&self, id: &str) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        remove_machine(&mut tx, id).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Join a machine: record a cycle and award its points, atomically.
    pub async fn start_cycle(
        &self,
        machine_id: &str,
        user_id: &str,
    ) -> Result<StartCycleResponse, AppError> {
        let mut tx = self.pool.begin().await?;

        let machine = fetch_machine(&mut tx, machine_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Machine {} not found", machine_id)))?;

        if !machine.status.accepts_cycles() {
            return Err(AppError::Conflict(format!(
                "Machine {} is {}",
                machine.name,
                machine.status.as_str()
            )));
        }
        if machine.current_users.iter().any(|u| u == user_id) {
            return Err(AppError::Conflict(
                "You are already running a cycle on this machine".to_string(),
            ));
        }
        if machine.current_users.len() as i64 >= machine.max_users {
            return Err(AppError::Conflict(format!(
                "Machine {} is full ({} of {} users)",
                machine.name,
                machine.current_users.len(),
                machine.max_users
            )));
        }

        let user = fetch_user(&mut tx, user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", user_id)))?;
        let sensors = fetch_sensors(&mut tx, &machine.available_sensors).await?;
        let required = required_grade(&sensors);
        if user.grade < required {
            return Err(AppError::Forbidden(format!(
                "Grade {} or higher is required for {}",
                required.as_str(),
                machine.name
            )));
        }

        let started = Utc::now();
        let ends = Duration::try_seconds(machine.cycle_duration_secs)
            .and_then(|length| started.checked_add_signed(length))
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "Machine {} has an invalid cycle duration of {} seconds",
                    machine.name, machine.cycle_duration_secs
                ))
            })?;
        let now = timestamp(started);
        let ends_at = timestamp(ends);

        let mut updated = machine.clone();
        updated.current_users.push(user_id.to_string());
        updated.status = updated.occupancy_status();
        write_occupancy(&mut tx, &mut updated, &now).await?;

        let cycle = Cycle {
            id: new_id(),
            machine_id: machine.id.clone(),
            user_id: user_id.to_string(),
            started_at: now.clone(),
            ends_at,
            ended_at: None,
            points_awarded: machine.points_per_cycle,
        };
        sqlx::query(
            "INSERT INTO cycles (id, machine_id, user_id, started_at, ends_at, ended_at, points_awarded) VALUES (?, ?, ?, ?, ?, NULL, ?)"
        )
        .bind(&cycle.id)
        .bind(&cycle.machine_id)
        .bind(&cycle.user_id)
        .bind(&cycle.started_at)
        .bind(&cycle.ends_at)
        .bind(cycle.points_awarded)
        .execute(&mut *tx)
        .await?;

        let user_points = award_points(&mut tx, user_id, machine.points_per_cycle, &now).await?;

        tx.commit().await?;

        Ok(StartCycleResponse {
            machine: updated,
            points_awarded: cycle.points_awarded,
            cycle,
            user_points,
        })
    }

    /// Leave a machine, closing the user's open cycle.
    pub async fn end_cycle(&self, machine_id: &str, user_id: &str) -> Result<Machine, AppError> {
        let mut tx = self.pool.begin().await?;

        let mut machine = fetch_machine(&mut tx, machine_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Machine {} not found", machine_id)))?;

        if !machine.current_users.iter().any(|u| u == user_id) {
            return Err(AppError::Conflict(
                "You are not running a cycle on this machine".to_string(),
            ));
        }

        let now = now();
        machine.current_users.retain(|u| u != user_id);
        machine.status = machine.occupancy_status();
        write_occupancy(&mut tx, &mut machine, &now).await?;

        sqlx::query(
            "UPDATE cycles SET ended_at = ? WHERE machine_id = ? AND user_id = ? AND ended_at IS NULL",
        )
        .bind(&now)
        .bind(machine_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(machine)
    }

    /// Close cycles past their end time and release their users.
    ///
    /// Returns how many cycles were closed. A cycle whose machine changed
    /// concurrently is left for the next sweep.
    pub async fn release_expired_cycles(&self) -> Result<usize, AppError> {
        let now = now();
        let expired = sqlx::query(
            "SELECT id, machine_id, user_id FROM cycles WHERE ended_at IS NULL AND ends_at <= ? ORDER BY ends_at",
        )
        .bind(&now)
        .fetch_all(&self.pool)
        .await?;

        let mut released = 0;
        for row in &expired {
            let cycle_id: String = row.get("id");
            let machine_id: String = row.get("machine_id");
            let user_id: String = row.get("user_id");

            let mut tx = self.pool.begin().await?;
            if let Some(mut machine) = fetch_machine(&mut tx, &machine_id).await? {
                if machine.current_users.iter().any(|u| *u == user_id) {
                    machine.current_users.retain(|u| *u != user_id);
                    machine.status = machine.occupancy_status();
                    if let Err(e) = write_occupancy(&mut tx, &mut machine, &now).await {
                        tracing::debug!("Deferring release of cycle {}: {}", cycle_id, e);
                        continue;
                    }
                }
            }

            sqlx::query("UPDATE cycles SET ended_at = ends_at WHERE id = ? AND ended_at IS NULL")
                .bind(&cycle_id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;

            tracing::info!(
                cycle_id = %cycle_id,
                machine_id = %machine_id,
                user_id = %user_id,
                "Released expired cycle"
            );
            released += 1;
        }

        Ok(released)
    }

    /// Cycles of a user, newest first.
    pub async fn list_cycles_for_user(&self, user_id: &str) -> Result<Vec<Cycle>, AppError> {
        let rows = sqlx::query(
            "SELECT id, machine_id, user_id, started_at, ends_at, ended_at, points_awarded FROM cycles WHERE user_id = ? ORDER BY started_at DESC"
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(cycle_from_row).collect())
    }

    /// Cycles run on a machine, newest first.
    pub async fn list_cycles_for_machine(&self, machine_id: &str) -> Result<Vec<Cycle>, AppError> {
        let rows = sqlx::query(
            "SELECT id, machine_id, user_id, started_at, ends_at, ended_at, points_awarded FROM cycles WHERE machine_id = ? ORDER BY started_at DESC"
        )
        .bind(machine_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(cycle_from_row).collect())
    }
}

pub(super) async fn fetch_machine(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<Machine>, AppError> {
    let row = sqlx::query(
        r#"SELECT id, name, main_pole, sub_pole, status, max_users, current_users,
                  points_per_cycle, cycle_duration_secs, available_sensors,
                  created_at, updated_at, version
           FROM machines WHERE id = ?"#,
    )
    .bind(id)
    .fetch_optional(conn)
    .await?;

    Ok(row.as_ref().map(machine_from_row))
}

pub(super) async fn insert_machine(
    conn: &mut SqliteConnection,
    request: &CreateMachineRequest,
) -> Result<Machine, AppError> {
    request.validate().map_err(AppError::Validation)?;
    let available_sensors = checked_sensor_ids(conn, &request.available_sensors).await?;

    let now = now();
    let status = match request.status {
        Some(MachineStatus::InUse) | None => MachineStatus::Available,
        Some(status) => status,
    };
    let machine = Machine {
        id: new_id(),
        name: request.name.trim().to_string(),
        main_pole: request.main_pole.trim().to_string(),
        sub_pole: request.sub_pole.trim().to_string(),
        status,
        max_users: request.max_users,
        current_users: Vec::new(),
        points_per_cycle: request.points_per_cycle,
        cycle_duration_secs: request.cycle_duration_secs,
        available_sensors,
        created_at: now.clone(),
        updated_at: now,
        version: 1,
    };

    sqlx::query(
        r#"INSERT INTO machines (
            id, name, main_pole, sub_pole, status, max_users, current_users,
            points_per_cycle, cycle_duration_secs, available_sensors,
            created_at, updated_at, version
        ) VALUES (?, ?, ?, ?, ?, ?, '[]', ?, ?, ?, ?, ?, 1)"#,
    )
    .bind(&machine.id)
    .bind(&machine.name)
    .bind(&machine.main_pole)
    .bind(&machine.sub_pole)
    .bind(machine.status.as_str())
    .bind(machine.max_users)
    .bind(machine.points_per_cycle)
    .bind(machine.cycle_duration_secs)
    .bind(to_json_array(&machine.available_sensors))
    .bind(&machine.created_at)
    .bind(&machine.updated_at)
    .execute(conn)
    .await?;

    Ok(machine)
}

pub(super) async fn remove_machine(conn: &mut SqliteConnection, id: &str) -> Result<(), AppError> {
    let machine = fetch_machine(&mut *conn, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Machine {} not found", id)))?;
    remove_unoccupied(conn, &machine).await
}

/// Delete `machine` as it was read. Fails if anyone is on it or the row
/// moved on since.
async fn remove_unoccupied(
    conn: &mut SqliteConnection,
    machine: &Machine,
) -> Result<(), AppError> {
    if !machine.current_users.is_empty() {
        return Err(AppError::Conflict(format!(
            "Machine {} has {} active users",
            machine.name,
            machine.current_users.len()
        )));
    }

    let result = sqlx::query("DELETE FROM machines WHERE id = ? AND version = ?")
        .bind(&machine.id)
        .bind(machine.version)
        .execute(conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::Conflict(format!(
            "Machine {} changed while being deleted",
            machine.name
        )));
    }
    Ok(())
}

/// Persist the occupancy of `machine` if nobody changed it since it was read.
async fn write_occupancy(
    conn: &mut SqliteConnection,
    machine: &mut Machine,
    now: &str,
) -> Result<(), AppError> {
    let new_version = machine.version + 1;
    let result = sqlx::query(
        "UPDATE machines SET current_users = ?, status = ?, updated_at = ?, version = ? WHERE id = ? AND version = ?"
    )
    .bind(to_json_array(&machine.current_users))
    .bind(machine.status.as_str())
    .bind(now)
    .bind(new_version)
    .bind(&machine.id)
    .bind(machine.version)
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::Conflict(
            "Concurrent modification detected".to_string(),
        ));
    }

    machine.version = new_version;
    machine.updated_at = now.to_string();
    Ok(())
}

/// Deduplicate sensor ids, failing on any that do not exist.
async fn checked_sensor_ids(
    conn: &mut SqliteConnection,
    ids: &[String],
) -> Result<Vec<String>, AppError> {
    let mut unique: Vec<String> = Vec::with_capacity(ids.len());
    for id in ids {
        if !unique.contains(id) {
            unique.push(id.clone());
        }
    }

    let found = fetch_sensors(conn, &unique).await?;
    if let Some(missing) = unique.iter().find(|id| !found.iter().any(|s| &s.id == *id)) {
        return Err(AppError::Validation(format!("Sensor {} does not exist", missing)));
    }
    Ok(unique)
}

fn machine_from_row(row: &SqliteRow) -> Machine {
    let status: String = row.get("status");
    let current_users: String = row.get("current_users");
    let available_sensors: String = row.get("available_sensors");
    Machine {
        id: row.get("id"),
        name: row.get("name"),
        main_pole: row.get("main_pole"),
        sub_pole: row.get("sub_pole"),
        status: MachineStatus::parse(&status).unwrap_or(MachineStatus::Offline),
        max_users: row.get("max_users"),
        current_users: parse_json_array(&current_users),
        points_per_cycle: row.get("points_per_cycle"),
        cycle_duration_secs: row.get("cycle_duration_secs"),
        available_sensors: parse_json_array(&available_sensors),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        version: row.get("version"),
    }
}

fn cycle_from_row(row: &SqliteRow) -> Cycle {
    Cycle {
        id: row.get("id"),
        machine_id: row.get("machine_id"),
        user_id: row.get("user_id"),
        started_at: row.get("started_at"),
        ends_at: row.get("ends_at"),
        ended_at: row.get("ended_at"),
        points_awarded: row.get("points_awarded"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database;
    use crate::models::AccountStatus;
    use tempfile::TempDir;

    async fn repository(temp_dir: &TempDir) -> Repository {
        let pool = init_database(&temp_dir.path().join("machines.sqlite"))
            .await
            .unwrap();
        Repository::new(pool)
    }

    async fn lathe(repo: &Repository) -> Machine {
        let request: CreateMachineRequest = serde_json::from_value(serde_json::json!({
            "name": "Lathe",
            "mainPole": "Toulouse",
            "maxUsers": 2
        }))
        .unwrap();
        repo.create_machine(&request).await.unwrap()
    }

    #[tokio::test]
    async fn test_delete_refused_when_machine_changed_after_read() {
        let temp_dir = TempDir::new().unwrap();
        let repo = repository(&temp_dir).await;
        let machine = lathe(&repo).await;
        let user = repo
            .create_user("alice", None, "hash", AccountStatus::Active, false)
            .await
            .unwrap();

        let stale = repo.get_machine(&machine.id).await.unwrap().unwrap();
        repo.start_cycle(&machine.id, &user.id).await.unwrap();

        let mut conn = repo.pool.acquire().await.unwrap();
        let err = remove_unoccupied(&mut conn, &stale).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let current = repo.get_machine(&machine.id).await.unwrap().unwrap();
        assert_eq!(current.current_users, vec![user.id.clone()]);

        let err = repo.delete_machine(&machine.id).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_start_cycle_with_unrepresentable_duration() {
        let temp_dir = TempDir::new().unwrap();
        let repo = repository(&temp_dir).await;
        let machine = lathe(&repo).await;
        let user = repo
            .create_user("bob", None, "hash", AccountStatus::Active, false)
            .await
            .unwrap();

        // Rows written before durations were bounded.
        sqlx::query("UPDATE machines SET cycle_duration_secs = ? WHERE id = ?")
            .bind(100_000_000_000_000_i64)
            .bind(&machine.id)
            .execute(&repo.pool)
            .await
            .unwrap();

        let err = repo.start_cycle(&machine.id, &user.id).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let current = repo.get_machine(&machine.id).await.unwrap().unwrap();
        assert!(current.current_users.is_empty());
        assert!(repo.list_cycles_for_machine(&machine.id).await.unwrap().is_empty());
    }
}
