//! Sensor operations.

use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use super::repository::{new_id, now, parse_json_array, Repository};
use crate::errors::AppError;
use crate::models::{CreateSensorRequest, Grade, Sensor, UpdateSensorRequest};

impl Repository {
    /// List all sensors.
    pub async fn list_sensors(&self) -> Result<Vec<Sensor>, AppError> {
        let rows = sqlx::query(
            "SELECT id, designation, required_grade, supplier, created_at, updated_at FROM sensors ORDER BY designation"
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(sensor_from_row).collect())
    }

    /// Get a sensor by ID.
    pub async fn get_sensor(&self, id: &str) -> Result<Option<Sensor>, AppError> {
        let row = sqlx::query(
            "SELECT id, designation, required_grade, supplier, created_at, updated_at FROM sensors WHERE id = ?"
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(sensor_from_row))
    }

    /// Sensors attached to a machine, in attachment order.
    pub async fn get_sensors(&self, ids: &[String]) -> Result<Vec<Sensor>, AppError> {
        let mut conn = self.pool.acquire().await?;
        fetch_sensors(&mut conn, ids).await
    }

    /// Create a new sensor.
    pub async fn create_sensor(&self, request: &CreateSensorRequest) -> Result<Sensor, AppError> {
        let now = now();
        let sensor = Sensor {
            id: new_id(),
            designation: request.designation.trim().to_string(),
            required_grade: request.required_grade,
            supplier: request.supplier.trim().to_string(),
            created_at: now.clone(),
            updated_at: now,
        };

        sqlx::query(
            "INSERT INTO sensors (id, designation, required_grade, supplier, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)"
        )
        .bind(&sensor.id)
        .bind(&sensor.designation)
        .bind(sensor.required_grade.as_str())
        .bind(&sensor.supplier)
        .bind(&sensor.created_at)
        .bind(&sensor.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(sensor)
    }

    /// Update a sensor.
    pub async fn update_sensor(
        &self,
        id: &str,
        request: &UpdateSensorRequest,
    ) -> Result<Sensor, AppError> {
        let existing = self
            .get_sensor(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Sensor {} not found", id)))?;

        let now = now();
        let designation = request
            .designation
            .as_deref()
            .map(str::trim)
            .unwrap_or(&existing.designation)
            .to_string();
        if designation.is_empty() {
            return Err(AppError::Validation(
                "Designation cannot be empty".to_string(),
            ));
        }
        let required_grade = request.required_grade.unwrap_or(existing.required_grade);
        let supplier = request
            .supplier
            .as_deref()
            .map(str::trim)
            .unwrap_or(&existing.supplier)
            .to_string();

        sqlx::query(
            "UPDATE sensors SET designation = ?, required_grade = ?, supplier = ?, updated_at = ? WHERE id = ?"
        )
        .bind(&designation)
        .bind(required_grade.as_str())
        .bind(&supplier)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(Sensor {
            designation,
            required_grade,
            supplier,
            updated_at: now,
            ..existing
        })
    }

    /// Delete a sensor. Refused while a machine still lists it.
    ///
    /// The row is deleted first so the write lock is held while attachments
    /// are checked; a refusal rolls the delete back.
    pub async fn delete_sensor(&self, id: &str) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("DELETE FROM sensors WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Sensor {} not found", id)));
        }

        let machines = sqlx::query("SELECT name, available_sensors FROM machines")
            .fetch_all(&mut *tx)
            .await?;
        let attached = machines.iter().find(|row| {
            let sensors: String = row.get("available_sensors");
            parse_json_array(&sensors).iter().any(|s| s == id)
        });
        if let Some(row) = attached {
            let name: String = row.get("name");
            return Err(AppError::Conflict(format!(
                "Sensor is attached to machine {}",
                name
            )));
        }

        tx.commit().await?;
        Ok(())
    }
}

/// Load the sensors with the given ids, skipping unknown ids.
pub(super) async fn fetch_sensors(
    conn: &mut SqliteConnection,
    ids: &[String],
) -> Result<Vec<Sensor>, AppError> {
    let mut sensors = Vec::with_capacity(ids.len());
    for id in ids {
        let row = sqlx::query(
            "SELECT id, designation, required_grade, supplier, created_at, updated_at FROM sensors WHERE id = ?"
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        if let Some(row) = row {
            sensors.push(sensor_from_row(&row));
        }
    }
    Ok(sensors)
}

fn sensor_from_row(row: &SqliteRow) -> Sensor {
    let grade: String = row.get("required_grade");
    Sensor {
        id: row.get("id"),
        designation: row.get("designation"),
        required_grade: Grade::parse(&grade).unwrap_or(Grade::Apprentice),
        supplier: row.get("supplier"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}
