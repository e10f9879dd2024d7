//! Sensor readings.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use sqlx::Row;

use super::repository::{timestamp, Repository};
use crate::errors::AppError;
use crate::models::{RecordReadingRequest, Reading};

impl Repository {
    /// Store one reading of a sensor attached to the machine.
    pub async fn record_reading(
        &self,
        machine_id: &str,
        request: &RecordReadingRequest,
    ) -> Result<Reading, AppError> {
        let machine = self
            .get_machine(machine_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Machine {} not found", machine_id)))?;

        if !machine.available_sensors.contains(&request.sensor_id) {
            return Err(AppError::Validation(format!(
                "Sensor {} is not attached to machine {}",
                request.sensor_id, machine.name
            )));
        }
        if !request.value.is_finite() {
            return Err(AppError::Validation(
                "Reading value must be a finite number".to_string(),
            ));
        }

        let recorded_at = match &request.recorded_at {
            Some(raw) => DateTime::parse_from_rfc3339(raw)
                .map_err(|e| AppError::Validation(format!("Invalid recordedAt: {}", e)))?
                .with_timezone(&Utc),
            None => Utc::now(),
        };
        let recorded_at = timestamp(recorded_at);

        let result = sqlx::query(
            "INSERT INTO sensor_readings (machine_id, sensor_id, recorded_at, value) VALUES (?, ?, ?, ?)",
        )
        .bind(machine_id)
        .bind(&request.sensor_id)
        .bind(&recorded_at)
        .bind(request.value)
        .execute(&self.pool)
        .await?;

        Ok(Reading {
            id: result.last_insert_rowid(),
            machine_id: machine_id.to_string(),
            sensor_id: request.sensor_id.clone(),
            recorded_at,
            value: request.value,
        })
    }

    /// Readings of one machine sensor during one UTC day, in recording order.
    pub async fn readings_for_day(
        &self,
        machine_id: &str,
        sensor_id: &str,
        day: NaiveDate,
    ) -> Result<Vec<(DateTime<Utc>, f64)>, AppError> {
        let start = day.and_time(NaiveTime::default()).and_utc();
        let end = start + Duration::days(1);

        let rows = sqlx::query(
            r#"SELECT recorded_at, value FROM sensor_readings
               WHERE machine_id = ? AND sensor_id = ? AND recorded_at >= ? AND recorded_at < ?
               ORDER BY recorded_at, id"#,
        )
        .bind(machine_id)
        .bind(sensor_id)
        .bind(timestamp(start))
        .bind(timestamp(end))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let at: String = row.get("recorded_at");
                let at = DateTime::parse_from_rfc3339(&at).ok()?.with_timezone(&Utc);
                Some((at, row.get::<f64, _>("value")))
            })
            .collect())
    }
}
