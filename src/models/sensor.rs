//! Sensor model.

use serde::{Deserialize, Serialize};

use super::machine::non_blank;
use super::Grade;

/// A sensor type that can be attached to machines.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sensor {
    pub id: String,
    pub designation: String,
    pub required_grade: Grade,
    pub supplier: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Request body for creating a new sensor.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSensorRequest {
    pub designation: String,
    #[serde(default = "default_grade")]
    pub required_grade: Grade,
    #[serde(default)]
    pub supplier: String,
}

fn default_grade() -> Grade {
    Grade::Apprentice
}

/// Request body for updating an existing sensor.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSensorRequest {
    #[serde(default)]
    pub designation: Option<String>,
    #[serde(default)]
    pub required_grade: Option<Grade>,
    #[serde(default)]
    pub supplier: Option<String>,
}

/// Query parameters for listing sensors.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorFilter {
    #[serde(default)]
    pub supplier: Option<String>,
    #[serde(default)]
    pub required_grade: Option<Grade>,
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub page: Option<usize>,
    #[serde(default)]
    pub per_page: Option<usize>,
}

impl SensorFilter {
    pub fn matches(&self, sensor: &Sensor) -> bool {
        if let Some(supplier) = non_blank(&self.supplier) {
            if !sensor.supplier.eq_ignore_ascii_case(supplier) {
                return false;
            }
        }
        if let Some(grade) = self.required_grade {
            if sensor.required_grade != grade {
                return false;
            }
        }
        match non_blank(&self.q) {
            Some(q) => {
                let q = q.to_lowercase();
                sensor.designation.to_lowercase().contains(&q)
                    || sensor.supplier.to_lowercase().contains(&q)
            }
            None => true,
        }
    }
}
