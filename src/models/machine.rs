//! Machine model, work cycles and list filtering.

use serde::{Deserialize, Serialize};

use super::{Grade, Sensor};

/// Operational state of a machine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum MachineStatus {
    Available,
    InUse,
    Maintenance,
    Offline,
}

impl MachineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MachineStatus::Available => "available",
            MachineStatus::InUse => "inUse",
            MachineStatus::Maintenance => "maintenance",
            MachineStatus::Offline => "offline",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "available" => Some(MachineStatus::Available),
            "inUse" => Some(MachineStatus::InUse),
            "maintenance" => Some(MachineStatus::Maintenance),
            "offline" => Some(MachineStatus::Offline),
            _ => None,
        }
    }

    /// Whether users may join a cycle in this state.
    pub fn accepts_cycles(&self) -> bool {
        matches!(self, MachineStatus::Available | MachineStatus::InUse)
    }
}

/// A physical machine employees run work cycles on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Machine {
    pub id: String,
    pub name: String,
    pub main_pole: String,
    pub sub_pole: String,
    pub status: MachineStatus,
    pub max_users: i64,
    pub current_users: Vec<String>,
    pub points_per_cycle: i64,
    pub cycle_duration_secs: i64,
    pub available_sensors: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
    /// Internal version for optimistic concurrency control
    #[serde(default)]
    pub version: i64,
}

impl Machine {
    /// Status after the set of current users changed.
    pub fn occupancy_status(&self) -> MachineStatus {
        match self.status {
            MachineStatus::Available | MachineStatus::InUse if self.current_users.is_empty() => {
                MachineStatus::Available
            }
            MachineStatus::Available | MachineStatus::InUse => MachineStatus::InUse,
            other => other,
        }
    }
}

/// Lowest grade allowed on a machine: the strictest of its sensors.
pub fn required_grade(sensors: &[Sensor]) -> Grade {
    sensors
        .iter()
        .map(|s| s.required_grade)
        .max()
        .unwrap_or(Grade::Apprentice)
}

fn default_max_users() -> i64 {
    1
}

fn default_points_per_cycle() -> i64 {
    10
}

fn default_cycle_duration() -> i64 {
    3600
}

/// Request body for creating a new machine. Also the payload of a
/// machine-creation ticket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateMachineRequest {
    pub name: String,
    pub main_pole: String,
    #[serde(default)]
    pub sub_pole: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MachineStatus>,
    #[serde(default = "default_max_users")]
    pub max_users: i64,
    #[serde(default = "default_points_per_cycle")]
    pub points_per_cycle: i64,
    #[serde(default = "default_cycle_duration")]
    pub cycle_duration_secs: i64,
    #[serde(default)]
    pub available_sensors: Vec<String>,
}

impl CreateMachineRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Machine name is required".to_string());
        }
        if self.main_pole.trim().is_empty() {
            return Err("Main pole is required".to_string());
        }
        validate_numbers(
            Some(self.max_users),
            Some(self.points_per_cycle),
            Some(self.cycle_duration_secs),
        )
    }
}

/// Longest cycle a machine may be configured with (7 days).
pub const MAX_CYCLE_DURATION_SECS: i64 = 7 * 24 * 3600;

fn validate_numbers(
    max_users: Option<i64>,
    points_per_cycle: Option<i64>,
    cycle_duration_secs: Option<i64>,
) -> Result<(), String> {
    if max_users.is_some_and(|n| n < 1) {
        return Err("maxUsers must be at least 1".to_string());
    }
    if points_per_cycle.is_some_and(|n| n < 0) {
        return Err("pointsPerCycle cannot be negative".to_string());
    }
    if cycle_duration_secs.is_some_and(|n| n < 1) {
        return Err("cycleDurationSecs must be positive".to_string());
    }
    if cycle_duration_secs.is_some_and(|n| n > MAX_CYCLE_DURATION_SECS) {
        return Err(format!(
            "cycleDurationSecs cannot exceed {}",
            MAX_CYCLE_DURATION_SECS
        ));
    }
    Ok(())
}

/// Request body for updating an existing machine.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMachineRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub main_pole: Option<String>,
    #[serde(default)]
    pub sub_pole: Option<String>,
    #[serde(default)]
    pub status: Option<MachineStatus>,
    #[serde(default)]
    pub max_users: Option<i64>,
    #[serde(default)]
    pub points_per_cycle: Option<i64>,
    #[serde(default)]
    pub cycle_duration_secs: Option<i64>,
    #[serde(default)]
    pub available_sensors: Option<Vec<String>>,
    /// Expected version for optimistic concurrency control
    #[serde(default)]
    pub expected_version: Option<i64>,
}

impl UpdateMachineRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.as_ref().is_some_and(|n| n.trim().is_empty()) {
            return Err("Machine name cannot be empty".to_string());
        }
        validate_numbers(
            self.max_users,
            self.points_per_cycle,
            self.cycle_duration_secs,
        )
    }
}

/// Query parameters for listing machines.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineFilter {
    #[serde(default)]
    pub main_pole: Option<String>,
    #[serde(default)]
    pub sub_pole: Option<String>,
    #[serde(default)]
    pub status: Option<MachineStatus>,
    /// Free text matched against name and poles
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub page: Option<usize>,
    #[serde(default)]
    pub per_page: Option<usize>,
}

impl MachineFilter {
    pub fn matches(&self, machine: &Machine) -> bool {
        if let Some(pole) = non_blank(&self.main_pole) {
            if !machine.main_pole.eq_ignore_ascii_case(pole) {
                return false;
            }
        }
        if let Some(pole) = non_blank(&self.sub_pole) {
            if !machine.sub_pole.eq_ignore_ascii_case(pole) {
                return false;
            }
        }
        if let Some(status) = self.status {
            if machine.status != status {
                return false;
            }
        }
        if let Some(q) = non_blank(&self.q) {
            let q = q.to_lowercase();
            return [&machine.name, &machine.main_pole, &machine.sub_pole]
                .iter()
                .any(|field| field.to_lowercase().contains(&q));
        }
        true
    }
}

pub(crate) fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// A timed work session of one user on one machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cycle {
    pub id: String,
    pub machine_id: String,
    pub user_id: String,
    pub started_at: String,
    pub ends_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
    pub points_awarded: i64,
}

/// Result of starting a cycle.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartCycleResponse {
    pub machine: Machine,
    pub cycle: Cycle,
    pub points_awarded: i64,
    pub user_points: i64,
}
