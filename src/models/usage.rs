//! Sensor readings and the per-day series built from them.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One raw sample reported by a sensor on a machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    pub id: i64,
    pub machine_id: String,
    pub sensor_id: String,
    pub recorded_at: String,
    pub value: f64,
}

/// Request body for recording a reading.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordReadingRequest {
    pub sensor_id: String,
    pub value: f64,
    /// RFC 3339 timestamp; defaults to now
    #[serde(default)]
    pub recorded_at: Option<String>,
}

/// Query parameters for a daily series.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageQuery {
    pub sensor_id: String,
    /// UTC day, `YYYY-MM-DD`
    pub day: NaiveDate,
}

/// A fixed-width time slot of the day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Slot {
    /// Slot start, `HH:MM:SS`
    pub time: String,
    pub value: f64,
}

/// Slot range a chart should zoom to initially, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Viewport {
    pub start: usize,
    pub end: usize,
}

/// Readings of one sensor over one day, bucketed into fixed slots.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailySeries {
    pub machine_id: String,
    pub sensor_id: String,
    pub day: NaiveDate,
    pub slot_seconds: u32,
    pub reading_count: usize,
    pub slots: Vec<Slot>,
    pub viewport: Viewport,
}
