//! Daily sensor series.
//!
//! Raw readings of one day are bucketed into fixed 10-second slots so a
//! chart always receives the same 8,640 points, and an initial viewport is
//! picked around the part of the day where the sensor reported activity.

use chrono::{DateTime, NaiveDate, NaiveTime, Timelike, Utc};

use crate::models::{DailySeries, Slot, Viewport};

/// Width of one slot.
pub const SLOT_SECONDS: u32 = 10;
/// Slots in a day: 86,400 s / 10 s.
pub const SLOTS_PER_DAY: usize = 8_640;
/// Value of a slot no reading fell into.
pub const DEFAULT_VALUE: f64 = 0.0;
/// Slots added on each side of the active range (one hour).
pub const VIEWPORT_MARGIN_SLOTS: usize = 360;

/// Slot a time of day falls into.
pub fn slot_index(time: NaiveTime) -> usize {
    ((time.num_seconds_from_midnight() / SLOT_SECONDS) as usize).min(SLOTS_PER_DAY - 1)
}

/// `HH:MM:SS` start of a slot.
pub fn slot_label(index: usize) -> String {
    let secs = index as u32 * SLOT_SECONDS;
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// Bucket readings into the slots of `day`.
///
/// Each slot holds the value of the latest reading inside it; on equal
/// timestamps the one appearing later in `readings` wins. Readings outside
/// the day are ignored.
pub fn bucket_day(day: NaiveDate, readings: &[(DateTime<Utc>, f64)]) -> Vec<f64> {
    let mut values = vec![DEFAULT_VALUE; SLOTS_PER_DAY];
    let mut latest: Vec<Option<DateTime<Utc>>> = vec![None; SLOTS_PER_DAY];

    for &(at, value) in readings {
        if at.date_naive() != day {
            continue;
        }
        let idx = slot_index(at.time());
        if latest[idx].map_or(true, |prev| at >= prev) {
            latest[idx] = Some(at);
            values[idx] = value;
        }
    }

    values
}

/// Initial chart range: first to last non-zero slot, widened by the margin.
pub fn viewport(values: &[f64]) -> Viewport {
    let last_slot = values.len().saturating_sub(1);
    let first = values.iter().position(|v| *v != 0.0);
    let last = values.iter().rposition(|v| *v != 0.0);

    match (first, last) {
        (Some(first), Some(last)) => Viewport {
            start: first.saturating_sub(VIEWPORT_MARGIN_SLOTS),
            end: (last + VIEWPORT_MARGIN_SLOTS).min(last_slot),
        },
        _ => Viewport {
            start: 0,
            end: last_slot,
        },
    }
}

/// Full series for one machine sensor over one day.
pub fn daily_series(
    machine_id: &str,
    sensor_id: &str,
    day: NaiveDate,
    readings: &[(DateTime<Utc>, f64)],
) -> DailySeries {
    let values = bucket_day(day, readings);
    let viewport = viewport(&values);
    let slots = values
        .into_iter()
        .enumerate()
        .map(|(idx, value)| Slot {
            time: slot_label(idx),
            value,
        })
        .collect();

    DailySeries {
        machine_id: machine_id.to_string(),
        sensor_id: sensor_id.to_string(),
        day,
        slot_seconds: SLOT_SECONDS,
        reading_count: readings.len(),
        slots,
        viewport,
    }
}
