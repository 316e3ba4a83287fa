//! Desired utilization for the current time of day

use chrono::{DateTime, Timelike, Utc};

/// Absolute cap on any target and trigger for forced decreases
pub const HARD_CEILING_PERCENT: f64 = 70.0;

/// Fraction of the ceiling targeted outside the night window
const DAYTIME_FACTOR: f64 = 0.8;

/// Night window in UTC hours, start inclusive and end exclusive
const NIGHT_START_HOUR: u32 = 16;
const NIGHT_END_HOUR: u32 = 20;

/// Whether `now` falls into the nightly full-ceiling window
pub fn is_night(now: DateTime<Utc>) -> bool {
    (NIGHT_START_HOUR..NIGHT_END_HOUR).contains(&now.hour())
}

/// Target utilization percentage for a ceiling
///
/// The full ceiling applies at night and 80% of it otherwise. The result
/// never exceeds [`HARD_CEILING_PERCENT`].
pub fn target_percent(ceiling: u32, night: bool) -> f64 {
    let desired = if night {
        f64::from(ceiling)
    } else {
        f64::from(ceiling) * DAYTIME_FACTOR
    };
    desired.min(HARD_CEILING_PERCENT)
}
