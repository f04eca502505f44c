//! Small helpers shared by training and forecasting

use chrono::{DateTime, Duration, Utc};

/// Number of leading rows in a chronological train split.
///
/// `train_fraction` is clamped to [0, 1]; the result is floored.
pub fn chronological_split(n: usize, train_fraction: f64) -> usize {
    ((n as f64 * train_fraction.clamp(0.0, 1.0)).floor() as usize).min(n)
}

/// Time of the value `horizon` hours after `origin`
pub fn horizon_timestamp(origin: DateTime<Utc>, horizon: usize) -> DateTime<Utc> {
    origin + Duration::hours(horizon as i64)
}

/// Target times for a set of horizons from one origin
pub fn future_timestamps(origin: DateTime<Utc>, horizons: &[usize]) -> Vec<DateTime<Utc>> {
    horizons.iter().map(|&h| horizon_timestamp(origin, h)).collect()
}
