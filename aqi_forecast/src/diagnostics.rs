//! Error anatomy of backtest detail rows
//!
//! Model absolute errors are grouped by time of day and day of week per
//! horizon, and each horizon's last week is checked against its history
//! to flag possible regime shifts.

use crate::backtest::BacktestDetail;
use aqi_math::percentile;
use chrono::{Datelike, Duration, Timelike};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;
use tracing::warn;

/// Rows a horizon needs before it is checked for a regime shift
pub const MIN_REGIME_ROWS: usize = 14;
/// Historical rows needed before the comparison is meaningful
pub const MIN_HISTORICAL_ROWS: usize = 10;
/// Length of the recent window
pub const RECENT_DAYS: i64 = 7;

/// Mean, sample standard deviation and count of one group of errors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorStats {
    pub horizon_h: usize,
    /// Hour of day (0-23) or day of week (0 = Monday)
    pub bucket: u32,
    pub mean: f64,
    /// `None` for single-row groups
    pub std: Option<f64>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeAlert {
    pub horizon_h: usize,
    pub recent_mae: f64,
    pub historical_p90: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorAnatomy {
    pub hourly: Vec<ErrorStats>,
    pub weekly: Vec<ErrorStats>,
    pub regime_alerts: Vec<RegimeAlert>,
}

impl ErrorAnatomy {
    pub fn from_detail(detail: &[BacktestDetail]) -> Self {
        let hourly = grouped(detail, |d| d.timestamp.hour());
        let weekly = grouped(detail, |d| d.timestamp.weekday().num_days_from_monday());
        let regime_alerts = regime_alerts(detail);
        for alert in &regime_alerts {
            warn!(
                "Possible regime shift at horizon {}h: recent MAE {:.2} above historical p90 {:.2}",
                alert.horizon_h, alert.recent_mae, alert.historical_p90
            );
        }
        Self {
            hourly,
            weekly,
            regime_alerts,
        }
    }

    pub fn has_alerts(&self) -> bool {
        !self.regime_alerts.is_empty()
    }
}

fn grouped(detail: &[BacktestDetail], bucket: impl Fn(&BacktestDetail) -> u32) -> Vec<ErrorStats> {
    let mut groups: BTreeMap<(usize, u32), Vec<f64>> = BTreeMap::new();
    for d in detail {
        groups
            .entry((d.horizon_h, bucket(d)))
            .or_default()
            .push(d.model.ae);
    }
    groups
        .into_iter()
        .map(|((horizon_h, bucket), errors)| ErrorStats {
            horizon_h,
            bucket,
            mean: errors.iter().mean(),
            std: (errors.len() > 1).then(|| errors.iter().std_dev()),
            count: errors.len(),
        })
        .collect()
}

fn regime_alerts(detail: &[BacktestDetail]) -> Vec<RegimeAlert> {
    let mut by_horizon: BTreeMap<usize, Vec<&BacktestDetail>> = BTreeMap::new();
    for d in detail {
        by_horizon.entry(d.horizon_h).or_default().push(d);
    }

    let mut alerts = Vec::new();
    for (horizon_h, rows) in by_horizon {
        if rows.len() < MIN_REGIME_ROWS {
            continue;
        }
        let Some(latest) = rows.iter().map(|d| d.timestamp).max() else {
            continue;
        };
        let cutoff = latest - Duration::days(RECENT_DAYS);
        let (recent, historical): (Vec<&BacktestDetail>, Vec<&BacktestDetail>) =
            rows.into_iter().partition(|d| d.timestamp >= cutoff);
        if recent.is_empty() || historical.len() <= MIN_HISTORICAL_ROWS {
            continue;
        }

        let recent_mae = recent.iter().map(|d| d.model.ae).mean();
        let historical_errors: Vec<f64> = historical.iter().map(|d| d.model.ae).collect();
        let Ok(historical_p90) = percentile(&historical_errors, 0.9) else {
            continue;
        };
        if recent_mae > historical_p90 {
            alerts.push(RegimeAlert {
                horizon_h,
                recent_mae,
                historical_p90,
            });
        }
    }
    alerts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::PointErrors;
    use crate::forecast::PredictionMode;
    use approx::assert_relative_eq;
    use chrono::{DateTime, TimeZone, Utc};

    fn detail(horizon: usize, timestamp: DateTime<Utc>, ae: f64) -> BacktestDetail {
        let errors = PointErrors::new(50.0 + ae, 50.0);
        BacktestDetail {
            fold: 1,
            horizon_h: horizon,
            origin: timestamp - Duration::hours(horizon as i64),
            timestamp,
            y_true: 50.0 + ae,
            y_pred_model: 50.0,
            y_pred_naive: 50.0,
            y_pred_seasonal: 50.0,
            model: errors,
            naive: errors,
            seasonal: errors,
            prediction_mode: PredictionMode::Model,
            interval: None,
        }
    }

    #[test]
    fn test_hourly_groups() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 6, 0, 0).unwrap();
        let rows = vec![
            detail(24, t0, 2.0),
            detail(24, t0 + Duration::days(1), 4.0),
            detail(24, t0 + Duration::hours(1), 10.0),
        ];
        let anatomy = ErrorAnatomy::from_detail(&rows);
        assert_eq!(anatomy.hourly.len(), 2);
        let six = &anatomy.hourly[0];
        assert_eq!((six.bucket, six.count), (6, 2));
        assert_relative_eq!(six.mean, 3.0, epsilon = 1e-9);
        assert_relative_eq!(six.std.unwrap(), 2f64.sqrt(), epsilon = 1e-9);
        assert_eq!(anatomy.hourly[1].std, None);
        // 2024-01-01 is a Monday
        assert_eq!(anatomy.weekly[0].bucket, 0);
    }

    #[test]
    fn test_regime_shift_alert() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut rows: Vec<BacktestDetail> = (0..20)
            .map(|d| detail(48, t0 + Duration::days(d), 5.0))
            .collect();
        rows.extend((20..23).map(|d| detail(48, t0 + Duration::days(d), 40.0)));
        let anatomy = ErrorAnatomy::from_detail(&rows);
        assert!(anatomy.has_alerts());
        assert_eq!(anatomy.regime_alerts[0].horizon_h, 48);
    }

    #[test]
    fn test_short_history_never_alerts() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let rows: Vec<BacktestDetail> = (0..10)
            .map(|d| detail(24, t0 + Duration::days(d), d as f64 * 10.0))
            .collect();
        assert!(!ErrorAnatomy::from_detail(&rows).has_alerts());
    }
}
