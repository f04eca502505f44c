//! Coverage-driven widening or narrowing of forecast intervals

use crate::config::CalibrationConfig;
use crate::forecast::ForecastRow;
use std::collections::BTreeMap;
use tracing::info;

/// Rescales p10/p90 around p50 so intervals track the observed coverage
#[derive(Debug, Clone)]
pub struct IntervalCalibrator {
    config: CalibrationConfig,
    ceiling: f64,
}

impl IntervalCalibrator {
    pub fn new(config: CalibrationConfig, ceiling: f64) -> Self {
        Self { config, ceiling }
    }

    /// Width factor for an observed coverage, `None` when within tolerance
    pub fn factor(&self, coverage: f64) -> Option<f64> {
        let deviation = coverage - self.config.target_coverage;
        if deviation.abs() <= self.config.tolerance {
            return None;
        }
        let f = self.config.adjustment_factor;
        Some(if deviation < 0.0 { 1.0 + f } else { 1.0 - f / 2.0 })
    }

    /// Adjust every row whose horizon has a recorded coverage.
    ///
    /// Rows for horizons without coverage pass through unchanged.
    pub fn adjust(&self, forecasts: &[ForecastRow], coverage: &BTreeMap<usize, f64>) -> Vec<ForecastRow> {
        let mut factors: BTreeMap<usize, f64> = BTreeMap::new();
        for (&horizon, &observed) in coverage {
            if let Some(factor) = self.factor(observed) {
                info!(
                    "Horizon {}h coverage {:.2} vs target {:.2}: scaling intervals by {:.3}",
                    horizon, observed, self.config.target_coverage, factor
                );
                factors.insert(horizon, factor);
            }
        }

        forecasts
            .iter()
            .map(|row| {
                let mut row = row.clone();
                if let Some(&factor) = factors.get(&row.horizon_h) {
                    let p50 = row.p50;
                    let p10 = (p50 - (p50 - row.p10) * factor).clamp(0.0, self.ceiling);
                    let p90 = (p50 + (row.p90 - p50) * factor).clamp(0.0, self.ceiling);
                    row.set_values(p10.min(p50), p50, p90.max(p50));
                }
                row
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::AqiCategory;
    use crate::forecast::PredictionMode;
    use chrono::{TimeZone, Utc};

    fn row(horizon: usize, p10: f64, p50: f64, p90: f64) -> ForecastRow {
        ForecastRow {
            timestamp: Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap(),
            horizon_h: horizon,
            y_pred: p50,
            p10,
            p50,
            p90,
            prediction_mode: PredictionMode::Model,
            category: AqiCategory::from_aqi(p50),
        }
    }

    fn calibrator() -> IntervalCalibrator {
        IntervalCalibrator::new(CalibrationConfig::default(), 500.0)
    }

    #[test]
    fn test_factor_thresholds() {
        let c = calibrator();
        assert_eq!(c.factor(0.8), None);
        assert_eq!(c.factor(0.84), None);
        assert!((c.factor(0.6).unwrap() - 1.1).abs() < 1e-12);
        assert!((c.factor(0.95).unwrap() - 0.95).abs() < 1e-12);
    }

    #[test]
    fn test_undercoverage_widens() {
        let coverage = BTreeMap::from([(24, 0.6)]);
        let out = calibrator().adjust(&[row(24, 40.0, 50.0, 60.0), row(48, 40.0, 50.0, 60.0)], &coverage);
        assert!((out[0].p10 - 39.0).abs() < 1e-9);
        assert!((out[0].p90 - 61.0).abs() < 1e-9);
        assert_eq!(out[0].p50, 50.0);
        assert_eq!(out[1], row(48, 40.0, 50.0, 60.0));
    }

    #[test]
    fn test_widening_is_clipped() {
        let coverage = BTreeMap::from([(24, 0.5)]);
        let out = calibrator().adjust(&[row(24, 1.0, 20.0, 495.0)], &coverage);
        assert_eq!(out[0].p10, 0.0);
        assert_eq!(out[0].p90, 500.0);
        assert!(out[0].is_ordered());
    }
}
