//! Blending of global forecasts with a small city-local ridge model

use crate::config::BlendConfig;
use crate::data::CleanSeries;
use crate::error::{ForecastError, Result};
use crate::forecast::ForecastRow;
use aqi_math::RidgeRegression;
use chrono::Timelike;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Why the local model was left out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Disabled,
    InsufficientContext,
    InsufficientRecentData,
    InsufficientLocalData,
    Failed,
}

/// Weights actually applied to the global and local predictions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlendWeights {
    pub global: f64,
    pub local: f64,
    /// In-sample MAE of the local model
    pub local_mae: Option<f64>,
    pub skipped: Option<SkipReason>,
}

impl BlendWeights {
    fn global_only(reason: SkipReason) -> Self {
        Self {
            global: 1.0,
            local: 0.0,
            local_mae: None,
            skipped: Some(reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlendOutcome {
    pub rows: Vec<ForecastRow>,
    pub weights: BlendWeights,
}

/// Corrects global forecasts toward a ridge fit on the most recent hours
#[derive(Debug, Clone)]
pub struct LocalBlender {
    config: BlendConfig,
    ceiling: f64,
}

impl LocalBlender {
    pub fn new(config: BlendConfig, ceiling: f64) -> Self {
        Self { config, ceiling }
    }

    /// Local weight after scaling by how well the local model fits
    pub fn dynamic_weight(&self, local_mae: f64) -> f64 {
        let w = self.config.local_weight;
        if local_mae < self.config.good_mae {
            self.config.max_local_weight.min(w * 1.5)
        } else if local_mae > self.config.poor_mae {
            self.config.min_local_weight.max(w * 0.5)
        } else {
            w
        }
    }

    /// Blend every row over the configured `min_local_samples` window;
    /// any failure returns the input unchanged
    pub fn blend(&self, forecasts: &[ForecastRow], context: &CleanSeries) -> BlendOutcome {
        self.blend_with(forecasts, context, self.config.min_local_samples)
    }

    /// Like [`LocalBlender::blend`] with the local window given per call
    pub fn blend_with(
        &self,
        forecasts: &[ForecastRow],
        context: &CleanSeries,
        min_local_samples: usize,
    ) -> BlendOutcome {
        if !self.config.enabled {
            return self.unchanged(forecasts, SkipReason::Disabled);
        }
        if context.len() < min_local_samples {
            return self.unchanged(forecasts, SkipReason::InsufficientContext);
        }
        match self.try_blend(forecasts, context, min_local_samples) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Local blending failed for {}: {}", context.city_key, e);
                self.unchanged(forecasts, SkipReason::Failed)
            }
        }
    }

    fn unchanged(&self, forecasts: &[ForecastRow], reason: SkipReason) -> BlendOutcome {
        BlendOutcome {
            rows: forecasts.to_vec(),
            weights: BlendWeights::global_only(reason),
        }
    }

    fn try_blend(
        &self,
        forecasts: &[ForecastRow],
        context: &CleanSeries,
        min_local_samples: usize,
    ) -> Result<BlendOutcome> {
        let start = context.len() - min_local_samples;
        let recent = &context.points[start..];
        let observed = recent.iter().filter(|p| p.aqi.is_some()).count();
        if observed < self.config.min_recent_points {
            return Ok(self.unchanged(forecasts, SkipReason::InsufficientRecentData));
        }

        let (x, y): (Vec<Vec<f64>>, Vec<f64>) = recent
            .windows(2)
            .filter_map(|pair| match (pair[0].aqi, pair[1].aqi) {
                (Some(lag_1), Some(aqi)) => {
                    Some((vec![f64::from(pair[1].timestamp.hour()), lag_1], aqi))
                }
                _ => None,
            })
            .unzip();
        if x.len() < self.config.min_fit_rows {
            return Ok(self.unchanged(forecasts, SkipReason::InsufficientLocalData));
        }

        let model = RidgeRegression::fit(&x, &y, self.config.ridge_alpha)?;
        let mut abs_err = 0.0;
        for (row, target) in x.iter().zip(&y) {
            abs_err += (model.predict(row)? - target).abs();
        }
        let local_mae = abs_err / x.len() as f64;
        let local_weight = self.dynamic_weight(local_mae);

        let (last_ts, last_aqi) = match (context.last_timestamp(), context.last_observed_aqi()) {
            (Some(ts), Some(aqi)) => (ts, aqi),
            _ => {
                return Err(ForecastError::DataError(
                    "Context has no observed AQI".to_string(),
                ))
            }
        };
        let local_pred = model.predict(&[f64::from(last_ts.hour()), last_aqi])?;

        let rows = forecasts
            .iter()
            .map(|row| {
                let mut row = row.clone();
                let global = row.p50;
                let blended = (1.0 - local_weight) * global + local_weight * local_pred;
                let ratio = if global > 0.0 { blended / global } else { 1.0 };
                let p50 = blended.clamp(0.0, self.ceiling);
                let p10 = (row.p10 * ratio).clamp(0.0, self.ceiling);
                let p90 = (row.p90 * ratio).clamp(0.0, self.ceiling);
                row.set_values(p10.min(p50), p50, p90.max(p50));
                row
            })
            .collect();

        info!(
            "Blended {} forecasts for {}: {:.0}% local (local MAE {:.2})",
            forecasts.len(),
            context.city_key,
            local_weight * 100.0,
            local_mae
        );
        Ok(BlendOutcome {
            rows,
            weights: BlendWeights {
                global: 1.0 - local_weight,
                local: local_weight,
                local_mae: Some(local_mae),
                skipped: None,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{AqiCategory, Parameter};
    use crate::forecast::PredictionMode;
    use chrono::{Duration, TimeZone, Utc};

    fn blender() -> LocalBlender {
        LocalBlender::new(
            BlendConfig {
                enabled: true,
                ..BlendConfig::default()
            },
            500.0,
        )
    }

    fn context(values: Vec<Option<f64>>) -> CleanSeries {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        CleanSeries::from_hourly_values("Reno, NV", Parameter::Pm25, start, &values)
    }

    fn forecast(p10: f64, p50: f64, p90: f64) -> ForecastRow {
        ForecastRow {
            timestamp: Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap() + Duration::hours(24),
            horizon_h: 24,
            y_pred: p50,
            p10,
            p50,
            p90,
            prediction_mode: PredictionMode::Model,
            category: AqiCategory::from_aqi(p50),
        }
    }

    #[test]
    fn test_dynamic_weight_bands() {
        let b = blender();
        assert!((b.dynamic_weight(5.0) - 0.3).abs() < 1e-12);
        assert!((b.dynamic_weight(30.0) - 0.2).abs() < 1e-12);
        assert!((b.dynamic_weight(80.0) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_short_context_is_unchanged() {
        let rows = vec![forecast(40.0, 50.0, 60.0)];
        let out = blender().blend(&rows, &context(vec![Some(30.0); 20]));
        assert_eq!(out.rows, rows);
        assert_eq!(out.weights.skipped, Some(SkipReason::InsufficientContext));
    }

    #[test]
    fn test_sparse_context_is_unchanged() {
        let mut values = vec![None; 60];
        values[59] = Some(30.0);
        let rows = vec![forecast(40.0, 50.0, 60.0)];
        let out = blender().blend(&rows, &context(values));
        assert_eq!(out.rows, rows);
        assert_eq!(out.weights.skipped, Some(SkipReason::InsufficientRecentData));
    }

    #[test]
    fn test_alternating_gaps_leave_too_few_pairs() {
        // every other hour observed: 25 points but no consecutive pair
        let values: Vec<Option<f64>> = (0..50).map(|i| (i % 2 == 0).then_some(35.0)).collect();
        let rows = vec![forecast(40.0, 50.0, 60.0)];
        let out = blender().blend(&rows, &context(values));
        assert_eq!(out.weights.skipped, Some(SkipReason::InsufficientLocalData));
    }

    #[test]
    fn test_constant_context_pulls_toward_local_level() {
        let rows = vec![forecast(80.0, 100.0, 120.0)];
        let out = blender().blend(&rows, &context(vec![Some(40.0); 72]));
        let row = &out.rows[0];
        assert!(out.weights.skipped.is_none());
        assert!(row.p50 < 100.0 && row.p50 > 40.0);
        assert!(row.is_ordered());
        assert_eq!(row.y_pred, row.p50);
    }

    #[test]
    fn test_window_can_be_set_per_call() {
        let rows = vec![forecast(80.0, 100.0, 120.0)];
        let ctx = context(vec![Some(40.0); 36]);
        let b = blender();
        assert_eq!(
            b.blend(&rows, &ctx).weights.skipped,
            Some(SkipReason::InsufficientContext)
        );

        let out = b.blend_with(&rows, &ctx, 30);
        assert!(out.weights.skipped.is_none());
        assert!(out.rows[0].p50 < 100.0);

        // a window too small for the recent-point minimum
        let out = b.blend_with(&rows, &ctx, 12);
        assert_eq!(out.weights.skipped, Some(SkipReason::InsufficientRecentData));
    }

    #[test]
    fn test_disabled_blender_is_identity() {
        let blender = LocalBlender::new(BlendConfig::default(), 500.0);
        let rows = vec![forecast(40.0, 50.0, 60.0)];
        let out = blender.blend(&rows, &context(vec![Some(40.0); 72]));
        assert_eq!(out.rows, rows);
        assert_eq!(out.weights.skipped, Some(SkipReason::Disabled));
    }
}
