//! Multi-horizon forecasting with intervals and fallback tiers

use crate::bundle::{HorizonModels, ModelBundle};
use crate::config::{EngineConfig, ForecastConfig};
use crate::data::{AqiCategory, CityMeta, CleanSeries, WeatherSeries};
use crate::error::{ForecastError, Result};
use crate::features::FeatureBuilder;
use crate::utils::horizon_timestamp;
use aqi_math::percentile;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// How a forecast row was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionMode {
    Model,
    /// Last observed value carried forward
    FallbackCarry,
    /// Value observed one week before the forecast origin
    FallbackSeasonal,
}

impl PredictionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionMode::Model => "model",
            PredictionMode::FallbackCarry => "fallback_carry",
            PredictionMode::FallbackSeasonal => "fallback_seasonal",
        }
    }
}

impl fmt::Display for PredictionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One forecast for one horizon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRow {
    pub timestamp: DateTime<Utc>,
    pub horizon_h: usize,
    /// Always equal to `p50`
    pub y_pred: f64,
    pub p10: f64,
    pub p50: f64,
    pub p90: f64,
    pub prediction_mode: PredictionMode,
    pub category: AqiCategory,
}

impl ForecastRow {
    pub fn is_ordered(&self) -> bool {
        self.p10 <= self.p50 && self.p50 <= self.p90
    }

    pub fn interval_width(&self) -> f64 {
        self.p90 - self.p10
    }

    /// Replace the three values and refresh the derived fields
    pub(crate) fn set_values(&mut self, p10: f64, p50: f64, p90: f64) {
        self.p10 = p10;
        self.p50 = p50;
        self.p90 = p90;
        self.y_pred = p50;
        self.category = AqiCategory::from_aqi(p50);
    }
}

/// Turns a bundle and a context series into forecast rows
#[derive(Debug, Clone)]
pub struct ForecastEngine {
    builder: FeatureBuilder,
    config: EngineConfig,
}

impl ForecastEngine {
    pub fn new(config: &ForecastConfig) -> Self {
        Self {
            builder: FeatureBuilder::new(config.features.clone()),
            config: config.engine.clone(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Forecast every requested horizon from the end of `context`
    pub fn forecast(
        &self,
        context: &CleanSeries,
        bundle: &ModelBundle,
        horizons: &[usize],
    ) -> Result<Vec<ForecastRow>> {
        self.forecast_with(context, bundle, horizons, None, None)
    }

    /// Like [`ForecastEngine::forecast`] with city metadata and weather
    pub fn forecast_with(
        &self,
        context: &CleanSeries,
        bundle: &ModelBundle,
        horizons: &[usize],
        city_meta: Option<&CityMeta>,
        weather: Option<&WeatherSeries>,
    ) -> Result<Vec<ForecastRow>> {
        let (Some(origin), Some(last_aqi)) = (context.last_timestamp(), context.last_observed_aqi())
        else {
            return Err(ForecastError::InsufficientHistory {
                context: format!("forecast context for {}", context.city_key),
                actual: context.valid_count(),
                required: 1,
            });
        };

        let band = self.config.fallback_band;
        let mut rows = Vec::with_capacity(horizons.len());
        for &horizon in horizons {
            let Some(models) = bundle.models_for(horizon) else {
                warn!("No model for horizon {}h, carrying the last value forward", horizon);
                rows.push(self.finish(
                    origin,
                    horizon,
                    (last_aqi * (1.0 - band), last_aqi, last_aqi * (1.0 + band)),
                    PredictionMode::FallbackCarry,
                ));
                continue;
            };

            let row = match self.model_prediction(context, bundle, models, horizon, city_meta, weather) {
                Ok(values) => self.finish(origin, horizon, values, PredictionMode::Model),
                Err(e) => {
                    warn!("Forecast error for horizon {}h: {}", horizon, e);
                    let (value, mode) = self.fallback_value(context, last_aqi);
                    self.finish(
                        origin,
                        horizon,
                        (value * (1.0 - band), value, value * (1.0 + band)),
                        mode,
                    )
                }
            };
            rows.push(row);
        }
        Ok(rows)
    }

    fn model_prediction(
        &self,
        context: &CleanSeries,
        bundle: &ModelBundle,
        models: &HorizonModels,
        horizon: usize,
        city_meta: Option<&CityMeta>,
        weather: Option<&WeatherSeries>,
    ) -> Result<(f64, f64, f64)> {
        let set = self.builder.build(context, horizon, city_meta, weather, false)?;
        if set.x.is_empty() {
            return Err(ForecastError::NoValidData { horizon });
        }
        let last = set.x.slice_rows(set.x.n_rows() - 1, set.x.n_rows());
        let aligned = if bundle.feature_names().is_empty() {
            last
        } else {
            last.align(bundle.feature_names())
        };
        let row = aligned
            .row(0)
            .ok_or(ForecastError::NoValidData { horizon })?;

        let values = match models {
            HorizonModels::Quantile { p10, p50, p90 } => {
                (p10.predict_row(row)?, p50.predict_row(row)?, p90.predict_row(row)?)
            }
            HorizonModels::Point(model) => {
                let p50 = model.predict_row(row)?;
                match bundle.conformal_residuals(horizon).filter(|r| !r.is_empty()) {
                    Some(residuals) => {
                        let q = percentile(residuals, 1.0 - self.config.conformal_alpha)?;
                        (p50 - q, p50, p50 + q)
                    }
                    None => {
                        let band = self.config.fallback_band;
                        (p50 * (1.0 - band), p50, p50 * (1.0 + band))
                    }
                }
            }
        };

        if !(values.0.is_finite() && values.1.is_finite() && values.2.is_finite()) {
            return Err(ForecastError::ModelFit(format!(
                "Non-finite prediction for horizon {}h",
                horizon
            )));
        }
        Ok(values)
    }

    /// Seasonal naive when a week of context exists and that value is present, else carry-forward
    fn fallback_value(&self, context: &CleanSeries, last_aqi: f64) -> (f64, PredictionMode) {
        let lag = self.config.seasonal_lag_hours;
        if context.len() >= lag && lag > 0 {
            if let Some(value) = context.points[context.len() - lag].aqi {
                return (value, PredictionMode::FallbackSeasonal);
            }
        }
        (last_aqi, PredictionMode::FallbackCarry)
    }

    /// Clip into the AQI range and sort the three values
    fn finish(
        &self,
        origin: DateTime<Utc>,
        horizon: usize,
        (p10, p50, p90): (f64, f64, f64),
        mode: PredictionMode,
    ) -> ForecastRow {
        let ceiling = self.config.aqi_ceiling;
        let mut values = [p10, p50, p90].map(|v| v.clamp(0.0, ceiling));
        if !(values[0] <= values[1] && values[1] <= values[2]) {
            warn!(
                "Quantile crossing at horizon {}h: p10={:.2} p50={:.2} p90={:.2}, sorting",
                horizon, values[0], values[1], values[2]
            );
            values.sort_by(|a, b| a.total_cmp(b));
        }
        debug!(
            "Horizon {}h via {}: {:.2} [{:.2}, {:.2}]",
            horizon, mode, values[1], values[0], values[2]
        );
        ForecastRow {
            timestamp: horizon_timestamp(origin, horizon),
            horizon_h: horizon,
            y_pred: values[1],
            p10: values[0],
            p50: values[1],
            p90: values[2],
            prediction_mode: mode,
            category: AqiCategory::from_aqi(values[1]),
        }
    }
}
