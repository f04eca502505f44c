//! Configuration for every stage of the forecasting core
//!
//! A single immutable [`ForecastConfig`] is built once (usually from
//! [`ForecastConfig::default`] or a JSON file) and handed to each component
//! constructor. Nothing in the crate reads process-wide settings.

use crate::error::{ForecastError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Daily forecast horizons, 1..7 days, in hours
pub const DAILY_HORIZONS: [usize; 7] = [24, 48, 72, 96, 120, 144, 168];

/// Upper end of the AQI scale
pub const AQI_CEILING: f64 = 500.0;

/// How prediction intervals are produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalMethod {
    /// Separate p10/p50/p90 quantile models
    Quantile,
    /// Point model plus absolute validation residuals
    Conformal,
    /// Point model with a fixed symmetric band
    None,
}

impl std::fmt::Display for IntervalMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            IntervalMethod::Quantile => "quantile",
            IntervalMethod::Conformal => "conformal",
            IntervalMethod::None => "none",
        };
        write!(f, "{}", name)
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    /// Horizons to train and forecast, in hours
    pub horizons: Vec<usize>,
    pub interval_method: IntervalMethod,
    pub normalize: NormalizeConfig,
    pub features: FeatureConfig,
    pub model: ModelConfig,
    pub engine: EngineConfig,
    pub backtest: BacktestConfig,
    pub calibration: CalibrationConfig,
    pub blend: BlendConfig,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            horizons: DAILY_HORIZONS.to_vec(),
            interval_method: IntervalMethod::Quantile,
            normalize: NormalizeConfig::default(),
            features: FeatureConfig::default(),
            model: ModelConfig::default(),
            engine: EngineConfig::default(),
            backtest: BacktestConfig::default(),
            calibration: CalibrationConfig::default(),
            blend: BlendConfig::default(),
        }
    }
}

impl ForecastConfig {
    /// Parse a configuration from JSON; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check that all values are usable
    pub fn validate(&self) -> Result<()> {
        if self.horizons.is_empty() {
            return Err(ForecastError::InvalidParameter(
                "At least one horizon is required".to_string(),
            ));
        }
        validate_horizons(&self.horizons)?;
        validate_percentiles(
            "normalize.winsorize",
            self.normalize.winsorize_low,
            self.normalize.winsorize_high,
        )?;
        validate_percentiles(
            "features.winsorize",
            self.features.winsorize_low,
            self.features.winsorize_high,
        )?;

        if self.features.roll_windows.iter().any(|&w| w == 0) {
            return Err(ForecastError::InvalidParameter(
                "Rolling windows must be greater than zero".to_string(),
            ));
        }
        if self.model.n_estimators == 0 || self.model.max_depth == 0 || self.model.forest_trees == 0 {
            return Err(ForecastError::InvalidParameter(
                "Estimator counts and tree depth must be greater than zero".to_string(),
            ));
        }
        if !(self.model.learning_rate > 0.0 && self.model.learning_rate <= 1.0) {
            return Err(ForecastError::InvalidParameter(format!(
                "Learning rate must be in (0, 1], got {}",
                self.model.learning_rate
            )));
        }
        if !(self.model.subsample > 0.0 && self.model.subsample <= 1.0) {
            return Err(ForecastError::InvalidParameter(format!(
                "Subsample must be in (0, 1], got {}",
                self.model.subsample
            )));
        }
        if !(2..=u16::MAX as usize).contains(&self.model.max_bins) {
            return Err(ForecastError::InvalidParameter(format!(
                "max_bins must be in 2..={}, got {}",
                u16::MAX,
                self.model.max_bins
            )));
        }
        if !(self.engine.conformal_alpha > 0.0 && self.engine.conformal_alpha < 1.0) {
            return Err(ForecastError::InvalidParameter(format!(
                "Conformal alpha must be in (0, 1), got {}",
                self.engine.conformal_alpha
            )));
        }
        if self.backtest.step_hours == 0 || self.backtest.n_folds == 0 {
            return Err(ForecastError::InvalidParameter(
                "Backtest folds and step size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Reject horizons that are not daily multiples within one week
pub fn validate_horizons(horizons: &[usize]) -> Result<()> {
    for &h in horizons {
        if h == 0 || h % 24 != 0 || h > 168 {
            return Err(ForecastError::InvalidParameter(format!(
                "Horizon {}h is not a daily multiple in 24..=168",
                h
            )));
        }
    }
    Ok(())
}

fn validate_percentiles(name: &str, low: f64, high: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&low) || !(0.0..=1.0).contains(&high) || low >= high {
        return Err(ForecastError::InvalidParameter(format!(
            "{} bounds must satisfy 0 <= low < high <= 1, got ({}, {})",
            name, low, high
        )));
    }
    Ok(())
}

/// Raw-record cleaning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeConfig {
    pub winsorize_low: f64,
    pub winsorize_high: f64,
    /// Longest run of missing hours that forward fill may cover
    pub max_fill_hours: usize,
    /// Minimum observed AQI points for a usable series
    pub min_valid_points: usize,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            winsorize_low: 0.01,
            winsorize_high: 0.99,
            max_fill_hours: 3,
            min_valid_points: 30,
        }
    }
}

/// Feature engineering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Ceiling applied to lags and rolling windows
    pub lag_max: usize,
    pub lags: Vec<usize>,
    pub roll_windows: Vec<usize>,
    /// Lags that must be present on a training row when the series has any data for them
    pub required_lags: Vec<usize>,
    pub use_exog: bool,
    pub use_cyclical: bool,
    pub use_quality_flags: bool,
    pub winsorize_low: f64,
    pub winsorize_high: f64,
    /// Window for the data quality score
    pub quality_window: usize,
    pub rush_hours: Vec<u32>,
    /// The target is only winsorized when it has more rows than this
    pub min_target_rows_for_winsorize: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            lag_max: 168,
            lags: DAILY_HORIZONS.to_vec(),
            roll_windows: DAILY_HORIZONS.to_vec(),
            required_lags: vec![24, 48, 72],
            use_exog: true,
            use_cyclical: true,
            use_quality_flags: true,
            winsorize_low: 0.01,
            winsorize_high: 0.99,
            quality_window: 24,
            rush_hours: vec![7, 8, 17, 18, 19],
            min_target_rows_for_winsorize: 10,
        }
    }
}

impl FeatureConfig {
    /// Lags after applying the ceiling
    pub fn active_lags(&self) -> Vec<usize> {
        self.lags.iter().copied().filter(|&l| l <= self.lag_max).collect()
    }

    /// Rolling windows after applying the ceiling
    pub fn active_windows(&self) -> Vec<usize> {
        self.roll_windows
            .iter()
            .copied()
            .filter(|&w| w <= self.lag_max)
            .collect()
    }
}

/// Regressor hyperparameters and training policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub subsample: f64,
    pub min_samples_leaf: usize,
    /// Histogram bins per feature, including the missing-value bin
    pub max_bins: usize,
    pub forest_trees: usize,
    /// Capped at 10 regardless of the configured value
    pub forest_max_depth: usize,
    pub hpo: bool,
    pub hpo_trials: usize,
    pub hpo_min_samples: usize,
    pub seed: u64,
    /// Advisory sample minimums per horizon
    pub min_samples_per_horizon: BTreeMap<usize, usize>,
    pub default_min_samples: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        let min_samples_per_horizon = [
            (24, 75),
            (48, 100),
            (72, 125),
            (96, 160),
            (120, 190),
            (144, 220),
            (168, 260),
        ]
        .into_iter()
        .collect();

        Self {
            n_estimators: 200,
            learning_rate: 0.1,
            max_depth: 6,
            subsample: 0.8,
            min_samples_leaf: 5,
            max_bins: 64,
            forest_trees: 100,
            forest_max_depth: 10,
            hpo: false,
            hpo_trials: 20,
            hpo_min_samples: 200,
            seed: 42,
            min_samples_per_horizon,
            default_min_samples: 50,
        }
    }
}

impl ModelConfig {
    /// Advisory minimum sample count for a horizon
    pub fn min_samples(&self, horizon: usize) -> usize {
        self.min_samples_per_horizon
            .get(&horizon)
            .copied()
            .unwrap_or(self.default_min_samples)
    }
}

/// Forecast-time interval and fallback settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Miscoverage rate for conformal intervals (0.2 -> 80% coverage)
    pub conformal_alpha: f64,
    /// Relative half-width of heuristic and fallback intervals
    pub fallback_band: f64,
    pub seasonal_lag_hours: usize,
    pub aqi_ceiling: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            conformal_alpha: 0.2,
            fallback_band: 0.2,
            seasonal_lag_hours: 168,
            aqi_ceiling: AQI_CEILING,
        }
    }
}

/// Rolling-origin backtest settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    pub n_folds: usize,
    pub min_train_days: usize,
    pub step_hours: usize,
    /// Series shorter than this are never backtested
    pub min_total_hours: usize,
    /// Skip a horizon when its training matrix is smaller than this
    pub min_fold_rows: usize,
    /// Mean coverage below this logs a warning
    pub coverage_warning: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            n_folds: 5,
            min_train_days: 90,
            step_hours: 24,
            min_total_hours: 200,
            min_fold_rows: 50,
            coverage_warning: 0.7,
        }
    }
}

/// Coverage-driven interval adjustment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub target_coverage: f64,
    pub tolerance: f64,
    pub adjustment_factor: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            target_coverage: 0.8,
            tolerance: 0.05,
            adjustment_factor: 0.1,
        }
    }
}

/// Local bias-correction blending
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlendConfig {
    pub enabled: bool,
    pub local_weight: f64,
    pub min_local_samples: usize,
    pub min_recent_points: usize,
    pub min_fit_rows: usize,
    pub ridge_alpha: f64,
    /// In-sample MAE below which the local model is trusted more
    pub good_mae: f64,
    /// In-sample MAE above which the local model is trusted less
    pub poor_mae: f64,
    pub max_local_weight: f64,
    pub min_local_weight: f64,
}

impl Default for BlendConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            local_weight: 0.2,
            min_local_samples: 50,
            min_recent_points: 24,
            min_fit_rows: 10,
            ridge_alpha: 1.0,
            good_mae: 20.0,
            poor_mae: 50.0,
            max_local_weight: 0.3,
            min_local_weight: 0.05,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ForecastConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.horizons, DAILY_HORIZONS.to_vec());
        assert_eq!(config.model.min_samples(24), 75);
        assert_eq!(config.model.min_samples(168), 260);
        assert_eq!(config.model.min_samples(12), 50);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = ForecastConfig::from_json_str(
            r#"{"horizons": [24, 48], "interval_method": "conformal", "model": {"n_estimators": 50}}"#,
        )
        .unwrap();
        assert_eq!(config.horizons, vec![24, 48]);
        assert_eq!(config.interval_method, IntervalMethod::Conformal);
        assert_eq!(config.model.n_estimators, 50);
        assert_eq!(config.model.max_depth, 6);
        assert_eq!(config.backtest.n_folds, 5);
    }

    #[test]
    fn test_invalid_horizons_rejected() {
        assert!(ForecastConfig::from_json_str(r#"{"horizons": [12]}"#).is_err());
        assert!(ForecastConfig::from_json_str(r#"{"horizons": [192]}"#).is_err());
        assert!(ForecastConfig::from_json_str(r#"{"horizons": []}"#).is_err());
    }

    #[test]
    fn test_invalid_percentiles_rejected() {
        let mut config = ForecastConfig::default();
        config.features.winsorize_low = 0.99;
        config.features.winsorize_high = 0.01;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_max_bins_must_fit_bin_indices() {
        let mut config = ForecastConfig::default();
        config.model.max_bins = u16::MAX as usize;
        assert!(config.validate().is_ok());
        config.model.max_bins = 70_000;
        assert!(config.validate().is_err());
        config.model.max_bins = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let config = ForecastConfig::default();
        let json = config.to_json().unwrap();
        let back = ForecastConfig::from_json_str(&json).unwrap();
        assert_eq!(config, back);
    }
}
