//! Per-horizon training into a [`ModelBundle`]

use crate::bundle::{HorizonModels, ModelBundle};
use crate::config::{validate_horizons, ForecastConfig, IntervalMethod};
use crate::data::{CityMeta, CleanSeries, WeatherSeries};
use crate::error::{ForecastError, Result};
use crate::features::{BuildMode, FeatureBuilder, FeatureSet};
use crate::models::ModelTrainer;
use crate::utils::chronological_split;
use chrono::Utc;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Share of feature rows used for fitting; the rest validates
pub const TRAIN_FRACTION: f64 = 0.8;

/// Validation residuals are only kept above this many rows
const MIN_RESIDUAL_ROWS: usize = 10;

/// Result of training a single horizon
#[derive(Debug, Clone)]
pub struct HorizonFit {
    pub models: HorizonModels,
    /// Absolute validation residuals of the point model
    pub residuals: Option<Vec<f64>>,
    /// Column order of the matrices the models were trained on
    pub feature_names: Vec<String>,
    /// Feature rows before the train/validation split
    pub n_rows: usize,
    pub n_train: usize,
    pub mode: BuildMode,
}

/// Trains one model (or quantile triplet) per horizon
#[derive(Debug)]
pub struct MultiHorizonOrchestrator {
    builder: FeatureBuilder,
    trainer: ModelTrainer,
    interval_method: IntervalMethod,
    with_hpo: bool,
}

impl MultiHorizonOrchestrator {
    pub fn new(config: &ForecastConfig) -> Self {
        Self {
            builder: FeatureBuilder::new(config.features.clone()),
            trainer: ModelTrainer::new(config.model.clone()),
            interval_method: config.interval_method,
            with_hpo: config.model.hpo,
        }
    }

    pub fn builder(&self) -> &FeatureBuilder {
        &self.builder
    }

    pub fn interval_method(&self) -> IntervalMethod {
        self.interval_method
    }

    /// Build features and fit the models for one horizon.
    ///
    /// When `align_to` is given the feature matrix is reordered to those
    /// columns (absent ones filled with zero) before fitting.
    pub fn train_horizon(
        &self,
        series: &CleanSeries,
        horizon: usize,
        city_meta: Option<&CityMeta>,
        weather: Option<&WeatherSeries>,
        align_to: Option<&[String]>,
    ) -> Result<HorizonFit> {
        let set = self.builder.build(series, horizon, city_meta, weather, true)?;
        self.fit_features(set, horizon, align_to)
    }

    /// Fit the models for one horizon from an already built training set
    pub fn fit_features(
        &self,
        set: FeatureSet,
        horizon: usize,
        align_to: Option<&[String]>,
    ) -> Result<HorizonFit> {
        self.fit_split(set, horizon, align_to, TRAIN_FRACTION)
    }

    /// Fit a backtest fold's models. Every row is used for fitting unless
    /// conformal intervals need the held-out tail for residuals.
    pub fn fit_fold(&self, set: FeatureSet, horizon: usize) -> Result<HorizonFit> {
        let train_fraction = match self.interval_method {
            IntervalMethod::Conformal => TRAIN_FRACTION,
            IntervalMethod::Quantile | IntervalMethod::None => 1.0,
        };
        self.fit_split(set, horizon, None, train_fraction)
    }

    fn fit_split(
        &self,
        set: FeatureSet,
        horizon: usize,
        align_to: Option<&[String]>,
        train_fraction: f64,
    ) -> Result<HorizonFit> {
        let y = set.y.ok_or(ForecastError::NoValidData { horizon })?;
        let x = match align_to {
            Some(names) => set.x.align(names),
            None => set.x,
        };

        let n_rows = x.n_rows();
        let split = chronological_split(n_rows, train_fraction);
        let x_train = x.slice_rows(0, split);
        let y_train = &y[..split];

        let (models, residuals) = match self.interval_method {
            IntervalMethod::Quantile => {
                let p10 = self.trainer.train(&x_train, y_train, horizon, Some(0.1), self.with_hpo)?;
                let p50 = self.trainer.train(&x_train, y_train, horizon, Some(0.5), self.with_hpo)?;
                let p90 = self.trainer.train(&x_train, y_train, horizon, Some(0.9), self.with_hpo)?;
                (HorizonModels::Quantile { p10, p50, p90 }, None)
            }
            IntervalMethod::Conformal => {
                let model = self.trainer.train(&x_train, y_train, horizon, None, self.with_hpo)?;
                let n_val = n_rows - split;
                let residuals = if n_val > MIN_RESIDUAL_ROWS {
                    let x_val = x.slice_rows(split, n_rows);
                    let predicted = model.predict(&x_val)?;
                    Some(
                        predicted
                            .iter()
                            .zip(&y[split..])
                            .filter(|(_, t)| t.is_finite())
                            .map(|(p, t)| (t - p).abs())
                            .collect(),
                    )
                } else {
                    None
                };
                (HorizonModels::Point(model), residuals)
            }
            IntervalMethod::None => {
                let model = self.trainer.train(&x_train, y_train, horizon, None, self.with_hpo)?;
                (HorizonModels::Point(model), None)
            }
        };

        Ok(HorizonFit {
            models,
            residuals,
            feature_names: x.names().to_vec(),
            n_rows,
            n_train: split,
            mode: set.mode,
        })
    }

    /// Train every horizon; a horizon that fails is logged and left out.
    ///
    /// The first successful horizon fixes the bundle's feature names and every
    /// later horizon is trained on matrices aligned to them.
    pub fn train_all(
        &self,
        series: &CleanSeries,
        horizons: &[usize],
        city_meta: Option<&CityMeta>,
        weather: Option<&WeatherSeries>,
    ) -> Result<ModelBundle> {
        validate_horizons(horizons)?;
        info!(
            "Training {} models for horizons {:?} on {} ({} points)",
            self.interval_method,
            horizons,
            series.city_key,
            series.len()
        );

        let mut models = BTreeMap::new();
        let mut residuals = BTreeMap::new();
        let mut feature_names: Option<Vec<String>> = None;

        for &horizon in horizons {
            match self.train_horizon(series, horizon, city_meta, weather, feature_names.as_deref()) {
                Ok(fit) => {
                    info!(
                        "Horizon {}h: {} train, {} validation rows",
                        horizon,
                        fit.n_train,
                        fit.n_rows - fit.n_train
                    );
                    if feature_names.is_none() {
                        feature_names = Some(fit.feature_names);
                    }
                    if let Some(r) = fit.residuals {
                        residuals.insert(horizon, r);
                    }
                    models.insert(horizon, fit.models);
                }
                Err(e) => warn!("Failed to train horizon {}h: {}", horizon, e),
            }
        }

        if models.is_empty() {
            warn!("No horizon could be trained for {}", series.city_key);
        }

        Ok(ModelBundle::new(
            models,
            Utc::now(),
            feature_names.unwrap_or_default(),
            self.interval_method,
            residuals,
        ))
    }
}
