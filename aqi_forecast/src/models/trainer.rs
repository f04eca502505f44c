//! Horizon-aware model training with fallback and optional tuning

use crate::config::ModelConfig;
use crate::error::{ForecastError, Result};
use crate::features::FeatureMatrix;
use crate::metrics::mean_absolute_error;
use crate::models::forest::{ForestParams, RandomForest};
use crate::models::gbm::{GbmParams, GradientBoosting, Loss};
use crate::models::{FittedModel, PointRegressor, QuantileRegressor};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;
use tracing::{debug, info, warn};

const DEPTH_GRID: [usize; 3] = [3, 5, 7];
const LEARNING_RATE_GRID: [f64; 3] = [0.05, 0.1, 0.15];
const ESTIMATOR_GRID: [usize; 3] = [100, 200, 300];
const SUBSAMPLE_GRID: [f64; 3] = [0.7, 0.8, 0.9];

/// Gradient boosting with squared or quantile loss
#[derive(Debug, Clone)]
pub struct BoostedRegressor {
    params: GbmParams,
}

impl BoostedRegressor {
    pub fn new(params: GbmParams) -> Self {
        Self { params }
    }
}

impl PointRegressor for BoostedRegressor {
    fn name(&self) -> &str {
        "gradient_boosting"
    }

    fn fit(&self, x: &FeatureMatrix, y: &[f64]) -> Result<FittedModel> {
        GradientBoosting::fit(x, y, &self.params, Loss::Squared).map(FittedModel::GradientBoosting)
    }
}

impl QuantileRegressor for BoostedRegressor {
    fn name(&self) -> &str {
        "gradient_boosting_quantile"
    }

    fn fit_quantile(&self, x: &FeatureMatrix, y: &[f64], alpha: f64) -> Result<FittedModel> {
        GradientBoosting::fit(x, y, &self.params, Loss::Quantile(alpha))
            .map(FittedModel::GradientBoosting)
    }
}

/// Random forest, the last resort for both point and quantile requests
#[derive(Debug, Clone)]
pub struct ForestRegressor {
    params: ForestParams,
}

impl ForestRegressor {
    pub fn new(params: ForestParams) -> Self {
        Self { params }
    }
}

impl PointRegressor for ForestRegressor {
    fn name(&self) -> &str {
        "random_forest"
    }

    fn fit(&self, x: &FeatureMatrix, y: &[f64]) -> Result<FittedModel> {
        RandomForest::fit(x, y, &self.params).map(FittedModel::RandomForest)
    }
}

/// Trains one model per call, trying strategies in priority order
#[derive(Debug)]
pub struct ModelTrainer {
    config: ModelConfig,
    point: Vec<Box<dyn PointRegressor>>,
    quantile: Vec<Box<dyn QuantileRegressor>>,
    fallback: Vec<Box<dyn PointRegressor>>,
}

impl ModelTrainer {
    /// Boosting first, random forest as the fallback
    pub fn new(config: ModelConfig) -> Self {
        let gbm = Self::gbm_params(&config);
        let forest = ForestParams {
            n_trees: config.forest_trees,
            max_depth: config.forest_max_depth,
            min_samples_leaf: 1,
            max_bins: config.max_bins,
            seed: config.seed,
        };
        Self {
            point: vec![Box::new(BoostedRegressor::new(gbm))],
            quantile: vec![Box::new(BoostedRegressor::new(gbm))],
            fallback: vec![Box::new(ForestRegressor::new(forest))],
            config,
        }
    }

    /// Replace the strategy lists
    pub fn with_strategies(
        config: ModelConfig,
        point: Vec<Box<dyn PointRegressor>>,
        quantile: Vec<Box<dyn QuantileRegressor>>,
        fallback: Vec<Box<dyn PointRegressor>>,
    ) -> Self {
        Self {
            config,
            point,
            quantile,
            fallback,
        }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    fn gbm_params(config: &ModelConfig) -> GbmParams {
        GbmParams {
            n_estimators: config.n_estimators,
            learning_rate: config.learning_rate,
            max_depth: config.max_depth,
            subsample: config.subsample,
            min_samples_leaf: config.min_samples_leaf,
            max_bins: config.max_bins,
            seed: config.seed,
        }
    }

    /// Fit a model for `horizon`.
    ///
    /// Rows with a non-finite target are ignored. Only empty or mismatched
    /// input is a hard error; strategy failures move on to the next strategy.
    pub fn train(
        &self,
        x: &FeatureMatrix,
        y: &[f64],
        horizon: usize,
        quantile: Option<f64>,
        with_hpo: bool,
    ) -> Result<FittedModel> {
        if x.n_rows() != y.len() {
            return Err(ForecastError::DataError(format!(
                "Feature matrix has {} rows but target has {}",
                x.n_rows(),
                y.len()
            )));
        }
        let keep: Vec<usize> = (0..y.len()).filter(|&i| y[i].is_finite()).collect();
        if keep.is_empty() {
            return Err(ForecastError::DataError(format!(
                "No rows with a finite target for horizon {}h",
                horizon
            )));
        }
        let (x, y) = if keep.len() < y.len() {
            debug!("Ignoring {} rows with non-finite targets", y.len() - keep.len());
            (x.select_rows(&keep), keep.iter().map(|&i| y[i]).collect::<Vec<_>>())
        } else {
            (x.clone(), y.to_vec())
        };

        let min_samples = self.config.min_samples(horizon);
        if y.len() < min_samples {
            warn!(
                "Insufficient data for horizon {}h: {} < {} samples, training anyway",
                horizon,
                y.len(),
                min_samples
            );
        }

        let tuned = if with_hpo && y.len() >= self.config.hpo_min_samples {
            match self.tune(&x, &y, quantile) {
                Ok(params) => Some(BoostedRegressor::new(params)),
                Err(e) => {
                    warn!("Hyperparameter search failed for horizon {}h: {}", horizon, e);
                    None
                }
            }
        } else {
            None
        };

        let mut last_error = None;
        match quantile {
            Some(alpha) => {
                let mut chain: Vec<&dyn QuantileRegressor> = Vec::new();
                if let Some(t) = tuned.as_ref() {
                    chain.push(t);
                }
                for s in &self.quantile {
                    chain.push(s.as_ref());
                }
                for strategy in chain {
                    match strategy.fit_quantile(&x, &y, alpha) {
                        Ok(model) => return Ok(model),
                        Err(e) => {
                            warn!(
                                "{} failed for horizon {}h, quantile {}: {}",
                                strategy.name(),
                                horizon,
                                alpha,
                                e
                            );
                            last_error = Some(e);
                        }
                    }
                }
            }
            None => {
                let mut chain: Vec<&dyn PointRegressor> = Vec::new();
                if let Some(t) = tuned.as_ref() {
                    chain.push(t);
                }
                for s in &self.point {
                    chain.push(s.as_ref());
                }
                for strategy in chain {
                    match strategy.fit(&x, &y) {
                        Ok(model) => return Ok(model),
                        Err(e) => {
                            warn!("{} failed for horizon {}h: {}", strategy.name(), horizon, e);
                            last_error = Some(e);
                        }
                    }
                }
            }
        }

        for strategy in &self.fallback {
            info!("Falling back to {} for horizon {}h", strategy.name(), horizon);
            match strategy.fit(&x, &y) {
                Ok(model) => return Ok(model),
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            ForecastError::ModelFit(format!("No strategy configured for horizon {}h", horizon))
        }))
    }

    /// Random search over the boosting grid with expanding-window validation.
    ///
    /// Each trial is scored by negative mean absolute error across splits.
    pub fn tune(&self, x: &FeatureMatrix, y: &[f64], quantile: Option<f64>) -> Result<GbmParams> {
        let splits = expanding_window_splits(y.len());
        if splits.is_empty() {
            return Err(ForecastError::InsufficientHistory {
                context: "hyperparameter search".to_string(),
                actual: y.len(),
                required: self.config.hpo_min_samples,
            });
        }

        let base = Self::gbm_params(&self.config);
        let grid_size = DEPTH_GRID.len() * LEARNING_RATE_GRID.len() * ESTIMATOR_GRID.len() * SUBSAMPLE_GRID.len();
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let trials = sample(&mut rng, grid_size, self.config.hpo_trials.clamp(1, grid_size));
        let loss = quantile.map_or(Loss::Squared, Loss::Quantile);

        let mut best: Option<(f64, GbmParams)> = None;
        for code in trials.iter() {
            let params = decode_trial(code, &base);
            let mut total_mae = 0.0;
            for &(train_end, test_end) in &splits {
                let model = GradientBoosting::fit(&x.slice_rows(0, train_end), &y[..train_end], &params, loss)?;
                let test = x.slice_rows(train_end, test_end);
                let predicted: Vec<f64> = test.rows().iter().map(|row| model.predict_row(row)).collect();
                total_mae += mean_absolute_error(&predicted, &y[train_end..test_end])?;
            }
            let score = -total_mae / splits.len() as f64;
            debug!("Trial {:?} scored {:.4}", params, score);
            if best.map_or(true, |(s, _)| score > s) {
                best = Some((score, params));
            }
        }

        let (score, params) = best.ok_or_else(|| ForecastError::ModelFit("No trials evaluated".to_string()))?;
        info!(
            "Best parameters: depth={} lr={} n_estimators={} subsample={} (score {:.4})",
            params.max_depth, params.learning_rate, params.n_estimators, params.subsample, score
        );
        Ok(params)
    }
}

/// `(train_end, test_end)` pairs for expanding-window validation.
///
/// `min(5, n / 100)` splits with test windows of `n / 10` rows, the last
/// one ending at `n`.
pub fn expanding_window_splits(n: usize) -> Vec<(usize, usize)> {
    let n_splits = (n / 100).min(5);
    let test_size = n / 10;
    if n_splits < 2 || test_size == 0 || n_splits * test_size >= n {
        return Vec::new();
    }
    (0..n_splits)
        .map(|i| {
            let train_end = n - (n_splits - i) * test_size;
            (train_end, train_end + test_size)
        })
        .collect()
}

fn decode_trial(code: usize, base: &GbmParams) -> GbmParams {
    let depth = DEPTH_GRID[code % 3];
    let lr = LEARNING_RATE_GRID[(code / 3) % 3];
    let estimators = ESTIMATOR_GRID[(code / 9) % 3];
    let subsample = SUBSAMPLE_GRID[(code / 27) % 3];
    GbmParams {
        n_estimators: estimators,
        learning_rate: lr,
        max_depth: depth,
        subsample,
        ..*base
    }
}
