//! Regression models for horizon-specific AQI prediction
//!
//! Fitting goes through the [`PointRegressor`] and [`QuantileRegressor`]
//! strategy traits; [`trainer::ModelTrainer`] tries them in a fixed priority
//! order. Every strategy produces a [`FittedModel`], which is what bundles
//! store and the forecast engine evaluates.

use crate::error::{ForecastError, Result};
use crate::features::FeatureMatrix;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

pub mod forest;
pub mod gbm;
pub mod trainer;
pub mod tree;

pub use forest::{ForestParams, RandomForest};
pub use gbm::{GbmParams, GradientBoosting, Loss};
pub use trainer::{BoostedRegressor, ForestRegressor, ModelTrainer};

/// Strategy that fits a conditional-mean model
pub trait PointRegressor: Debug {
    /// Short name used in logs
    fn name(&self) -> &str;

    fn fit(&self, x: &FeatureMatrix, y: &[f64]) -> Result<FittedModel>;
}

/// Strategy that fits a conditional-quantile model
pub trait QuantileRegressor: Debug {
    fn name(&self) -> &str;

    fn fit_quantile(&self, x: &FeatureMatrix, y: &[f64], alpha: f64) -> Result<FittedModel>;
}

/// A trained model, ready to predict on aligned feature rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FittedModel {
    GradientBoosting(GradientBoosting),
    RandomForest(RandomForest),
}

impl FittedModel {
    pub fn kind(&self) -> &'static str {
        match self {
            FittedModel::GradientBoosting(_) => "gradient_boosting",
            FittedModel::RandomForest(_) => "random_forest",
        }
    }

    pub fn n_features(&self) -> usize {
        match self {
            FittedModel::GradientBoosting(m) => m.n_features(),
            FittedModel::RandomForest(m) => m.n_features(),
        }
    }

    /// Predict one row; the row must have exactly `n_features` values
    pub fn predict_row(&self, row: &[f64]) -> Result<f64> {
        if row.len() != self.n_features() {
            return Err(ForecastError::DataError(format!(
                "Model expects {} features, got {}",
                self.n_features(),
                row.len()
            )));
        }
        Ok(match self {
            FittedModel::GradientBoosting(m) => m.predict_row(row),
            FittedModel::RandomForest(m) => m.predict_row(row),
        })
    }

    pub fn predict(&self, x: &FeatureMatrix) -> Result<Vec<f64>> {
        x.rows().iter().map(|r| self.predict_row(r)).collect()
    }

    /// Normalized split-gain importances, one per feature
    pub fn feature_importances(&self) -> &[f64] {
        match self {
            FittedModel::GradientBoosting(m) => m.feature_importances(),
            FittedModel::RandomForest(m) => m.feature_importances(),
        }
    }

    /// Importances paired with feature names, highest first
    pub fn ranked_importances(&self, names: &[String]) -> Vec<(String, f64)> {
        let mut ranked: Vec<(String, f64)> = names
            .iter()
            .cloned()
            .zip(self.feature_importances().iter().copied())
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
    }
}
