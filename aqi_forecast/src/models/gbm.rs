//! Gradient-boosted regression trees with squared or quantile loss

use crate::error::{ForecastError, Result};
use crate::features::FeatureMatrix;
use crate::models::tree::{FeatureBinner, RegressionTree, TreeParams};
use aqi_math::percentile;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// Training objective
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Loss {
    Squared,
    /// Pinball loss at the given quantile level
    Quantile(f64),
}

/// Boosting hyperparameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GbmParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    /// Fraction of rows drawn without replacement for each tree
    pub subsample: f64,
    pub min_samples_leaf: usize,
    pub max_bins: usize,
    pub seed: u64,
}

impl Default for GbmParams {
    fn default() -> Self {
        Self {
            n_estimators: 200,
            learning_rate: 0.1,
            max_depth: 6,
            subsample: 0.8,
            min_samples_leaf: 5,
            max_bins: 64,
            seed: 42,
        }
    }
}

impl GbmParams {
    fn validate(&self) -> Result<()> {
        if self.n_estimators == 0 || self.max_depth == 0 {
            return Err(ForecastError::InvalidParameter(
                "n_estimators and max_depth must be greater than zero".to_string(),
            ));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(ForecastError::InvalidParameter(format!(
                "Learning rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(self.subsample > 0.0 && self.subsample <= 1.0) {
            return Err(ForecastError::InvalidParameter(format!(
                "Subsample must be in (0, 1], got {}",
                self.subsample
            )));
        }
        Ok(())
    }
}

/// Fitted boosting ensemble
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoosting {
    params: GbmParams,
    loss: Loss,
    init: f64,
    trees: Vec<RegressionTree>,
    n_features: usize,
    feature_importances: Vec<f64>,
}

impl GradientBoosting {
    /// Fit an ensemble on `x`/`y`; `y` must be finite
    pub fn fit(x: &FeatureMatrix, y: &[f64], params: &GbmParams, loss: Loss) -> Result<Self> {
        params.validate()?;
        if x.n_rows() != y.len() {
            return Err(ForecastError::ModelFit(format!(
                "Feature matrix has {} rows but target has {}",
                x.n_rows(),
                y.len()
            )));
        }
        if y.is_empty() {
            return Err(ForecastError::ModelFit("Cannot fit on zero rows".to_string()));
        }
        if y.iter().any(|v| !v.is_finite()) {
            return Err(ForecastError::ModelFit("Target contains non-finite values".to_string()));
        }
        if let Loss::Quantile(alpha) = loss {
            if !(alpha > 0.0 && alpha < 1.0) {
                return Err(ForecastError::InvalidParameter(format!(
                    "Quantile level must be in (0, 1), got {}",
                    alpha
                )));
            }
        }

        let n = y.len();
        let binner = FeatureBinner::fit(x, params.max_bins);
        let binned = binner.transform(x);
        let tree_params = TreeParams {
            max_depth: params.max_depth,
            min_samples_leaf: params.min_samples_leaf,
            max_features: None,
        };
        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut importances = vec![0.0; x.n_cols()];

        let init = match loss {
            Loss::Squared => y.iter().sum::<f64>() / n as f64,
            Loss::Quantile(alpha) => percentile(y, alpha)?,
        };
        let mut current = vec![init; n];
        let mut gradients = vec![0.0; n];
        let n_sub = ((n as f64 * params.subsample).round() as usize).clamp(1, n);
        let mut trees = Vec::with_capacity(params.n_estimators);

        for _ in 0..params.n_estimators {
            for i in 0..n {
                gradients[i] = negative_gradient(loss, y[i], current[i]);
            }

            let mut rows = if n_sub < n {
                sample(&mut rng, n, n_sub).into_vec()
            } else {
                (0..n).collect()
            };
            rows.sort_unstable();

            let (mut tree, leaves) = RegressionTree::grow(
                &binned,
                &binner,
                &gradients,
                rows,
                &tree_params,
                &mut rng,
                &mut importances,
            );

            if let Loss::Quantile(alpha) = loss {
                for leaf in &leaves {
                    let residuals: Vec<f64> = leaf.rows.iter().map(|&r| y[r] - current[r]).collect();
                    let value = percentile(&residuals, alpha).unwrap_or(0.0);
                    tree.set_leaf_value(leaf.node, value);
                }
            }

            for (i, row) in x.rows().iter().enumerate() {
                current[i] += params.learning_rate * tree.predict_row(row);
            }
            trees.push(tree);
        }

        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            importances.iter_mut().for_each(|v| *v /= total);
        }

        Ok(Self {
            params: *params,
            loss,
            init,
            trees,
            n_features: x.n_cols(),
            feature_importances: importances,
        })
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        self.init
            + self.params.learning_rate
                * self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>()
    }

    pub fn loss(&self) -> Loss {
        self.loss
    }

    pub fn params(&self) -> &GbmParams {
        &self.params
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn feature_importances(&self) -> &[f64] {
        &self.feature_importances
    }
}

fn negative_gradient(loss: Loss, y: f64, f: f64) -> f64 {
    match loss {
        Loss::Squared => y - f,
        Loss::Quantile(alpha) => {
            if y > f {
                alpha
            } else {
                alpha - 1.0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_distr::{Distribution, Normal};

    fn noisy_line(n: usize) -> (FeatureMatrix, Vec<f64>) {
        let mut rng = StdRng::seed_from_u64(3);
        let noise = Normal::new(0.0, 5.0).unwrap();
        let rows: Vec<Vec<f64>> = (0..n).map(|i| vec![i as f64 / n as f64 * 10.0]).collect();
        let y = rows.iter().map(|r| 20.0 + 3.0 * r[0] + noise.sample(&mut rng)).collect();
        (FeatureMatrix::new(vec!["x".to_string()], rows).unwrap(), y)
    }

    fn small_params() -> GbmParams {
        GbmParams {
            n_estimators: 60,
            max_depth: 3,
            ..Default::default()
        }
    }

    #[test]
    fn test_squared_loss_fits_trend() {
        let (x, y) = noisy_line(400);
        let model = GradientBoosting::fit(&x, &y, &small_params(), Loss::Squared).unwrap();
        assert_eq!(model.n_trees(), 60);
        let low = model.predict_row(&[1.0]);
        let high = model.predict_row(&[9.0]);
        assert!((low - 23.0).abs() < 5.0, "low={}", low);
        assert!((high - 47.0).abs() < 5.0, "high={}", high);
        assert!((model.feature_importances()[0] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_quantile_models_are_ordered() {
        let (x, y) = noisy_line(400);
        let params = small_params();
        let p10 = GradientBoosting::fit(&x, &y, &params, Loss::Quantile(0.1)).unwrap();
        let p90 = GradientBoosting::fit(&x, &y, &params, Loss::Quantile(0.9)).unwrap();
        let row = [5.0];
        assert!(p10.predict_row(&row) < p90.predict_row(&row));

        let covered = x
            .rows()
            .iter()
            .zip(&y)
            .filter(|(r, t)| **t <= p90.predict_row(r))
            .count();
        let rate = covered as f64 / y.len() as f64;
        assert!(rate > 0.75 && rate < 0.99, "rate={}", rate);
    }

    #[test]
    fn test_rejects_bad_input() {
        let (x, y) = noisy_line(10);
        assert!(GradientBoosting::fit(&x, &y[..5], &small_params(), Loss::Squared).is_err());
        let mut bad = y.clone();
        bad[0] = f64::NAN;
        assert!(GradientBoosting::fit(&x, &bad, &small_params(), Loss::Squared).is_err());
        assert!(GradientBoosting::fit(&x, &y, &small_params(), Loss::Quantile(1.5)).is_err());
    }
}
