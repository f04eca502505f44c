//! Bagged regression trees used when boosting cannot be fitted

use crate::error::{ForecastError, Result};
use crate::features::FeatureMatrix;
use crate::models::tree::{FeatureBinner, RegressionTree, TreeParams};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Depth limit applied to every forest tree
pub const FOREST_DEPTH_CAP: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub max_bins: usize,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: FOREST_DEPTH_CAP,
            min_samples_leaf: 1,
            max_bins: 64,
            seed: 42,
        }
    }
}

/// Random forest regressor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    params: ForestParams,
    trees: Vec<RegressionTree>,
    n_features: usize,
    feature_importances: Vec<f64>,
}

impl RandomForest {
    /// Fit on bootstrap samples, considering a third of the features at each node
    pub fn fit(x: &FeatureMatrix, y: &[f64], params: &ForestParams) -> Result<Self> {
        if x.n_rows() != y.len() {
            return Err(ForecastError::ModelFit(format!(
                "Feature matrix has {} rows but target has {}",
                x.n_rows(),
                y.len()
            )));
        }
        if y.is_empty() || params.n_trees == 0 {
            return Err(ForecastError::ModelFit(
                "Random forest needs at least one row and one tree".to_string(),
            ));
        }
        if y.iter().any(|v| !v.is_finite()) {
            return Err(ForecastError::ModelFit("Target contains non-finite values".to_string()));
        }

        let n = y.len();
        let binner = FeatureBinner::fit(x, params.max_bins);
        let binned = binner.transform(x);
        let tree_params = TreeParams {
            max_depth: params.max_depth.clamp(1, FOREST_DEPTH_CAP),
            min_samples_leaf: params.min_samples_leaf,
            max_features: Some((x.n_cols() / 3).max(1)),
        };
        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut importances = vec![0.0; x.n_cols()];

        let mut trees = Vec::with_capacity(params.n_trees);
        for _ in 0..params.n_trees {
            let mut rows: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            rows.sort_unstable();
            let (tree, _) = RegressionTree::grow(
                &binned,
                &binner,
                y,
                rows,
                &tree_params,
                &mut rng,
                &mut importances,
            );
            trees.push(tree);
        }

        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            importances.iter_mut().for_each(|v| *v /= total);
        }

        Ok(Self {
            params: *params,
            trees,
            n_features: x.n_cols(),
            feature_importances: importances,
        })
    }

    /// Mean prediction across trees
    pub fn predict_row(&self, row: &[f64]) -> f64 {
        self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>() / self.trees.len() as f64
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

    pub fn params(&self) -> &ForestParams {
        &self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forest_fits_two_regimes() {
        let rows: Vec<Vec<f64>> = (0..200)
            .map(|i| vec![i as f64, (i % 7) as f64, (i % 3) as f64])
            .collect();
        let y: Vec<f64> = rows.iter().map(|r| if r[0] < 100.0 { 20.0 } else { 80.0 }).collect();
        let x = FeatureMatrix::new(vec!["a".into(), "b".into(), "c".into()], rows).unwrap();
        let forest = RandomForest::fit(
            &x,
            &y,
            &ForestParams {
                n_trees: 30,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(forest.predict_row(&[10.0, 1.0, 1.0]) < 40.0);
        assert!(forest.predict_row(&[190.0, 1.0, 1.0]) > 60.0);
        assert_eq!(forest.n_trees(), 30);
    }

    #[test]
    fn test_depth_is_capped() {
        let x = FeatureMatrix::new(vec!["a".into()], vec![vec![1.0], vec![2.0]]).unwrap();
        let forest = RandomForest::fit(
            &x,
            &[1.0, 2.0],
            &ForestParams {
                n_trees: 2,
                max_depth: 50,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(forest.params().max_depth == 50);
        assert!(forest.predict_row(&[1.5]).is_finite());
    }
}
