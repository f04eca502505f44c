//! Ridge regression with an unpenalized intercept
//!
//! Small dense problems only: the normal equations are solved directly
//! with Gaussian elimination.

use crate::{MathError, Result};
use serde::{Deserialize, Serialize};

/// Fitted ridge regression model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RidgeRegression {
    alpha: f64,
    coefficients: Vec<f64>,
    intercept: f64,
}

impl RidgeRegression {
    /// Fit a ridge model on row-major features `x` and targets `y`
    pub fn fit(x: &[Vec<f64>], y: &[f64], alpha: f64) -> Result<Self> {
        if alpha < 0.0 {
            return Err(MathError::InvalidInput(
                "Ridge alpha must be non-negative".to_string(),
            ));
        }
        if x.is_empty() || x.len() != y.len() {
            return Err(MathError::InsufficientData(format!(
                "Need matching non-empty features and targets, got {} rows and {} targets",
                x.len(),
                y.len()
            )));
        }

        let n = x.len() as f64;
        let p = x[0].len();
        if x.iter().any(|row| row.len() != p) {
            return Err(MathError::InvalidInput(
                "All feature rows must have the same width".to_string(),
            ));
        }

        // Center so the intercept stays out of the penalty
        let x_mean: Vec<f64> = (0..p)
            .map(|j| x.iter().map(|row| row[j]).sum::<f64>() / n)
            .collect();
        let y_mean = y.iter().sum::<f64>() / n;

        let mut gram = vec![vec![0.0; p]; p];
        let mut rhs = vec![0.0; p];
        for (row, &target) in x.iter().zip(y) {
            let yc = target - y_mean;
            for i in 0..p {
                let xi = row[i] - x_mean[i];
                rhs[i] += xi * yc;
                for j in 0..p {
                    gram[i][j] += xi * (row[j] - x_mean[j]);
                }
            }
        }
        for (i, gram_row) in gram.iter_mut().enumerate() {
            gram_row[i] += alpha;
        }

        let coefficients = solve(gram, rhs)?;
        let intercept = y_mean
            - coefficients
                .iter()
                .zip(&x_mean)
                .map(|(b, m)| b * m)
                .sum::<f64>();

        Ok(Self {
            alpha,
            coefficients,
            intercept,
        })
    }

    /// Predict a single row
    pub fn predict(&self, row: &[f64]) -> Result<f64> {
        if row.len() != self.coefficients.len() {
            return Err(MathError::InvalidInput(format!(
                "Expected {} features, got {}",
                self.coefficients.len(),
                row.len()
            )));
        }
        Ok(self.intercept
            + self
                .coefficients
                .iter()
                .zip(row)
                .map(|(b, x)| b * x)
                .sum::<f64>())
    }

    /// Fitted coefficients, one per feature
    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }
}

/// Solve `a * x = b` with partial pivoting
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Result<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .unwrap_or(col);
        if a[pivot][col].abs() < 1e-12 {
            return Err(MathError::CalculationError(
                "Singular system in ridge regression".to_string(),
            ));
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in (col + 1)..n {
            let factor = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = ((row + 1)..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ols_recovers_exact_plane() {
        // y = 3 + 2 * x0 - x1
        let x: Vec<Vec<f64>> = (0..20)
            .map(|i| vec![i as f64, ((i * 7) % 5) as f64])
            .collect();
        let y: Vec<f64> = x.iter().map(|r| 3.0 + 2.0 * r[0] - r[1]).collect();

        let model = RidgeRegression::fit(&x, &y, 0.0).unwrap();
        assert!((model.intercept() - 3.0).abs() < 1e-8);
        assert!((model.coefficients()[0] - 2.0).abs() < 1e-8);
        assert!((model.coefficients()[1] + 1.0).abs() < 1e-8);
        assert!((model.predict(&[10.0, 1.0]).unwrap() - 22.0).abs() < 1e-8);
    }

    #[test]
    fn test_ridge_shrinks_coefficients() {
        let x: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64]).collect();
        let y: Vec<f64> = x.iter().map(|r| 4.0 * r[0]).collect();
        let ols = RidgeRegression::fit(&x, &y, 0.0).unwrap();
        let ridge = RidgeRegression::fit(&x, &y, 50.0).unwrap();
        assert!(ridge.coefficients()[0].abs() < ols.coefficients()[0].abs());
    }

    #[test]
    fn test_constant_feature_without_penalty_is_singular() {
        let x = vec![vec![1.0], vec![1.0], vec![1.0]];
        let y = vec![1.0, 2.0, 3.0];
        assert!(RidgeRegression::fit(&x, &y, 0.0).is_err());
        // the penalty makes it solvable
        let model = RidgeRegression::fit(&x, &y, 1.0).unwrap();
        assert!((model.predict(&[1.0]).unwrap() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_shape_errors() {
        assert!(RidgeRegression::fit(&[], &[], 1.0).is_err());
        assert!(RidgeRegression::fit(&[vec![1.0]], &[1.0, 2.0], 1.0).is_err());
        let model = RidgeRegression::fit(&[vec![1.0], vec![2.0]], &[1.0, 2.0], 0.1).unwrap();
        assert!(model.predict(&[1.0, 2.0]).is_err());
    }
}
