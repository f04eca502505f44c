//! Metrics for evaluating forecast performance

use crate::error::{ForecastError, Result};
use crate::forecast::ForecastRow;
use std::fmt;

/// Percentage errors divide by `max(|actual|, PERCENT_FLOOR)`
pub const PERCENT_FLOOR: f64 = 1.0;

fn check_lengths(forecast: &[f64], actual: &[f64]) -> Result<()> {
    if forecast.len() != actual.len() || forecast.is_empty() {
        return Err(ForecastError::InvalidParameter(
            "Forecast and actual values must have the same non-zero length".to_string(),
        ));
    }
    Ok(())
}

/// Mean absolute error
pub fn mean_absolute_error(forecast: &[f64], actual: &[f64]) -> Result<f64> {
    check_lengths(forecast, actual)?;
    Ok(forecast
        .iter()
        .zip(actual)
        .map(|(f, a)| (a - f).abs())
        .sum::<f64>()
        / forecast.len() as f64)
}

/// Evaluate point forecast accuracy against actual values
pub fn evaluate_forecast(forecast: &[f64], actual: &[f64]) -> Result<ForecastMetrics> {
    check_lengths(forecast, actual)?;
    let n = forecast.len() as f64;

    let errors: Vec<f64> = forecast.iter().zip(actual).map(|(f, a)| a - f).collect();
    let mae = errors.iter().map(|e| e.abs()).sum::<f64>() / n;
    let mse = errors.iter().map(|e| e.powi(2)).sum::<f64>() / n;
    let bias = errors.iter().sum::<f64>() / n;

    let mape = actual
        .iter()
        .zip(&errors)
        .map(|(a, e)| e.abs() / a.abs().max(PERCENT_FLOOR) * 100.0)
        .sum::<f64>()
        / n;

    let smape = actual
        .iter()
        .zip(forecast)
        .map(|(a, f)| {
            let denom = a.abs() + f.abs();
            if denom == 0.0 {
                0.0
            } else {
                200.0 * (a - f).abs() / denom
            }
        })
        .sum::<f64>()
        / n;

    Ok(ForecastMetrics {
        mae,
        mse,
        rmse: mse.sqrt(),
        mape,
        smape,
        bias,
    })
}

/// Share of actual values inside the forecast's [p10, p90] intervals
pub fn interval_coverage(forecasts: &[ForecastRow], actual: &[f64]) -> Result<f64> {
    if forecasts.len() != actual.len() || forecasts.is_empty() {
        return Err(ForecastError::InvalidParameter(
            "Forecast rows and actual values must have the same non-zero length".to_string(),
        ));
    }
    let covered = forecasts
        .iter()
        .zip(actual)
        .filter(|(row, &a)| row.p10 <= a && a <= row.p90)
        .count();
    Ok(covered as f64 / forecasts.len() as f64)
}

/// Forecast performance metrics
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastMetrics {
    /// Mean Absolute Error
    pub mae: f64,
    /// Mean Squared Error
    pub mse: f64,
    /// Root Mean Squared Error
    pub rmse: f64,
    /// Mean Absolute Percentage Error
    pub mape: f64,
    /// Symmetric Mean Absolute Percentage Error
    pub smape: f64,
    /// Mean of actual minus forecast
    pub bias: f64,
}

impl fmt::Display for ForecastMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Forecast Performance Metrics:")?;
        writeln!(f, "  MAE:     {:.4}", self.mae)?;
        writeln!(f, "  MSE:     {:.4}", self.mse)?;
        writeln!(f, "  RMSE:    {:.4}", self.rmse)?;
        writeln!(f, "  MAPE:    {:.4}%", self.mape)?;
        writeln!(f, "  SMAPE:   {:.4}%", self.smape)?;
        writeln!(f, "  Bias:    {:.4}", self.bias)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_evaluate_forecast() {
        let metrics = evaluate_forecast(&[10.0, 20.0, 30.0], &[12.0, 18.0, 30.0]).unwrap();
        assert_relative_eq!(metrics.mae, 4.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(metrics.mse, 8.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(metrics.bias, 0.0, epsilon = 1e-12);
        assert!(metrics.to_string().contains("RMSE"));
    }

    #[test]
    fn test_percentage_floor() {
        let metrics = evaluate_forecast(&[0.5], &[0.0]).unwrap();
        assert_relative_eq!(metrics.mape, 50.0, epsilon = 1e-12);
    }

    #[test]
    fn test_length_mismatch() {
        assert!(evaluate_forecast(&[1.0], &[]).is_err());
        assert!(mean_absolute_error(&[], &[]).is_err());
    }
}
