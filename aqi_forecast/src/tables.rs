//! Polars tables for forecasts and backtest results

use crate::backtest::{BacktestDetail, BacktestSummary, HorizonComparison};
use crate::error::Result;
use crate::forecast::ForecastRow;
use chrono::{DateTime, Utc};
use polars::prelude::*;
use std::fs::File;
use std::path::Path;

fn datetime_series(name: &str, values: impl Iterator<Item = DateTime<Utc>>) -> Result<Series> {
    let millis: Vec<i64> = values.map(|t| t.timestamp_millis()).collect();
    Ok(Series::new(name, millis).cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?)
}

fn horizon_series<'a>(values: impl Iterator<Item = &'a usize>) -> Series {
    Series::new("horizon_h", values.map(|&h| h as u32).collect::<Vec<u32>>())
}

/// Forecast table: timestamp, horizon_h, y_pred, p10, p50, p90, prediction_mode, category
pub fn forecast_frame(rows: &[ForecastRow]) -> Result<DataFrame> {
    let columns = vec![
        datetime_series("timestamp", rows.iter().map(|r| r.timestamp))?,
        horizon_series(rows.iter().map(|r| &r.horizon_h)),
        Series::new("y_pred", rows.iter().map(|r| r.y_pred).collect::<Vec<f64>>()),
        Series::new("p10", rows.iter().map(|r| r.p10).collect::<Vec<f64>>()),
        Series::new("p50", rows.iter().map(|r| r.p50).collect::<Vec<f64>>()),
        Series::new("p90", rows.iter().map(|r| r.p90).collect::<Vec<f64>>()),
        Series::new(
            "prediction_mode",
            rows.iter().map(|r| r.prediction_mode.as_str()).collect::<Vec<&str>>(),
        ),
        Series::new(
            "category",
            rows.iter().map(|r| r.category.label()).collect::<Vec<&str>>(),
        ),
    ];
    Ok(DataFrame::new(columns)?)
}

/// One row per (fold, horizon)
pub fn summary_frame(summary: &[BacktestSummary]) -> Result<DataFrame> {
    let f = |get: fn(&BacktestSummary) -> f64| summary.iter().map(get).collect::<Vec<f64>>();
    let opt = |get: fn(&BacktestSummary) -> Option<f64>| summary.iter().map(get).collect::<Vec<Option<f64>>>();
    let columns = vec![
        Series::new("fold", summary.iter().map(|s| s.fold as u32).collect::<Vec<u32>>()),
        horizon_series(summary.iter().map(|s| &s.horizon_h)),
        Series::new(
            "n_predictions",
            summary.iter().map(|s| s.n_predictions as u32).collect::<Vec<u32>>(),
        ),
        Series::new("mae_model", f(|s| s.mae_model)),
        Series::new("rmse_model", f(|s| s.rmse_model)),
        Series::new("mape_model", f(|s| s.mape_model)),
        Series::new("mae_naive", f(|s| s.mae_naive)),
        Series::new("rmse_naive", f(|s| s.rmse_naive)),
        Series::new("mape_naive", f(|s| s.mape_naive)),
        Series::new("mae_seasonal", f(|s| s.mae_seasonal)),
        Series::new("rmse_seasonal", f(|s| s.rmse_seasonal)),
        Series::new("mape_seasonal", f(|s| s.mape_seasonal)),
        Series::new("coverage_80", opt(|s| s.coverage_80)),
        Series::new("interval_width", opt(|s| s.mean_interval_width)),
        Series::new("pinball_loss_10", opt(|s| s.pinball_loss_10)),
        Series::new("pinball_loss_90", opt(|s| s.pinball_loss_90)),
    ];
    Ok(DataFrame::new(columns)?)
}

/// One row per scored test origin
pub fn detail_frame(detail: &[BacktestDetail]) -> Result<DataFrame> {
    let f = |get: fn(&BacktestDetail) -> f64| detail.iter().map(get).collect::<Vec<f64>>();
    let opt = |get: fn(&BacktestDetail) -> Option<f64>| detail.iter().map(get).collect::<Vec<Option<f64>>>();
    let columns = vec![
        Series::new("fold", detail.iter().map(|d| d.fold as u32).collect::<Vec<u32>>()),
        horizon_series(detail.iter().map(|d| &d.horizon_h)),
        datetime_series("origin", detail.iter().map(|d| d.origin))?,
        datetime_series("timestamp", detail.iter().map(|d| d.timestamp))?,
        Series::new("y_true", f(|d| d.y_true)),
        Series::new("y_pred_model", f(|d| d.y_pred_model)),
        Series::new("y_pred_naive", f(|d| d.y_pred_naive)),
        Series::new("y_pred_seasonal", f(|d| d.y_pred_seasonal)),
        Series::new("ae_model", f(|d| d.model.ae)),
        Series::new("se_model", f(|d| d.model.se)),
        Series::new("ape_model", f(|d| d.model.ape)),
        Series::new("ae_naive", f(|d| d.naive.ae)),
        Series::new("se_naive", f(|d| d.naive.se)),
        Series::new("ape_naive", f(|d| d.naive.ape)),
        Series::new("ae_seasonal", f(|d| d.seasonal.ae)),
        Series::new("se_seasonal", f(|d| d.seasonal.se)),
        Series::new("ape_seasonal", f(|d| d.seasonal.ape)),
        Series::new(
            "prediction_mode",
            detail.iter().map(|d| d.prediction_mode.as_str()).collect::<Vec<&str>>(),
        ),
        Series::new("p10_pred", opt(|d| d.interval.map(|i| i.p10_pred))),
        Series::new("p90_pred", opt(|d| d.interval.map(|i| i.p90_pred))),
        Series::new("coverage_80", opt(|d| d.interval.map(|i| i.coverage_80))),
        Series::new("interval_width", opt(|d| d.interval.map(|i| i.interval_width))),
        Series::new("pinball_loss_10", opt(|d| d.interval.map(|i| i.pinball_loss_10))),
        Series::new("pinball_loss_90", opt(|d| d.interval.map(|i| i.pinball_loss_90))),
    ];
    Ok(DataFrame::new(columns)?)
}

/// Per-horizon model-versus-baseline table
pub fn comparison_frame(comparison: &[HorizonComparison]) -> Result<DataFrame> {
    let columns = vec![
        horizon_series(comparison.iter().map(|c| &c.horizon_h)),
        Series::new("n_folds", comparison.iter().map(|c| c.n_folds as u32).collect::<Vec<u32>>()),
        Series::new("mae_model", comparison.iter().map(|c| c.mae_model).collect::<Vec<f64>>()),
        Series::new("mae_naive", comparison.iter().map(|c| c.mae_naive).collect::<Vec<f64>>()),
        Series::new(
            "mae_seasonal",
            comparison.iter().map(|c| c.mae_seasonal).collect::<Vec<f64>>(),
        ),
        Series::new("adds_value", comparison.iter().map(|c| c.adds_value).collect::<Vec<bool>>()),
    ];
    Ok(DataFrame::new(columns)?)
}

/// Write a table as CSV with a header row
pub fn write_csv<P: AsRef<Path>>(df: &mut DataFrame, path: P) -> Result<()> {
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file).has_header(true).finish(df)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::AqiCategory;
    use crate::forecast::PredictionMode;
    use chrono::TimeZone;

    fn rows() -> Vec<ForecastRow> {
        let t = Utc.with_ymd_and_hms(2024, 8, 1, 0, 0, 0).unwrap();
        [24usize, 48]
            .iter()
            .map(|&h| ForecastRow {
                timestamp: t + chrono::Duration::hours(h as i64),
                horizon_h: h,
                y_pred: 55.0,
                p10: 40.0,
                p50: 55.0,
                p90: 70.0,
                prediction_mode: PredictionMode::Model,
                category: AqiCategory::from_aqi(55.0),
            })
            .collect()
    }

    #[test]
    fn test_forecast_frame_shape() {
        let df = forecast_frame(&rows()).unwrap();
        assert_eq!(df.shape(), (2, 8));
        assert_eq!(
            df.column("timestamp").unwrap().dtype(),
            &DataType::Datetime(TimeUnit::Milliseconds, None)
        );
        assert_eq!(df.column("horizon_h").unwrap().u32().unwrap().get(1), Some(48));
    }

    #[test]
    fn test_empty_tables() {
        assert_eq!(summary_frame(&[]).unwrap().height(), 0);
        assert_eq!(detail_frame(&[]).unwrap().height(), 0);
    }

    #[test]
    fn test_write_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forecast.csv");
        let mut df = forecast_frame(&rows()).unwrap();
        write_csv(&mut df, &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("timestamp,horizon_h,y_pred"));
        assert_eq!(text.lines().count(), 3);
    }
}
