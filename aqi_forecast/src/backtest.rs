//! Rolling-origin, expanding-window backtests against naive baselines
//!
//! Fold `i` trains on the first `min_train + i * step` hours. Its test
//! origins start `max(horizons)` hours after the end of training and span
//! `step` hours. Every prediction is made from the data up to and including
//! the origin and scored against the value `horizon` hours later.

use crate::bundle::ModelBundle;
use crate::config::{BacktestConfig, ForecastConfig};
use crate::data::{CityMeta, CleanSeries};
use crate::error::Result;
use crate::forecast::{ForecastEngine, PredictionMode};
use crate::orchestrator::MultiHorizonOrchestrator;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Fold sizing actually used for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BacktestSizing {
    pub n_folds: usize,
    pub min_train_hours: usize,
    pub step_hours: usize,
    /// Whether the requested sizing had to be shrunk to fit the data
    pub adjusted: bool,
}

/// Index ranges of one fold; ranges are half-open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoldPlan {
    /// 1-based fold number
    pub fold: usize,
    pub train_end: usize,
    pub test_start: usize,
    pub test_end: usize,
}

/// Interval scores for one prediction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntervalScore {
    pub p10_pred: f64,
    pub p90_pred: f64,
    /// 1.0 when the truth lies within [p10, p90]
    pub coverage_80: f64,
    pub interval_width: f64,
    pub pinball_loss_10: f64,
    pub pinball_loss_90: f64,
}

impl IntervalScore {
    fn new(y_true: f64, p10: f64, p90: f64) -> Self {
        Self {
            p10_pred: p10,
            p90_pred: p90,
            coverage_80: if p10 <= y_true && y_true <= p90 { 1.0 } else { 0.0 },
            interval_width: p90 - p10,
            pinball_loss_10: pinball(y_true, p10, 0.1),
            pinball_loss_90: pinball(y_true, p90, 0.9),
        }
    }
}

/// Pinball loss of `pred` at quantile level `q`
pub fn pinball(y_true: f64, pred: f64, q: f64) -> f64 {
    (q * (y_true - pred)).max((1.0 - q) * (pred - y_true))
}

/// Absolute, squared and percentage error of one prediction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointErrors {
    pub ae: f64,
    pub se: f64,
    /// Percentage error against `max(|y|, 1)`
    pub ape: f64,
}

impl PointErrors {
    pub fn new(y_true: f64, pred: f64) -> Self {
        let e = y_true - pred;
        Self {
            ae: e.abs(),
            se: e * e,
            ape: e.abs() / y_true.abs().max(1.0) * 100.0,
        }
    }
}

/// One scored test origin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestDetail {
    pub fold: usize,
    pub horizon_h: usize,
    pub origin: DateTime<Utc>,
    /// Time of the predicted value
    pub timestamp: DateTime<Utc>,
    pub y_true: f64,
    pub y_pred_model: f64,
    pub y_pred_naive: f64,
    pub y_pred_seasonal: f64,
    pub model: PointErrors,
    pub naive: PointErrors,
    pub seasonal: PointErrors,
    pub prediction_mode: PredictionMode,
    pub interval: Option<IntervalScore>,
}

/// Mean metrics for one (fold, horizon)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestSummary {
    pub fold: usize,
    pub horizon_h: usize,
    pub n_predictions: usize,
    pub mae_model: f64,
    pub rmse_model: f64,
    pub mape_model: f64,
    pub mae_naive: f64,
    pub rmse_naive: f64,
    pub mape_naive: f64,
    pub mae_seasonal: f64,
    pub rmse_seasonal: f64,
    pub mape_seasonal: f64,
    pub coverage_80: Option<f64>,
    pub mean_interval_width: Option<f64>,
    pub pinball_loss_10: Option<f64>,
    pub pinball_loss_90: Option<f64>,
}

/// Per-horizon model-versus-baseline verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HorizonComparison {
    pub horizon_h: usize,
    pub n_folds: usize,
    pub mae_model: f64,
    pub mae_naive: f64,
    pub mae_seasonal: f64,
    /// The model beats both baselines on mean MAE
    pub adds_value: bool,
}

/// Backtest output; empty tables mean the backtest was not feasible
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BacktestReport {
    pub sizing: Option<BacktestSizing>,
    pub plan: Vec<FoldPlan>,
    pub summary: Vec<BacktestSummary>,
    pub detail: Vec<BacktestDetail>,
}

impl BacktestReport {
    pub fn is_empty(&self) -> bool {
        self.summary.is_empty() && self.detail.is_empty()
    }

    /// Mean fold metrics per horizon and whether the model adds value
    pub fn comparison(&self) -> Vec<HorizonComparison> {
        let mut by_horizon: BTreeMap<usize, Vec<&BacktestSummary>> = BTreeMap::new();
        for row in &self.summary {
            by_horizon.entry(row.horizon_h).or_default().push(row);
        }
        by_horizon
            .into_iter()
            .map(|(horizon_h, rows)| {
                let mean = |f: fn(&BacktestSummary) -> f64| {
                    rows.iter().map(|r| f(r)).sum::<f64>() / rows.len() as f64
                };
                let mae_model = mean(|r| r.mae_model);
                let mae_naive = mean(|r| r.mae_naive);
                let mae_seasonal = mean(|r| r.mae_seasonal);
                HorizonComparison {
                    horizon_h,
                    n_folds: rows.len(),
                    mae_model,
                    mae_naive,
                    mae_seasonal,
                    adds_value: mae_model < mae_naive && mae_model < mae_seasonal,
                }
            })
            .collect()
    }

    /// Mean 80% coverage per horizon, for horizons with interval scores
    pub fn coverage_by_horizon(&self) -> BTreeMap<usize, f64> {
        let mut acc: BTreeMap<usize, (f64, usize)> = BTreeMap::new();
        for row in &self.summary {
            if let Some(c) = row.coverage_80 {
                let entry = acc.entry(row.horizon_h).or_insert((0.0, 0));
                entry.0 += c;
                entry.1 += 1;
            }
        }
        acc.into_iter()
            .map(|(h, (sum, n))| (h, sum / n as f64))
            .collect()
    }
}

/// Work out fold sizing for `total` hours of data.
///
/// Series below `min_total_hours` are never backtested. When the requested
/// sizing needs more data than exists, the training minimum shrinks to a third
/// of the data, the step to at most 6 hours, and the fold count to what fits
/// (at least 2). `None` means not feasible.
pub fn plan_sizing(
    total: usize,
    max_horizon: usize,
    n_folds: usize,
    min_train_hours: usize,
    step_hours: usize,
    min_total_hours: usize,
) -> Option<BacktestSizing> {
    if total < min_total_hours || n_folds == 0 || step_hours == 0 {
        return None;
    }
    let required = min_train_hours + max_horizon + (n_folds - 1) * step_hours;
    if total >= required {
        return Some(BacktestSizing {
            n_folds,
            min_train_hours,
            step_hours,
            adjusted: false,
        });
    }

    let new_min_train = min_train_hours.min(total / 3);
    let new_step = step_hours.min(6);
    let room = total as i64 - new_min_train as i64 - max_horizon as i64;
    let fitted = (room / new_step as i64).max(2) as usize;
    let new_n_folds = n_folds.min(fitted);
    if new_n_folds < 2 {
        return None;
    }
    Some(BacktestSizing {
        n_folds: new_n_folds,
        min_train_hours: new_min_train,
        step_hours: new_step,
        adjusted: true,
    })
}

/// Fold index ranges for a sizing
pub fn plan_folds(total: usize, max_horizon: usize, sizing: &BacktestSizing) -> Vec<FoldPlan> {
    (0..sizing.n_folds)
        .map(|i| {
            let train_end = sizing.min_train_hours + i * sizing.step_hours;
            let test_start = train_end + max_horizon;
            FoldPlan {
                fold: i + 1,
                train_end,
                test_start,
                test_end: (test_start + sizing.step_hours).min(total),
            }
        })
        .collect()
}

/// Runs rolling-origin backtests
#[derive(Debug)]
pub struct BacktestEngine {
    orchestrator: MultiHorizonOrchestrator,
    engine: ForecastEngine,
    config: BacktestConfig,
    seasonal_lag: usize,
}

impl BacktestEngine {
    pub fn new(config: &ForecastConfig) -> Self {
        Self {
            orchestrator: MultiHorizonOrchestrator::new(config),
            engine: ForecastEngine::new(config),
            config: config.backtest.clone(),
            seasonal_lag: config.engine.seasonal_lag_hours,
        }
    }

    /// Backtest with the configured fold count, training minimum and step
    pub fn run(
        &self,
        series: &CleanSeries,
        horizons: &[usize],
        city_meta: Option<&CityMeta>,
    ) -> Result<BacktestReport> {
        self.backtest(
            series,
            horizons,
            self.config.n_folds,
            self.config.min_train_days,
            self.config.step_hours,
            city_meta,
        )
    }

    pub fn backtest(
        &self,
        series: &CleanSeries,
        horizons: &[usize],
        n_folds: usize,
        min_train_days: usize,
        step_hours: usize,
        city_meta: Option<&CityMeta>,
    ) -> Result<BacktestReport> {
        let Some(&max_h) = horizons.iter().max() else {
            return Ok(BacktestReport::default());
        };
        let total = series.len();

        let Some(sizing) = plan_sizing(
            total,
            max_h,
            n_folds,
            min_train_days * 24,
            step_hours,
            self.config.min_total_hours,
        ) else {
            warn!(
                "Backtest not feasible: {} hours of data for {} folds, {} training days, max horizon {}h",
                total, n_folds, min_train_days, max_h
            );
            return Ok(BacktestReport::default());
        };
        if sizing.adjusted {
            warn!(
                "Adjusted backtest to fit {} hours: training {}h, step {}h, {} folds",
                total, sizing.min_train_hours, sizing.step_hours, sizing.n_folds
            );
        }
        info!(
            "Running rolling backtest: {} folds, {}h training, {}h steps, horizons {:?}",
            sizing.n_folds, sizing.min_train_hours, sizing.step_hours, horizons
        );

        let plan = plan_folds(total, max_h, &sizing);
        let mut detail = Vec::new();
        for fold in &plan {
            if fold.train_end > total || fold.train_end < sizing.min_train_hours || fold.test_start >= fold.test_end {
                debug!("Skipping fold {}: insufficient data", fold.fold);
                continue;
            }
            let train = series.slice(0, Some(fold.train_end))?;
            for &horizon in horizons {
                match self.run_fold_horizon(series, &train, fold, horizon, city_meta) {
                    Ok(rows) => {
                        debug!("Fold {} horizon {}h: {} predictions", fold.fold, horizon, rows.len());
                        detail.extend(rows);
                    }
                    Err(e) => warn!("Fold {} horizon {}h failed: {}", fold.fold, horizon, e),
                }
            }
        }

        if detail.is_empty() {
            warn!("No backtest results generated");
            return Ok(BacktestReport {
                sizing: Some(sizing),
                plan,
                ..Default::default()
            });
        }

        let summary = summarize(&detail);
        let report = BacktestReport {
            sizing: Some(sizing),
            plan,
            summary,
            detail,
        };
        for cmp in report.comparison() {
            info!(
                "Horizon {}h over {} folds: MAE model {:.2}, naive {:.2}, seasonal {:.2}",
                cmp.horizon_h, cmp.n_folds, cmp.mae_model, cmp.mae_naive, cmp.mae_seasonal
            );
        }
        for (horizon, coverage) in report.coverage_by_horizon() {
            if coverage < self.config.coverage_warning {
                warn!(
                    "Coverage {:.1}% for horizon {}h is below {:.0}%, consider widening intervals",
                    coverage * 100.0,
                    horizon,
                    self.config.coverage_warning * 100.0
                );
            }
        }
        Ok(report)
    }

    fn run_fold_horizon(
        &self,
        series: &CleanSeries,
        train: &CleanSeries,
        fold: &FoldPlan,
        horizon: usize,
        city_meta: Option<&CityMeta>,
    ) -> Result<Vec<BacktestDetail>> {
        let set = self
            .orchestrator
            .builder()
            .build(train, horizon, city_meta, None, true)?;
        if set.x.n_rows() < self.config.min_fold_rows {
            debug!(
                "Skipping horizon {}h in fold {}: {} feature rows",
                horizon,
                fold.fold,
                set.x.n_rows()
            );
            return Ok(Vec::new());
        }

        let fit = self.orchestrator.fit_fold(set, horizon)?;
        let is_quantile = fit.models.is_quantile();
        let mut models = BTreeMap::new();
        models.insert(horizon, fit.models);
        let mut residuals = BTreeMap::new();
        if let Some(r) = fit.residuals {
            residuals.insert(horizon, r);
        }
        let bundle = ModelBundle::new(
            models,
            Utc::now(),
            fit.feature_names,
            self.orchestrator.interval_method(),
            residuals,
        );

        let mut rows = Vec::new();
        for origin in fold.test_start..fold.test_end {
            let target = origin + horizon;
            if target >= series.len() {
                break;
            }
            let Some(y_true) = series.points[target].aqi else {
                continue;
            };

            let context = series.slice(0, Some(origin + 1))?;
            let Some(naive) = context.last_observed_aqi() else {
                continue;
            };
            let seasonal = if self.seasonal_lag > 0 && context.len() >= self.seasonal_lag {
                context.points[context.len() - self.seasonal_lag].aqi.unwrap_or(naive)
            } else {
                naive
            };

            let forecast = self
                .engine
                .forecast_with(&context, &bundle, &[horizon], city_meta, None)?;
            let Some(row) = forecast.into_iter().next() else {
                continue;
            };

            rows.push(BacktestDetail {
                fold: fold.fold,
                horizon_h: horizon,
                origin: context.points[origin].timestamp,
                timestamp: series.points[target].timestamp,
                y_true,
                y_pred_model: row.p50,
                y_pred_naive: naive,
                y_pred_seasonal: seasonal,
                model: PointErrors::new(y_true, row.p50),
                naive: PointErrors::new(y_true, naive),
                seasonal: PointErrors::new(y_true, seasonal),
                prediction_mode: row.prediction_mode,
                interval: (is_quantile && row.prediction_mode == PredictionMode::Model)
                    .then(|| IntervalScore::new(y_true, row.p10, row.p90)),
            });
        }
        Ok(rows)
    }
}

/// Aggregate detail rows per (fold, horizon)
pub fn summarize(detail: &[BacktestDetail]) -> Vec<BacktestSummary> {
    let mut groups: BTreeMap<(usize, usize), Vec<&BacktestDetail>> = BTreeMap::new();
    for row in detail {
        groups.entry((row.fold, row.horizon_h)).or_default().push(row);
    }

    groups
        .into_iter()
        .map(|((fold, horizon_h), rows)| {
            let n = rows.len() as f64;
            let mean = |f: fn(&BacktestDetail) -> f64| rows.iter().map(|r| f(r)).sum::<f64>() / n;
            let scores: Vec<&IntervalScore> = rows.iter().filter_map(|r| r.interval.as_ref()).collect();
            let interval_mean = |f: fn(&IntervalScore) -> f64| {
                (!scores.is_empty())
                    .then(|| scores.iter().map(|s| f(s)).sum::<f64>() / scores.len() as f64)
            };
            BacktestSummary {
                fold,
                horizon_h,
                n_predictions: rows.len(),
                mae_model: mean(|r| r.model.ae),
                rmse_model: mean(|r| r.model.se).sqrt(),
                mape_model: mean(|r| r.model.ape),
                mae_naive: mean(|r| r.naive.ae),
                rmse_naive: mean(|r| r.naive.se).sqrt(),
                mape_naive: mean(|r| r.naive.ape),
                mae_seasonal: mean(|r| r.seasonal.ae),
                rmse_seasonal: mean(|r| r.seasonal.se).sqrt(),
                mape_seasonal: mean(|r| r.seasonal.ape),
                coverage_80: interval_mean(|s| s.coverage_80),
                mean_interval_width: interval_mean(|s| s.interval_width),
                pinball_loss_10: interval_mean(|s| s.pinball_loss_10),
                pinball_loss_90: interval_mean(|s| s.pinball_loss_90),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn test_sizing_fits_without_adjustment() {
        let sizing = plan_sizing(720, 24, 3, 168, 24, 200).unwrap();
        assert_eq!(
            sizing,
            BacktestSizing {
                n_folds: 3,
                min_train_hours: 168,
                step_hours: 24,
                adjusted: false
            }
        );
        let plan = plan_folds(720, 24, &sizing);
        assert_eq!(plan[0], FoldPlan { fold: 1, train_end: 168, test_start: 192, test_end: 216 });
        assert_eq!(plan[2].train_end, 216);
    }

    #[test]
    fn test_sizing_adjusts_to_short_series() {
        // 90 days of training cannot fit in 400 hours
        let sizing = plan_sizing(400, 168, 5, 90 * 24, 24, 200).unwrap();
        assert!(sizing.adjusted);
        assert_eq!(sizing.min_train_hours, 133);
        assert_eq!(sizing.step_hours, 6);
        // (400 - 133 - 168) / 6 = 16 -> capped at 5
        assert_eq!(sizing.n_folds, 5);
    }

    #[rstest]
    #[case(150)]
    #[case(199)]
    fn test_sizing_below_floor_is_infeasible(#[case] total: usize) {
        assert_eq!(plan_sizing(total, 24, 3, 24, 24, 200), None);
    }

    #[test]
    fn test_sizing_keeps_two_folds_when_room_is_negative() {
        let sizing = plan_sizing(210, 168, 5, 2160, 24, 200).unwrap();
        assert_eq!(sizing.n_folds, 2);
        assert_eq!(sizing.min_train_hours, 70);
    }

    #[test]
    fn test_point_errors_and_pinball() {
        let e = PointErrors::new(0.5, 2.5);
        assert_eq!(e.ae, 2.0);
        assert_eq!(e.se, 4.0);
        // denominator floored at 1
        assert_eq!(e.ape, 200.0);
        assert!((pinball(10.0, 8.0, 0.1) - 0.2).abs() < 1e-12);
        assert!((pinball(10.0, 12.0, 0.1) - 1.8).abs() < 1e-12);
        assert!((pinball(10.0, 8.0, 0.9) - 1.8).abs() < 1e-12);
    }

    #[test]
    fn test_comparison_requires_beating_both_baselines() {
        let summary = |fold, mae_model, mae_naive, mae_seasonal| BacktestSummary {
            fold,
            horizon_h: 24,
            n_predictions: 10,
            mae_model,
            rmse_model: 0.0,
            mape_model: 0.0,
            mae_naive,
            rmse_naive: 0.0,
            mape_naive: 0.0,
            mae_seasonal,
            rmse_seasonal: 0.0,
            mape_seasonal: 0.0,
            coverage_80: Some(0.5 + fold as f64 * 0.1),
            mean_interval_width: None,
            pinball_loss_10: None,
            pinball_loss_90: None,
        };
        let report = BacktestReport {
            summary: vec![summary(1, 5.0, 6.0, 7.0), summary(2, 7.0, 6.0, 8.0)],
            ..Default::default()
        };
        let cmp = report.comparison();
        assert_eq!(cmp.len(), 1);
        assert_eq!(cmp[0].mae_model, 6.0);
        assert!(!cmp[0].adds_value);
        let coverage = report.coverage_by_horizon();
        assert!((coverage[&24] - 0.65).abs() < 1e-12);
    }
}
