//! Leakage-safe feature engineering
//!
//! Every feature at row `t` is computed from data at or before `t`:
//! lags look back whole days, rolling statistics run over the series shifted
//! by one hour, and external weather is joined one hour late. The target at
//! row `t` is the AQI `horizon` hours ahead.

use crate::config::FeatureConfig;
use crate::data::{CityMeta, CleanSeries, Parameter, WeatherSeries};
use crate::error::{ForecastError, Result};
use aqi_math::rolling::shifted_null_fraction;
use aqi_math::{shifted_rolling, winsorize_options, RollingStat};
use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::f64::consts::PI;
use tracing::{debug, warn};

/// Whether the strict row filter could be applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildMode {
    /// Rows were required to have the informative lags
    Full,
    /// Only the target was required; lag features may be missing
    Degraded,
}

/// Column-oriented feature table before row selection and post-processing
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureFrame {
    pub timestamps: Vec<DateTime<Utc>>,
    pub names: Vec<String>,
    pub columns: Vec<Vec<Option<f64>>>,
    /// AQI `horizon` hours ahead; `None` outside training
    pub target: Option<Vec<Option<f64>>>,
}

impl FeatureFrame {
    pub fn n_rows(&self) -> usize {
        self.timestamps.len()
    }

    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.columns[i].as_slice())
    }

    /// All feature values of one row, in column order
    pub fn row(&self, index: usize) -> Vec<Option<f64>> {
        self.columns.iter().map(|c| c[index]).collect()
    }

    fn push(&mut self, name: String, values: Vec<Option<f64>>) {
        self.names.push(name);
        self.columns.push(values);
    }
}

/// Dense row-major feature matrix; missing values are `NaN`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureMatrix {
    names: Vec<String>,
    rows: Vec<Vec<f64>>,
}

impl FeatureMatrix {
    pub fn new(names: Vec<String>, rows: Vec<Vec<f64>>) -> Result<Self> {
        if let Some(bad) = rows.iter().position(|r| r.len() != names.len()) {
            return Err(ForecastError::DataError(format!(
                "Row {} has {} values for {} feature names",
                bad,
                rows[bad].len(),
                names.len()
            )));
        }
        Ok(Self { names, rows })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_cols(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, index: usize) -> Option<&[f64]> {
        self.rows.get(index).map(|r| r.as_slice())
    }

    pub fn column(&self, index: usize) -> Vec<f64> {
        self.rows.iter().map(|r| r[index]).collect()
    }

    /// Rows `start..end`
    pub fn slice_rows(&self, start: usize, end: usize) -> Self {
        let end = end.min(self.rows.len());
        let start = start.min(end);
        Self {
            names: self.names.clone(),
            rows: self.rows[start..end].to_vec(),
        }
    }

    /// Rows at the given indices, in order
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        Self {
            names: self.names.clone(),
            rows: indices.iter().map(|&i| self.rows[i].clone()).collect(),
        }
    }

    /// Reorder columns to `names`; absent columns are filled with zero
    pub fn align(&self, names: &[String]) -> Self {
        let index: HashMap<&str, usize> = self
            .names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), i))
            .collect();
        let lookup: Vec<Option<usize>> = names.iter().map(|n| index.get(n.as_str()).copied()).collect();
        let rows = self
            .rows
            .iter()
            .map(|row| {
                lookup
                    .iter()
                    .map(|slot| slot.map_or(0.0, |i| row[i]))
                    .collect()
            })
            .collect();
        Self {
            names: names.to_vec(),
            rows,
        }
    }
}

/// Per-row bookkeeping carried next to the matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowMeta {
    pub timestamp: DateTime<Utc>,
    pub city_key: String,
    pub parameter: Parameter,
}

/// Timestamps, city keys and metadata of the emitted rows
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AuxIndex {
    pub timestamps: Vec<DateTime<Utc>>,
    pub city_keys: Vec<String>,
    pub metadata: Vec<RowMeta>,
}

/// Output of [`FeatureBuilder::build`]
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSet {
    pub x: FeatureMatrix,
    /// Target values, present only in training mode
    pub y: Option<Vec<f64>>,
    pub aux: AuxIndex,
    pub mode: BuildMode,
}

/// Builds feature matrices from clean series
#[derive(Debug, Clone)]
pub struct FeatureBuilder {
    config: FeatureConfig,
}

impl FeatureBuilder {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Compute every feature column for every row of the series.
    ///
    /// No rows are dropped and no dataset-wide transform is applied, so
    /// row `t` depends only on the series up to `t` (and weather up to `t - 1h`).
    pub fn raw_frame(
        &self,
        series: &CleanSeries,
        horizon: usize,
        city_meta: Option<&CityMeta>,
        weather: Option<&WeatherSeries>,
        training: bool,
    ) -> Result<FeatureFrame> {
        let cfg = &self.config;
        let aqi = series.aqi_values();
        let timestamps = series.timestamps();
        let n = aqi.len();

        let mut frame = FeatureFrame {
            timestamps: timestamps.clone(),
            names: Vec::new(),
            columns: Vec::new(),
            target: training.then(|| lead(&aqi, horizon)),
        };

        let lags = cfg.active_lags();
        for &lag in &lags {
            frame.push(format!("aqi_lag_{}", lag), shift(&aqi, lag));
        }

        for window in cfg.active_windows() {
            let min_periods = (window / 6).max(6);
            for stat in RollingStat::ALL {
                frame.push(
                    format!("aqi_roll_{}_{}", stat.name(), window),
                    shifted_rolling(&aqi, window, min_periods, stat)?,
                );
            }
        }

        self.push_calendar(&mut frame, &timestamps);

        if cfg.use_exog {
            let temp = series.temp_values();
            let humidity = series.humidity_values();
            for (var, values) in [("temp_c", &temp), ("humidity", &humidity)] {
                for &lag in &lags {
                    frame.push(format!("{}_lag_{}", var, lag), shift(values, lag));
                }
            }
            if let Some(weather) = weather {
                push_weather(&mut frame, &timestamps, weather);
            }
        }

        if cfg.use_quality_flags {
            frame.push(
                "is_gap".to_string(),
                aqi.iter()
                    .map(|v| Some(if v.is_none() { 1.0 } else { 0.0 }))
                    .collect(),
            );
            frame.push("gap_len".to_string(), gap_lengths(&aqi));
            let score = shifted_null_fraction(&aqi, cfg.quality_window)?
                .into_iter()
                .map(|f| f.map(|f| 1.0 - f))
                .collect();
            frame.push("data_quality_score".to_string(), score);
        }

        if let Some(meta) = city_meta {
            frame.push("city_lat".to_string(), vec![Some(meta.latitude); n]);
            frame.push("city_lon".to_string(), vec![Some(meta.longitude); n]);
        }

        Ok(frame)
    }

    fn push_calendar(&self, frame: &mut FeatureFrame, timestamps: &[DateTime<Utc>]) {
        let hours: Vec<f64> = timestamps.iter().map(|t| t.hour() as f64).collect();
        let dows: Vec<f64> = timestamps
            .iter()
            .map(|t| t.weekday().num_days_from_monday() as f64)
            .collect();

        if self.config.use_cyclical {
            let cyc = |values: &[f64], period: f64, f: fn(f64) -> f64| -> Vec<Option<f64>> {
                values.iter().map(|&v| Some(f(2.0 * PI * v / period))).collect()
            };
            frame.push("hour_sin".to_string(), cyc(&hours, 24.0, f64::sin));
            frame.push("hour_cos".to_string(), cyc(&hours, 24.0, f64::cos));
            frame.push("dow_sin".to_string(), cyc(&dows, 7.0, f64::sin));
            frame.push("dow_cos".to_string(), cyc(&dows, 7.0, f64::cos));
        }

        frame.push(
            "month".to_string(),
            timestamps.iter().map(|t| Some(t.month() as f64)).collect(),
        );
        frame.push(
            "is_weekend".to_string(),
            dows.iter().map(|&d| Some(if d >= 5.0 { 1.0 } else { 0.0 })).collect(),
        );
        frame.push(
            "is_rush_hour".to_string(),
            timestamps
                .iter()
                .map(|t| {
                    let rush = self.config.rush_hours.contains(&t.hour());
                    Some(if rush { 1.0 } else { 0.0 })
                })
                .collect(),
        );
    }

    /// Build the model-ready matrix.
    ///
    /// In training mode rows without a target are dropped, as are rows missing
    /// an informative lag that has data somewhere in the series; when that
    /// leaves nothing only the target is required and the mode is `Degraded`.
    /// In inference mode every row is kept and the last row is the latest
    /// timestamp of the context.
    pub fn build(
        &self,
        series: &CleanSeries,
        horizon: usize,
        city_meta: Option<&CityMeta>,
        weather: Option<&WeatherSeries>,
        training: bool,
    ) -> Result<FeatureSet> {
        let frame = self.raw_frame(series, horizon, city_meta, weather, training)?;
        let n = frame.n_rows();

        let (keep, mode) = match &frame.target {
            Some(target) => self.select_training_rows(&frame, target, horizon)?,
            None => ((0..n).collect(), BuildMode::Full),
        };

        let mut names = Vec::with_capacity(frame.names.len());
        let mut columns = Vec::with_capacity(frame.columns.len());
        for (name, column) in frame.names.iter().zip(&frame.columns) {
            let mut values: Vec<Option<f64>> = keep.iter().map(|&i| column[i]).collect();
            if self.is_winsorized_column(name) {
                values = winsorize_options(
                    &values,
                    self.config.winsorize_low,
                    self.config.winsorize_high,
                )?;
            }
            // inference contexts are aligned to the training columns instead
            if training && is_constant(&values) {
                debug!("Dropping constant feature column {}", name);
                continue;
            }
            names.push(name.clone());
            columns.push(values);
        }

        let y = match &frame.target {
            Some(target) => {
                let mut y: Vec<Option<f64>> = keep.iter().map(|&i| target[i]).collect();
                if y.iter().flatten().count() > self.config.min_target_rows_for_winsorize {
                    y = winsorize_options(
                        &y,
                        self.config.winsorize_low,
                        self.config.winsorize_high,
                    )?;
                }
                Some(y.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
            }
            None => None,
        };

        let rows = (0..keep.len())
            .map(|r| columns.iter().map(|c| c[r].unwrap_or(f64::NAN)).collect())
            .collect();

        let timestamps: Vec<DateTime<Utc>> = keep.iter().map(|&i| frame.timestamps[i]).collect();
        let metadata = timestamps
            .iter()
            .map(|&timestamp| RowMeta {
                timestamp,
                city_key: series.city_key.clone(),
                parameter: series.parameter,
            })
            .collect();
        let aux = AuxIndex {
            city_keys: vec![series.city_key.clone(); timestamps.len()],
            timestamps,
            metadata,
        };

        Ok(FeatureSet {
            x: FeatureMatrix::new(names, rows)?,
            y,
            aux,
            mode,
        })
    }

    fn select_training_rows(
        &self,
        frame: &FeatureFrame,
        target: &[Option<f64>],
        horizon: usize,
    ) -> Result<(Vec<usize>, BuildMode)> {
        let required: Vec<&[Option<f64>]> = self
            .config
            .required_lags
            .iter()
            .filter_map(|lag| frame.column(&format!("aqi_lag_{}", lag)))
            .filter(|col| col.iter().any(|v| v.is_some()))
            .collect();

        let with_target: Vec<usize> = (0..frame.n_rows()).filter(|&i| target[i].is_some()).collect();
        let strict: Vec<usize> = with_target
            .iter()
            .copied()
            .filter(|&i| required.iter().all(|col| col[i].is_some()))
            .collect();

        if !strict.is_empty() {
            return Ok((strict, BuildMode::Full));
        }
        if with_target.is_empty() {
            return Err(ForecastError::NoValidData { horizon });
        }
        warn!(
            "Using reduced feature set for horizon {}h: {} rows lack the informative lags",
            horizon,
            with_target.len()
        );
        Ok((with_target, BuildMode::Degraded))
    }

    fn is_winsorized_column(&self, name: &str) -> bool {
        name.starts_with("aqi_") || name.starts_with("temp_") || name.starts_with("humidity")
    }
}

/// `values[t - lag]` at `t`, missing before the start
fn shift(values: &[Option<f64>], lag: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|t| if t >= lag { values[t - lag] } else { None })
        .collect()
}

/// `values[t + horizon]` at `t`, missing past the end
fn lead(values: &[Option<f64>], horizon: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|t| values.get(t + horizon).copied().flatten())
        .collect()
}

/// Length of the run of missing values ending at each index
fn gap_lengths(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut run = 0usize;
    values
        .iter()
        .map(|v| {
            run = if v.is_none() { run + 1 } else { 0 };
            Some(run as f64)
        })
        .collect()
}

fn push_weather(frame: &mut FeatureFrame, timestamps: &[DateTime<Utc>], weather: &WeatherSeries) {
    // an observation stamped `s` becomes visible at `s + 1h`
    let visible_at: HashMap<DateTime<Utc>, usize> = weather
        .timestamps()
        .iter()
        .enumerate()
        .map(|(i, &ts)| (ts + Duration::hours(1), i))
        .collect();

    let names: Vec<String> = weather.variables().map(|v| v.to_string()).collect();
    for var in names {
        let Some(values) = weather.values(&var) else {
            continue;
        };
        let joined = timestamps
            .iter()
            .map(|ts| visible_at.get(ts).and_then(|&i| values[i]))
            .collect();
        frame.push(format!("wx_{}_lag_1", var), joined);
    }
}

/// Fewer than two distinct non-missing values
fn is_constant(values: &[Option<f64>]) -> bool {
    let mut present = values.iter().flatten();
    match present.next() {
        None => true,
        Some(first) => present.all(|v| v == first),
    }
}
