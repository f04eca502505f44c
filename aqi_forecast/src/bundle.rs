//! Trained multi-horizon model bundle and its persistence

use crate::config::IntervalMethod;
use crate::error::{ForecastError, Result};
use crate::models::FittedModel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Models trained for one horizon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HorizonModels {
    /// Conditional-mean model; intervals come from residuals or a fixed band
    Point(FittedModel),
    /// Native quantile models
    Quantile {
        p10: FittedModel,
        p50: FittedModel,
        p90: FittedModel,
    },
}

impl HorizonModels {
    /// The model producing the central prediction
    pub fn median(&self) -> &FittedModel {
        match self {
            HorizonModels::Point(model) => model,
            HorizonModels::Quantile { p50, .. } => p50,
        }
    }

    pub fn is_quantile(&self) -> bool {
        matches!(self, HorizonModels::Quantile { .. })
    }
}

/// Everything needed to forecast: one entry per trained horizon plus the
/// shared feature alignment contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelBundle {
    models: BTreeMap<usize, HorizonModels>,
    train_timestamp: DateTime<Utc>,
    feature_names: Vec<String>,
    interval_method: IntervalMethod,
    conformal_residuals: BTreeMap<usize, Vec<f64>>,
}

impl ModelBundle {
    pub fn new(
        models: BTreeMap<usize, HorizonModels>,
        train_timestamp: DateTime<Utc>,
        feature_names: Vec<String>,
        interval_method: IntervalMethod,
        conformal_residuals: BTreeMap<usize, Vec<f64>>,
    ) -> Self {
        Self {
            models,
            train_timestamp,
            feature_names,
            interval_method,
            conformal_residuals,
        }
    }

    /// Trained horizons in ascending order
    pub fn horizons(&self) -> Vec<usize> {
        self.models.keys().copied().collect()
    }

    pub fn models_for(&self, horizon: usize) -> Option<&HorizonModels> {
        self.models.get(&horizon)
    }

    pub fn contains(&self, horizon: usize) -> bool {
        self.models.contains_key(&horizon)
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn train_timestamp(&self) -> DateTime<Utc> {
        self.train_timestamp
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn interval_method(&self) -> IntervalMethod {
        self.interval_method
    }

    /// Absolute validation residuals for a horizon, when recorded
    pub fn conformal_residuals(&self, horizon: usize) -> Option<&[f64]> {
        self.conformal_residuals.get(&horizon).map(|r| r.as_slice())
    }

    /// Feature importances of the central model for a horizon, highest first
    pub fn feature_importances(&self, horizon: usize) -> Option<Vec<(String, f64)>> {
        self.models
            .get(&horizon)
            .map(|m| m.median().ranked_importances(&self.feature_names))
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Restore from bytes produced by [`ModelBundle::to_bytes`]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Write the bundle to a file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    /// Read a bundle written by [`ModelBundle::save`]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ForecastError::DataError(format!(
                "Bundle file not found: {}",
                path.display()
            )));
        }
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}
