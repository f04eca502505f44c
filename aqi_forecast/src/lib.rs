//! # AQI Forecast
//!
//! Short-to-medium-range (1 to 7 day) AQI forecasts per city and pollutant
//! from hourly observations.
//!
//! ## Features
//!
//! - Normalization of raw feed records into contiguous hourly series
//! - Leakage-safe lag, rolling, calendar and data-quality features
//! - Gradient-boosted trees with quantile loss, random-forest fallback
//! - One model (or p10/p50/p90 triplet) per daily horizon in a persistable bundle
//! - Rolling-origin backtests against naive and seasonal baselines
//! - Coverage-driven interval calibration and local bias-correction blending
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use aqi_forecast::{ForecastConfig, ForecastPipeline, ObservationLoader, Parameter};
//!
//! fn main() -> aqi_forecast::Result<()> {
//!     let records = ObservationLoader::from_csv("observations.csv")?;
//!     let pipeline = ForecastPipeline::new(ForecastConfig::default())?;
//!     let output = pipeline.run(&records, "Denver, CO", Parameter::O3, None)?;
//!
//!     for row in &output.forecasts {
//!         println!(
//!             "{}h: {:.0} [{:.0}, {:.0}] {}",
//!             row.horizon_h, row.p50, row.p10, row.p90, row.category
//!         );
//!     }
//!     Ok(())
//! }
//! ```

pub mod backtest;
pub mod blend;
pub mod bundle;
pub mod calibration;
pub mod catalog;
pub mod config;
pub mod data;
pub mod diagnostics;
pub mod error;
pub mod features;
pub mod forecast;
pub mod metrics;
pub mod models;
pub mod normalize;
pub mod orchestrator;
pub mod pipeline;
pub mod synthetic;
pub mod tables;
pub mod utils;

// Re-export commonly used types
pub use crate::backtest::{BacktestEngine, BacktestReport};
pub use crate::blend::LocalBlender;
pub use crate::bundle::{HorizonModels, ModelBundle};
pub use crate::calibration::IntervalCalibrator;
pub use crate::catalog::{CityCatalog, CityLocator, ObservationSource};
pub use crate::config::{ForecastConfig, IntervalMethod, DAILY_HORIZONS};
pub use crate::data::{AqiCategory, CityMeta, CleanSeries, ObservationLoader, Parameter, RawObservation, WeatherSeries};
pub use crate::error::{ForecastError, Result};
pub use crate::features::{BuildMode, FeatureBuilder, FeatureSet};
pub use crate::forecast::{ForecastEngine, ForecastRow, PredictionMode};
pub use crate::models::{FittedModel, ModelTrainer};
pub use crate::normalize::TimeSeriesNormalizer;
pub use crate::orchestrator::MultiHorizonOrchestrator;
pub use crate::pipeline::{ForecastPipeline, PipelineOutput};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
