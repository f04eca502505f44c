//! # AeroSafe
//!
//! Facade over the workspace crates: [`aqi_math`] for the numeric kernels and
//! [`aqi_forecast`] for the forecasting core.
//!
//! ## Example
//!
//! ```
//! use aerosafe_workspace::forecast::AqiCategory;
//!
//! assert_eq!(AqiCategory::from_aqi(42.0), AqiCategory::Good);
//! assert_eq!(AqiCategory::from_aqi(180.0).label(), "Unhealthy");
//! ```

pub use aqi_forecast as forecast;
pub use aqi_math as math;

pub use aqi_forecast::{
    ForecastConfig, ForecastError, ForecastPipeline, ForecastRow, ModelBundle, Parameter,
    PipelineOutput,
};
