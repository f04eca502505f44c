//! # AQI Math
//!
//! Numeric building blocks shared by the AQI forecasting core.
//! Everything here works on plain slices; missing observations are
//! represented as `Option<f64>` (or `NaN` inside feature matrices).

use thiserror::Error;

pub mod quantile;
pub mod regression;
pub mod rolling;

pub use quantile::{percentile, quantile_bounds, winsorize, winsorize_options};
pub use regression::RidgeRegression;
pub use rolling::{shifted_rolling, RollingStat};

/// Errors that can occur in numeric calculations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MathError {
    #[error("Insufficient data for calculation: {0}")]
    InsufficientData(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Calculation error: {0}")]
    CalculationError(String),
}

/// Result type for numeric operations
pub type Result<T> = std::result::Result<T, MathError>;
