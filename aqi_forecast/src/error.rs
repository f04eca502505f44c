//! Error types for the aqi_forecast crate

use polars::prelude::PolarsError;
use thiserror::Error;

/// Custom error types for the aqi_forecast crate
#[derive(Debug, Error)]
pub enum ForecastError {
    /// A series is too short for the requested operation
    #[error("Insufficient history for {context}: have {actual} points, need at least {required}")]
    InsufficientHistory {
        context: String,
        actual: usize,
        required: usize,
    },

    /// Feature construction yielded zero usable rows
    #[error("No valid feature rows after dropping missing values for horizon {horizon}h")]
    NoValidData { horizon: usize },

    /// A regressor could not be fitted
    #[error("Model fit failed: {0}")]
    ModelFit(String),

    /// Error related to data validation or processing
    #[error("Data error: {0}")]
    DataError(String),

    /// Error from invalid parameters
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// City name could not be resolved to coordinates
    #[error("City '{name}' not found; some available cities: {suggestions:?}")]
    CityNotFound {
        name: String,
        suggestions: Vec<String>,
    },

    /// Error from numeric kernels
    #[error("Math error: {0}")]
    MathError(#[from] aqi_math::MathError),

    /// Error from IO operations
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Error from CSV parsing
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    /// Error from JSON (de)serialization
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Error from Polars operations
    #[error("Polars error: {0}")]
    PolarsError(String),
}

/// Result type with our custom error
pub type Result<T> = std::result::Result<T, ForecastError>;

impl From<PolarsError> for ForecastError {
    fn from(err: PolarsError) -> Self {
        ForecastError::PolarsError(err.to_string())
    }
}
