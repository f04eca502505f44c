//! Observation records, clean hourly series and related value types

use crate::error::{ForecastError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Pollutant tracked by a series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Parameter {
    #[serde(rename = "PM25")]
    Pm25,
    #[serde(rename = "O3")]
    O3,
}

impl Parameter {
    /// Map a raw parameter name onto a known pollutant.
    ///
    /// Accepts "PM2.5"/"PM25" and "OZONE"/"O3" in any case; anything else is `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_uppercase().as_str() {
            "PM2.5" | "PM25" => Some(Parameter::Pm25),
            "OZONE" | "O3" => Some(Parameter::O3),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Parameter::Pm25 => "PM25",
            Parameter::O3 => "O3",
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One raw observation record as delivered by the air-quality feed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    #[serde(rename = "ReportingArea", alias = "reporting_area", default)]
    pub reporting_area: String,
    #[serde(rename = "StateCode", alias = "state_code", default)]
    pub state_code: String,
    #[serde(rename = "ParameterName", alias = "Parameter", alias = "parameter", default)]
    pub parameter: String,
    #[serde(
        rename = "AQI",
        alias = "aqi",
        default,
        deserialize_with = "csv::invalid_option"
    )]
    pub aqi: Option<f64>,
    #[serde(rename = "DateObserved", alias = "date_observed", default)]
    pub date_observed: Option<String>,
    #[serde(rename = "HourObserved", alias = "hour_observed", default)]
    pub hour_observed: Option<String>,
    #[serde(default)]
    pub ts: Option<String>,
    #[serde(
        rename = "Latitude",
        alias = "latitude",
        default,
        deserialize_with = "csv::invalid_option"
    )]
    pub latitude: Option<f64>,
    #[serde(
        rename = "Longitude",
        alias = "longitude",
        default,
        deserialize_with = "csv::invalid_option"
    )]
    pub longitude: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub temp_c: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub humidity: Option<f64>,
}

impl RawObservation {
    /// Record stamped with an explicit `ts` value
    pub fn at(area: &str, state: &str, parameter: &str, ts: &str, aqi: f64) -> Self {
        Self {
            reporting_area: area.to_string(),
            state_code: state.to_string(),
            parameter: parameter.to_string(),
            aqi: Some(aqi),
            ts: Some(ts.to_string()),
            ..Default::default()
        }
    }

    /// "area, state" key identifying the city
    pub fn city_key(&self) -> String {
        city_key(&self.reporting_area, &self.state_code)
    }
}

/// Build the "area, state" city key
pub fn city_key(area: &str, state: &str) -> String {
    format!("{}, {}", area.trim(), state.trim())
}

/// Case-insensitive, whitespace-collapsed form of a city key used for lookups
pub fn lookup_key(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Loader for raw observation files
#[derive(Debug)]
pub struct ObservationLoader;

impl ObservationLoader {
    /// Load raw observations from a CSV file with a header row
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Vec<RawObservation>> {
        let file = File::open(path)?;
        Self::from_reader(file)
    }

    /// Load raw observations from any CSV reader
    pub fn from_reader<R: Read>(reader: R) -> Result<Vec<RawObservation>> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut records = Vec::new();
        for row in rdr.deserialize() {
            let record: RawObservation = row?;
            records.push(record);
        }
        Ok(records)
    }
}

/// One hour of a clean series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HourlyPoint {
    pub timestamp: DateTime<Utc>,
    /// Winsorized, forward-filled AQI
    pub aqi: Option<f64>,
    /// AQI before winsorization
    pub aqi_raw: Option<f64>,
    pub temp_c: Option<f64>,
    pub humidity: Option<f64>,
}

impl HourlyPoint {
    /// A point with only an AQI value
    pub fn with_aqi(timestamp: DateTime<Utc>, aqi: Option<f64>) -> Self {
        Self {
            timestamp,
            aqi,
            aqi_raw: aqi,
            temp_c: None,
            humidity: None,
        }
    }
}

/// Contiguous hourly series for one (city, parameter)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanSeries {
    pub city_key: String,
    pub parameter: Parameter,
    /// Mean (latitude, longitude) of the contributing records
    pub coordinates: Option<(f64, f64)>,
    pub points: Vec<HourlyPoint>,
}

impl CleanSeries {
    /// Build a series from consecutive hourly AQI values starting at `start`
    pub fn from_hourly_values(
        city_key: &str,
        parameter: Parameter,
        start: DateTime<Utc>,
        values: &[Option<f64>],
    ) -> Self {
        let points = values
            .iter()
            .enumerate()
            .map(|(i, &v)| HourlyPoint::with_aqi(start + Duration::hours(i as i64), v))
            .collect();
        Self {
            city_key: city_key.to_string(),
            parameter,
            coordinates: None,
            points,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Copy of rows `start..end` (to the end when `end` is `None`)
    pub fn slice(&self, start: usize, end: Option<usize>) -> Result<Self> {
        let end = end.unwrap_or(self.points.len());
        if start > end || end > self.points.len() {
            return Err(ForecastError::InvalidParameter(format!(
                "Slice {}..{} out of range for series of length {}",
                start,
                end,
                self.points.len()
            )));
        }
        Ok(Self {
            city_key: self.city_key.clone(),
            parameter: self.parameter,
            coordinates: self.coordinates,
            points: self.points[start..end].to_vec(),
        })
    }

    pub fn timestamps(&self) -> Vec<DateTime<Utc>> {
        self.points.iter().map(|p| p.timestamp).collect()
    }

    pub fn aqi_values(&self) -> Vec<Option<f64>> {
        self.points.iter().map(|p| p.aqi).collect()
    }

    pub fn temp_values(&self) -> Vec<Option<f64>> {
        self.points.iter().map(|p| p.temp_c).collect()
    }

    pub fn humidity_values(&self) -> Vec<Option<f64>> {
        self.points.iter().map(|p| p.humidity).collect()
    }

    pub fn first_timestamp(&self) -> Option<DateTime<Utc>> {
        self.points.first().map(|p| p.timestamp)
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.points.last().map(|p| p.timestamp)
    }

    /// Most recent non-missing AQI value
    pub fn last_observed_aqi(&self) -> Option<f64> {
        self.points.iter().rev().find_map(|p| p.aqi)
    }

    /// Number of non-missing AQI values
    pub fn valid_count(&self) -> usize {
        self.points.iter().filter(|p| p.aqi.is_some()).count()
    }

    pub fn city_meta(&self) -> Option<CityMeta> {
        self.coordinates.map(|(latitude, longitude)| CityMeta {
            latitude,
            longitude,
        })
    }
}

/// Static metadata for a city
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CityMeta {
    pub latitude: f64,
    pub longitude: f64,
}

/// External hourly weather variables keyed by observation time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeatherSeries {
    timestamps: Vec<DateTime<Utc>>,
    columns: BTreeMap<String, Vec<Option<f64>>>,
}

impl WeatherSeries {
    pub fn new(timestamps: Vec<DateTime<Utc>>) -> Self {
        Self {
            timestamps,
            columns: BTreeMap::new(),
        }
    }

    /// Add a variable; its length must match the timestamps
    pub fn with_variable(mut self, name: &str, values: Vec<Option<f64>>) -> Result<Self> {
        if values.len() != self.timestamps.len() {
            return Err(ForecastError::DataError(format!(
                "Weather variable '{}' has {} values for {} timestamps",
                name,
                values.len(),
                self.timestamps.len()
            )));
        }
        self.columns.insert(name.to_string(), values);
        Ok(self)
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    /// Variable names in sorted order
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(|k| k.as_str())
    }

    pub fn values(&self, name: &str) -> Option<&[Option<f64>]> {
        self.columns.get(name).map(|v| v.as_slice())
    }
}

/// EPA AQI risk category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AqiCategory {
    Good,
    Moderate,
    UnhealthyForSensitiveGroups,
    Unhealthy,
    VeryUnhealthy,
    Hazardous,
}

impl AqiCategory {
    pub fn from_aqi(aqi: f64) -> Self {
        if aqi <= 50.0 {
            AqiCategory::Good
        } else if aqi <= 100.0 {
            AqiCategory::Moderate
        } else if aqi <= 150.0 {
            AqiCategory::UnhealthyForSensitiveGroups
        } else if aqi <= 200.0 {
            AqiCategory::Unhealthy
        } else if aqi <= 300.0 {
            AqiCategory::VeryUnhealthy
        } else {
            AqiCategory::Hazardous
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AqiCategory::Good => "Good",
            AqiCategory::Moderate => "Moderate",
            AqiCategory::UnhealthyForSensitiveGroups => "Unhealthy for Sensitive Groups",
            AqiCategory::Unhealthy => "Unhealthy",
            AqiCategory::VeryUnhealthy => "Very Unhealthy",
            AqiCategory::Hazardous => "Hazardous",
        }
    }
}

impl fmt::Display for AqiCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}
