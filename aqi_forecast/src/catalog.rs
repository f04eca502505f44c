//! City coordinates and observation sources
//!
//! The network-backed implementations live outside this crate; here are
//! the seams plus in-memory implementations used by the pipeline and tests.

use crate::data::{lookup_key, CityMeta, RawObservation};
use crate::error::{ForecastError, Result};
use crate::normalize::record_timestamp;
use chrono::{DateTime, Duration, Utc};
use tracing::info;

/// Number of names offered when a lookup fails
const SUGGESTION_LIMIT: usize = 10;

/// Resolves a city name to coordinates
pub trait CityLocator {
    fn lookup(&self, city_name: &str) -> Result<CityMeta>;
}

/// Supplies recent raw observations around a point
pub trait ObservationSource {
    fn fetch_recent(&self, latitude: f64, longitude: f64, window_days: u32) -> Result<Vec<RawObservation>>;
}

/// Named city coordinates in insertion order
#[derive(Debug, Clone, Default)]
pub struct CityCatalog {
    cities: Vec<(String, CityMeta)>,
}

impl CityCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a city
    pub fn insert(&mut self, name: &str, latitude: f64, longitude: f64) {
        let meta = CityMeta { latitude, longitude };
        match self.cities.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = meta,
            None => self.cities.push((name.to_string(), meta)),
        }
    }

    /// Collect the coordinates carried by raw observations, one entry per city key
    pub fn from_observations(records: &[RawObservation]) -> Self {
        let mut catalog = Self::new();
        for record in records {
            if let (Some(lat), Some(lon)) = (record.latitude, record.longitude) {
                let key = record.city_key();
                if !catalog.cities.iter().any(|(n, _)| *n == key) {
                    catalog.cities.push((key, CityMeta { latitude: lat, longitude: lon }));
                }
            }
        }
        catalog
    }

    pub fn len(&self) -> usize {
        self.cities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cities.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.cities.iter().map(|(n, _)| n.as_str())
    }

    /// Up to `limit` city names starting with `prefix`, ignoring case
    pub fn suggest(&self, prefix: &str, limit: usize) -> Vec<String> {
        let prefix = lookup_key(prefix);
        self.cities
            .iter()
            .filter(|(n, _)| lookup_key(n).starts_with(&prefix))
            .take(limit)
            .map(|(n, _)| n.clone())
            .collect()
    }
}

impl CityLocator for CityCatalog {
    /// Exact match, then case-insensitive match, then a prefix match on the
    /// part before the first comma.
    fn lookup(&self, city_name: &str) -> Result<CityMeta> {
        if let Some((_, meta)) = self.cities.iter().find(|(n, _)| n == city_name) {
            return Ok(*meta);
        }

        let wanted = lookup_key(city_name);
        if let Some((_, meta)) = self.cities.iter().find(|(n, _)| lookup_key(n) == wanted) {
            return Ok(*meta);
        }

        let base = wanted.split(',').next().unwrap_or_default().trim();
        if !base.is_empty() {
            if let Some((name, meta)) = self.cities.iter().find(|(n, _)| lookup_key(n).starts_with(base)) {
                info!("Partial match for '{}': using '{}'", city_name, name);
                return Ok(*meta);
            }
        }

        Err(ForecastError::CityNotFound {
            name: city_name.to_string(),
            suggestions: self.names().take(SUGGESTION_LIMIT).map(str::to_string).collect(),
        })
    }
}

/// Observation source over records already in memory
#[derive(Debug, Clone)]
pub struct InMemorySource {
    records: Vec<RawObservation>,
    /// Latest time treated as "now" for the recent window
    as_of: DateTime<Utc>,
    /// Maximum coordinate distance, in degrees, to count as the same place
    radius_deg: f64,
}

impl InMemorySource {
    pub fn new(records: Vec<RawObservation>, as_of: DateTime<Utc>) -> Self {
        Self {
            records,
            as_of,
            radius_deg: 0.5,
        }
    }

    pub fn with_radius(mut self, radius_deg: f64) -> Self {
        self.radius_deg = radius_deg;
        self
    }
}

impl ObservationSource for InMemorySource {
    fn fetch_recent(&self, latitude: f64, longitude: f64, window_days: u32) -> Result<Vec<RawObservation>> {
        if window_days == 0 {
            return Err(ForecastError::InvalidParameter(
                "window_days must be positive".to_string(),
            ));
        }
        let since = self.as_of - Duration::days(i64::from(window_days));
        Ok(self
            .records
            .iter()
            .filter(|r| match (r.latitude, r.longitude) {
                (Some(lat), Some(lon)) => {
                    (lat - latitude).abs() <= self.radius_deg && (lon - longitude).abs() <= self.radius_deg
                }
                _ => false,
            })
            .filter(|r| matches!(record_timestamp(r), Some(ts) if ts >= since && ts <= self.as_of))
            .cloned()
            .collect())
    }
}
