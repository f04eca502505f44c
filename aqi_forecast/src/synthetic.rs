//! Synthetic hourly AQI with daily and weekly cycles

use crate::data::{CleanSeries, HourlyPoint, Parameter, RawObservation};
use crate::error::{ForecastError, Result};
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::f64::consts::PI;

/// Generator settings
#[derive(Debug, Clone)]
pub struct SyntheticAqi {
    pub base: f64,
    /// Peak-to-mean size of the daily cycle
    pub daily_amplitude: f64,
    pub weekly_amplitude: f64,
    pub noise_std: f64,
    /// Chance that an hour is missing
    pub missing_rate: f64,
    pub seed: u64,
}

impl Default for SyntheticAqi {
    fn default() -> Self {
        Self {
            base: 50.0,
            daily_amplitude: 20.0,
            weekly_amplitude: 5.0,
            noise_std: 3.0,
            missing_rate: 0.0,
            seed: 42,
        }
    }
}

impl SyntheticAqi {
    /// Noise-free value at hour `i`
    pub fn expected(&self, i: usize) -> f64 {
        let t = i as f64;
        self.base
            + self.daily_amplitude * (2.0 * PI * t / 24.0).sin()
            + self.weekly_amplitude * (2.0 * PI * t / 168.0).sin()
    }

    fn draws(&self, hours: usize) -> Result<Vec<(Option<f64>, f64)>> {
        let noise = Normal::new(0.0, self.noise_std)
            .map_err(|e| ForecastError::InvalidParameter(format!("Invalid noise: {}", e)))?;
        let mut rng = StdRng::seed_from_u64(self.seed);
        Ok((0..hours)
            .map(|i| {
                let value = (self.expected(i) + noise.sample(&mut rng)).max(0.0);
                let temp = 15.0 + 8.0 * (2.0 * PI * (i as f64 - 6.0) / 24.0).sin();
                let missing = self.missing_rate > 0.0 && rng.gen::<f64>() < self.missing_rate;
                ((!missing).then_some(value), temp)
            })
            .collect())
    }

    /// A clean series of `hours` points starting at `start`
    pub fn series(&self, city_key: &str, parameter: Parameter, start: DateTime<Utc>, hours: usize) -> Result<CleanSeries> {
        let points = self
            .draws(hours)?
            .into_iter()
            .enumerate()
            .map(|(i, (aqi, temp))| HourlyPoint {
                temp_c: Some(temp),
                ..HourlyPoint::with_aqi(start + Duration::hours(i as i64), aqi)
            })
            .collect();
        Ok(CleanSeries {
            city_key: city_key.to_string(),
            parameter,
            coordinates: None,
            points,
        })
    }

    /// The same values as raw feed records, skipping missing hours
    pub fn observations(
        &self,
        area: &str,
        state: &str,
        parameter: Parameter,
        start: DateTime<Utc>,
        hours: usize,
    ) -> Result<Vec<RawObservation>> {
        Ok(self
            .draws(hours)?
            .into_iter()
            .enumerate()
            .filter_map(|(i, (aqi, temp))| {
                let ts = start + Duration::hours(i as i64);
                aqi.map(|aqi| RawObservation {
                    temp_c: Some(temp),
                    latitude: Some(39.74),
                    longitude: Some(-104.99),
                    ..RawObservation::at(area, state, parameter.as_str(), &ts.to_rfc3339(), aqi)
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_seeded_generation_is_reproducible() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let gen = SyntheticAqi::default();
        let a = gen.series("Denver, CO", Parameter::O3, start, 48).unwrap();
        let b = gen.series("Denver, CO", Parameter::O3, start, 48).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 48);
        assert_eq!(a.valid_count(), 48);
    }

    #[test]
    fn test_missing_rate_drops_hours() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let gen = SyntheticAqi {
            missing_rate: 0.5,
            ..SyntheticAqi::default()
        };
        let series = gen.series("Denver, CO", Parameter::O3, start, 400).unwrap();
        assert!(series.valid_count() < 300);
        let records = gen.observations("Denver", "CO", Parameter::O3, start, 400).unwrap();
        assert_eq!(records.len(), series.valid_count());
    }

    #[test]
    fn test_negative_noise_is_rejected() {
        let gen = SyntheticAqi {
            noise_std: -1.0,
            ..SyntheticAqi::default()
        };
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(gen.series("x, y", Parameter::Pm25, start, 10).is_err());
    }
}
