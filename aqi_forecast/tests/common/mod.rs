#![allow(dead_code)]

use aqi_forecast::synthetic::SyntheticAqi;
use aqi_forecast::{CleanSeries, ForecastConfig, Parameter, RawObservation};
use chrono::{DateTime, TimeZone, Utc};

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// Mean 50, daily amplitude 20, little noise, no weekly cycle
pub fn diurnal_generator() -> SyntheticAqi {
    SyntheticAqi {
        base: 50.0,
        daily_amplitude: 20.0,
        weekly_amplitude: 0.0,
        noise_std: 1.0,
        missing_rate: 0.0,
        seed: 7,
    }
}

pub fn diurnal_series(hours: usize) -> CleanSeries {
    diurnal_generator()
        .series("Denver, CO", Parameter::O3, start(), hours)
        .unwrap()
}

pub fn record(ts: &str, aqi: f64) -> RawObservation {
    RawObservation::at("Austin", "TX", "PM2.5", ts, aqi)
}

/// Default configuration with small ensembles so tests stay fast
pub fn fast_config() -> ForecastConfig {
    let mut config = ForecastConfig::default();
    config.model.n_estimators = 80;
    config.model.forest_trees = 20;
    config.model.max_depth = 4;
    config
}
