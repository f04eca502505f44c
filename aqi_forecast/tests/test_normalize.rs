mod common;

use aqi_forecast::config::NormalizeConfig;
use aqi_forecast::data::ObservationLoader;
use aqi_forecast::normalize::select_series;
use aqi_forecast::{ForecastError, Parameter, TimeSeriesNormalizer};
use common::record;
use pretty_assertions::assert_eq;
use std::io::Write;
use tempfile::NamedTempFile;

fn normalizer() -> TimeSeriesNormalizer {
    TimeSeriesNormalizer::new(NormalizeConfig::default())
}

#[test]
fn test_duplicates_are_averaged() {
    let raw = vec![
        record("2024-05-01T10:00:00Z", 40.0),
        record("2024-05-01T10:00:00Z", 60.0),
    ];
    let all = normalizer().normalize_all(&raw).unwrap();
    assert_eq!(all.len(), 1);
    let series = &all[0];
    assert_eq!(series.len(), 1);
    assert_eq!(series.points[0].aqi, Some(50.0));
    assert_eq!(series.points[0].aqi_raw, Some(50.0));
}

#[test]
fn test_five_hour_gap_fills_only_three_hours() {
    let raw: Vec<_> = [0, 1, 2, 8, 9]
        .iter()
        .map(|h| record(&format!("2024-05-01T{:02}:00:00Z", h), 50.0))
        .collect();
    let series = normalizer().normalize_all(&raw).unwrap().remove(0);
    assert_eq!(series.len(), 10);
    let aqi = series.aqi_values();
    assert_eq!(&aqi[3..6], &[Some(50.0); 3]);
    assert_eq!(&aqi[6..8], &[None, None]);
    assert_eq!(series.points[3].aqi_raw, None);
}

#[test]
fn test_requested_series_needs_thirty_points() {
    let raw: Vec<_> = (0..20)
        .map(|h| record(&format!("2024-05-01T{:02}:00:00Z", h), 30.0))
        .collect();
    match normalizer().normalize(&raw, "Austin, TX", Parameter::Pm25) {
        Err(ForecastError::InsufficientHistory { actual, required, .. }) => {
            assert_eq!((actual, required), (20, 30));
        }
        other => panic!("unexpected result: {:?}", other),
    }
    match normalizer().normalize(&raw, "Austin, TX", Parameter::O3) {
        Err(ForecastError::InsufficientHistory { actual, .. }) => assert_eq!(actual, 0),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn test_csv_feed_to_series() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        "DateObserved,HourObserved,ReportingArea,StateCode,Latitude,Longitude,ParameterName,AQI"
    )
    .unwrap();
    for day in 1..=2 {
        for hour in 0..24 {
            writeln!(
                file,
                "2024-06-{:02},{},Salt Lake City,UT,40.76,-111.89,OZONE,{}",
                day,
                hour,
                30 + hour
            )
            .unwrap();
            writeln!(
                file,
                "2024-06-{:02},{},Salt Lake City,UT,40.76,-111.89,PM2.5,-999",
                day, hour
            )
            .unwrap();
        }
    }
    writeln!(file, "2024-06-03,0,Salt Lake City,UT,40.76,-111.89,CO,12").unwrap();

    let raw = ObservationLoader::from_csv(file.path()).unwrap();
    assert_eq!(raw.len(), 97);

    let all = normalizer().normalize_all(&raw).unwrap();
    assert_eq!(all.len(), 2);
    let ozone = select_series(&all, "salt lake city, ut", Parameter::O3).unwrap();
    assert_eq!(ozone.len(), 48);
    assert_eq!(ozone.valid_count(), 48);
    assert!((ozone.city_meta().unwrap().latitude - 40.76).abs() < 1e-9);

    let series = normalizer()
        .normalize(&raw, "Salt Lake City, UT", Parameter::O3)
        .unwrap();
    assert_eq!(series.first_timestamp(), ozone.first_timestamp());

    // negative AQI marks missing values
    let pm = select_series(&all, "Salt Lake City, UT", Parameter::Pm25).unwrap();
    assert_eq!(pm.valid_count(), 0);
}
