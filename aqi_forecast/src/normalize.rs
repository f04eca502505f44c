//! Raw observation records to clean hourly series

use crate::config::NormalizeConfig;
use crate::data::{lookup_key, CleanSeries, HourlyPoint, Parameter, RawObservation};
use crate::error::{ForecastError, Result};
use aqi_math::winsorize_options;
use chrono::{DateTime, Duration, DurationRound, NaiveDate, NaiveDateTime, Utc};
use std::collections::BTreeMap;
use tracing::debug;

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%m/%d/%Y"];

/// Parse an explicit timestamp string; naive values are taken as UTC
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    parse_date(raw).map(|d| d.and_utc())
}

fn parse_date(raw: &str) -> Option<NaiveDateTime> {
    DATE_FORMATS.iter().find_map(|fmt| {
        NaiveDate::parse_from_str(raw.trim(), fmt)
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
    })
}

/// Hour of day from an HourObserved field. Blank means midnight; anything
/// other than a whole number in 0..=23 is rejected.
fn parse_hour(raw: Option<&str>) -> Option<i64> {
    let raw = raw.map(str::trim).unwrap_or_default();
    if raw.is_empty() {
        return Some(0);
    }
    let hour = raw.parse::<f64>().ok()?;
    (hour.fract() == 0.0 && (0.0..=23.0).contains(&hour)).then_some(hour as i64)
}

/// Timestamp of a record, from `ts` or DateObserved + HourObserved.
///
/// A blank hour counts as hour 0; an out-of-range or unparsable one drops
/// the record. The result is truncated to the hour.
pub fn record_timestamp(record: &RawObservation) -> Option<DateTime<Utc>> {
    let ts = match record.ts.as_deref() {
        Some(ts) => parse_timestamp(ts)?,
        None => {
            let date = parse_date(record.date_observed.as_deref()?)?;
            let hour = parse_hour(record.hour_observed.as_deref())?;
            date.and_utc().checked_add_signed(Duration::hours(hour))?
        }
    };
    ts.duration_trunc(Duration::hours(1)).ok()
}

#[derive(Debug, Default)]
struct Accumulator {
    sum: f64,
    count: usize,
}

impl Accumulator {
    fn push(&mut self, value: Option<f64>) {
        if let Some(v) = value.filter(|v| v.is_finite()) {
            self.sum += v;
            self.count += 1;
        }
    }

    fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

#[derive(Debug, Default)]
struct HourBucket {
    aqi: Accumulator,
    temp_c: Accumulator,
    humidity: Accumulator,
    latitude: Accumulator,
    longitude: Accumulator,
}

type SeriesKey = (String, Parameter);

/// Turns raw records into deduplicated, winsorized, short-gap-filled hourly series
#[derive(Debug, Clone)]
pub struct TimeSeriesNormalizer {
    config: NormalizeConfig,
}

impl TimeSeriesNormalizer {
    pub fn new(config: NormalizeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &NormalizeConfig {
        &self.config
    }

    /// Every (city, parameter) series found in the records, without a minimum-size check
    pub fn normalize_all(&self, raw: &[RawObservation]) -> Result<Vec<CleanSeries>> {
        let mut groups: BTreeMap<SeriesKey, BTreeMap<DateTime<Utc>, HourBucket>> = BTreeMap::new();
        let mut dropped_ts = 0usize;
        let mut dropped_param = 0usize;

        for record in raw {
            let Some(parameter) = Parameter::parse(&record.parameter) else {
                dropped_param += 1;
                continue;
            };
            let Some(ts) = record_timestamp(record) else {
                dropped_ts += 1;
                continue;
            };

            let bucket = groups
                .entry((record.city_key(), parameter))
                .or_default()
                .entry(ts)
                .or_default();
            // negative AQI is the feed's missing-value marker
            bucket.aqi.push(record.aqi.filter(|&a| a >= 0.0));
            bucket.temp_c.push(record.temp_c);
            bucket.humidity.push(record.humidity);
            bucket.latitude.push(record.latitude);
            bucket.longitude.push(record.longitude);
        }

        if dropped_ts > 0 || dropped_param > 0 {
            debug!(
                "Dropped {} records with unparsable timestamps and {} with unknown parameters",
                dropped_ts, dropped_param
            );
        }

        groups
            .into_iter()
            .map(|((city_key, parameter), hours)| self.build_series(city_key, parameter, hours))
            .collect()
    }

    /// The clean series for one city and parameter.
    ///
    /// Fails with `InsufficientHistory` when fewer than the configured number of
    /// observed AQI points exist (zero when the series is absent).
    pub fn normalize(
        &self,
        raw: &[RawObservation],
        city: &str,
        parameter: Parameter,
    ) -> Result<CleanSeries> {
        let all = self.normalize_all(raw)?;
        let context = format!("{} {}", city, parameter);
        let series = select_series(&all, city, parameter).ok_or_else(|| {
            ForecastError::InsufficientHistory {
                context: context.clone(),
                actual: 0,
                required: self.config.min_valid_points,
            }
        })?;

        let observed = series.points.iter().filter(|p| p.aqi_raw.is_some()).count();
        if observed < self.config.min_valid_points {
            return Err(ForecastError::InsufficientHistory {
                context,
                actual: observed,
                required: self.config.min_valid_points,
            });
        }
        Ok(series.clone())
    }

    fn build_series(
        &self,
        city_key: String,
        parameter: Parameter,
        hours: BTreeMap<DateTime<Utc>, HourBucket>,
    ) -> Result<CleanSeries> {
        let mut lat = Accumulator::default();
        let mut lon = Accumulator::default();
        for bucket in hours.values() {
            lat.push(bucket.latitude.mean());
            lon.push(bucket.longitude.mean());
        }
        let coordinates = lat.mean().zip(lon.mean());

        let observed: Vec<Option<f64>> = hours.values().map(|b| b.aqi.mean()).collect();
        let winsorized =
            winsorize_options(&observed, self.config.winsorize_low, self.config.winsorize_high)?;

        let (Some(&start), Some(&end)) = (hours.keys().next(), hours.keys().next_back()) else {
            return Ok(CleanSeries {
                city_key,
                parameter,
                coordinates,
                points: Vec::new(),
            });
        };

        let mut by_ts: BTreeMap<DateTime<Utc>, HourlyPoint> = BTreeMap::new();
        for ((ts, bucket), (raw, clipped)) in hours.iter().zip(observed.iter().zip(&winsorized)) {
            by_ts.insert(
                *ts,
                HourlyPoint {
                    timestamp: *ts,
                    aqi: *clipped,
                    aqi_raw: *raw,
                    temp_c: bucket.temp_c.mean(),
                    humidity: bucket.humidity.mean(),
                },
            );
        }

        let n_hours = (end - start).num_hours() as usize + 1;
        let mut points = Vec::with_capacity(n_hours);
        for i in 0..n_hours {
            let ts = start + Duration::hours(i as i64);
            points.push(
                by_ts
                    .get(&ts)
                    .copied()
                    .unwrap_or_else(|| HourlyPoint::with_aqi(ts, None)),
            );
        }

        let limit = self.config.max_fill_hours;
        forward_fill(&mut points, limit, |p| &mut p.aqi);
        forward_fill(&mut points, limit, |p| &mut p.temp_c);
        forward_fill(&mut points, limit, |p| &mut p.humidity);

        Ok(CleanSeries {
            city_key,
            parameter,
            coordinates,
            points,
        })
    }
}

/// Forward fill one field, covering at most `limit` consecutive missing entries
fn forward_fill<F>(points: &mut [HourlyPoint], limit: usize, mut field: F)
where
    F: FnMut(&mut HourlyPoint) -> &mut Option<f64>,
{
    let mut last: Option<f64> = None;
    let mut run = 0usize;
    for point in points.iter_mut() {
        let slot = field(point);
        match *slot {
            Some(v) => {
                last = Some(v);
                run = 0;
            }
            None => {
                run += 1;
                if run <= limit {
                    *slot = last;
                }
            }
        }
    }
}

/// Pick one series by case-insensitive, whitespace-collapsed city key
pub fn select_series<'a>(
    series: &'a [CleanSeries],
    city: &str,
    parameter: Parameter,
) -> Option<&'a CleanSeries> {
    let wanted = lookup_key(city);
    series
        .iter()
        .find(|s| s.parameter == parameter && lookup_key(&s.city_key) == wanted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    fn record(ts: &str, aqi: f64) -> RawObservation {
        RawObservation::at("Austin", "TX", "PM2.5", ts, aqi)
    }

    #[test]
    fn test_timestamp_from_date_and_hour() {
        let rec = RawObservation {
            date_observed: Some("2024-03-05".to_string()),
            hour_observed: Some("13".to_string()),
            ..Default::default()
        };
        assert_eq!(
            record_timestamp(&rec),
            Some(Utc.with_ymd_and_hms(2024, 3, 5, 13, 0, 0).unwrap())
        );

        let blank_hour = RawObservation {
            date_observed: Some("2024-03-05".to_string()),
            hour_observed: Some(" ".to_string()),
            ..Default::default()
        };
        assert_eq!(
            record_timestamp(&blank_hour),
            Some(Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap())
        );
    }

    #[rstest]
    #[case("24")]
    #[case("-1")]
    #[case("7.5")]
    #[case("noon")]
    #[case("100000000000")]
    #[case("NaN")]
    fn test_out_of_range_hour_is_rejected(#[case] hour: &str) {
        let rec = RawObservation {
            date_observed: Some("2024-03-05".to_string()),
            hour_observed: Some(hour.to_string()),
            ..Default::default()
        };
        assert_eq!(record_timestamp(&rec), None);
    }

    #[test]
    fn test_out_of_range_hours_counted_as_dropped() {
        let dated = |hour: &str| RawObservation {
            ts: None,
            date_observed: Some("2024-05-01".to_string()),
            hour_observed: Some(hour.to_string()),
            ..record("", 40.0)
        };
        let rows = vec![dated("3"), dated("100000000000"), dated("25")];
        let normalizer = TimeSeriesNormalizer::new(NormalizeConfig::default());
        let all = normalizer.normalize_all(&rows).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].len(), 1);
        assert_eq!(
            all[0].points[0].timestamp,
            Utc.with_ymd_and_hms(2024, 5, 1, 3, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 2, 3, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2024-01-02T03:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-02 03:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-02 03:00"), Some(expected));
        assert_eq!(parse_timestamp("not a date"), None);

        let rec = record("2024-01-02T03:41:00Z", 10.0);
        assert_eq!(record_timestamp(&rec), Some(expected));
    }

    #[test]
    fn test_unknown_parameters_and_bad_rows_dropped() {
        let mut rows = vec![record("2024-01-01T00:00:00Z", 10.0)];
        rows.push(RawObservation::at("Austin", "TX", "NO2", "2024-01-01T01:00:00Z", 5.0));
        rows.push(record("garbage", 7.0));
        let normalizer = TimeSeriesNormalizer::new(NormalizeConfig::default());
        let all = normalizer.normalize_all(&rows).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].len(), 1);
        assert_eq!(all[0].parameter, Parameter::Pm25);
    }

    #[test]
    fn test_forward_fill_limit() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut points: Vec<HourlyPoint> = [Some(1.0), None, None, None, None, Some(2.0)]
            .iter()
            .enumerate()
            .map(|(i, &v)| HourlyPoint::with_aqi(start + Duration::hours(i as i64), v))
            .collect();
        forward_fill(&mut points, 3, |p| &mut p.aqi);
        let filled: Vec<Option<f64>> = points.iter().map(|p| p.aqi).collect();
        assert_eq!(
            filled,
            vec![Some(1.0), Some(1.0), Some(1.0), Some(1.0), None, Some(2.0)]
        );
    }

    #[test]
    fn test_select_series_normalizes_city() {
        let normalizer = TimeSeriesNormalizer::new(NormalizeConfig::default());
        let all = normalizer
            .normalize_all(&[record("2024-01-01T00:00:00Z", 10.0)])
            .unwrap();
        assert!(select_series(&all, "  austin,   tx", Parameter::Pm25).is_some());
        assert!(select_series(&all, "austin, tx", Parameter::O3).is_none());
    }
}
