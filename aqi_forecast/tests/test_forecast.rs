mod common;

use aqi_forecast::calibration::IntervalCalibrator;
use aqi_forecast::config::BlendConfig;
use aqi_forecast::{
    ForecastEngine, IntervalMethod, LocalBlender, MultiHorizonOrchestrator, PredictionMode,
};
use common::{diurnal_generator, diurnal_series, fast_config};
use rstest::rstest;
use std::collections::BTreeMap;

#[test]
fn test_next_day_forecast_follows_daily_cycle() {
    let config = fast_config();
    let series = diurnal_series(400);
    let bundle = MultiHorizonOrchestrator::new(&config)
        .train_all(&series, &[24], None, None)
        .unwrap();

    let rows = ForecastEngine::new(&config).forecast(&series, &bundle, &[24]).unwrap();
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.prediction_mode, PredictionMode::Model);
    assert_eq!(row.timestamp, series.last_timestamp().unwrap() + chrono::Duration::hours(24));

    let truth = diurnal_generator().expected(399 + 24);
    assert!(
        (row.y_pred - truth).abs() <= 15.0,
        "predicted {:.2}, expected about {:.2}",
        row.y_pred,
        truth
    );
}

#[rstest]
#[case(IntervalMethod::Quantile)]
#[case(IntervalMethod::Conformal)]
#[case(IntervalMethod::None)]
fn test_rows_stay_ordered_after_post_processing(#[case] method: IntervalMethod) {
    let mut config = fast_config();
    config.interval_method = method;
    let series = diurnal_series(450);
    let bundle = MultiHorizonOrchestrator::new(&config)
        .train_all(&series, &[24, 48], None, None)
        .unwrap();
    assert_eq!(bundle.interval_method(), method);

    let rows = ForecastEngine::new(&config)
        .forecast(&series, &bundle, &[24, 48, 96])
        .unwrap();
    assert_eq!(rows[2].prediction_mode, PredictionMode::FallbackCarry);

    let calibrator = IntervalCalibrator::new(config.calibration.clone(), 500.0);
    let wide = calibrator.adjust(&rows, &BTreeMap::from([(24, 0.1), (48, 0.1)]));
    let narrow = calibrator.adjust(&rows, &BTreeMap::from([(24, 1.0), (48, 1.0)]));
    let blender = LocalBlender::new(
        BlendConfig {
            enabled: true,
            ..BlendConfig::default()
        },
        500.0,
    );
    let blended = blender.blend(&wide, &series).rows;

    for row in rows.iter().chain(&wide).chain(&narrow).chain(&blended) {
        assert!(row.is_ordered(), "unordered row {:?}", row);
        assert_eq!(row.y_pred, row.p50);
        assert!(row.p10 >= 0.0 && row.p90 <= 500.0);
    }
}

#[test]
fn test_forecast_from_shorter_context_uses_alignment() {
    let config = fast_config();
    let series = diurnal_series(400);
    let bundle = MultiHorizonOrchestrator::new(&config)
        .train_all(&series, &[24, 48], None, None)
        .unwrap();

    // Too short for the longest lags and windows, so some columns are missing
    let context = series.slice(300, None).unwrap();
    let rows = ForecastEngine::new(&config)
        .forecast(&context, &bundle, &[24, 48])
        .unwrap();
    assert_eq!(rows.len(), 2);
    for row in &rows {
        assert_eq!(row.prediction_mode, PredictionMode::Model);
        assert!(row.is_ordered());
    }
    assert_eq!(
        rows[1].timestamp,
        context.last_timestamp().unwrap() + chrono::Duration::hours(48)
    );
}
