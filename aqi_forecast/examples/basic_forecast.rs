use aqi_forecast::synthetic::SyntheticAqi;
use aqi_forecast::{
    ForecastConfig, ForecastEngine, IntervalMethod, ModelBundle, MultiHorizonOrchestrator, Parameter,
};
use chrono::{TimeZone, Utc};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("AQI Forecast: Basic Forecasting Example");
    println!("=======================================\n");

    // Three weeks of hourly ozone with a daily cycle
    let start = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();
    let series = SyntheticAqi::default().series("Denver, CO", Parameter::O3, start, 24 * 21)?;
    println!("Series: {} hourly points for {}\n", series.len(), series.city_key);

    let mut config = ForecastConfig::default();
    config.horizons = vec![24, 48];
    config.model.n_estimators = 50;

    for method in [IntervalMethod::Quantile, IntervalMethod::Conformal] {
        config.interval_method = method;
        let bundle = MultiHorizonOrchestrator::new(&config).train_all(&series, &config.horizons, None, None)?;

        // The bundle survives a byte round trip unchanged
        let bundle = ModelBundle::from_bytes(&bundle.to_bytes()?)?;

        let rows = ForecastEngine::new(&config).forecast(&series, &bundle, &config.horizons)?;
        println!("{} intervals:", method);
        for row in &rows {
            println!(
                "  {} (+{}h): {:.1} [{:.1}, {:.1}] {} via {}",
                row.timestamp, row.horizon_h, row.p50, row.p10, row.p90, row.category, row.prediction_mode
            );
        }

        if let Some(top) = bundle.feature_importances(24) {
            println!("  top features at 24h:");
            for (name, score) in top.iter().take(5) {
                println!("    {:<24} {:.3}", name, score);
            }
        }
        println!();
    }

    Ok(())
}
