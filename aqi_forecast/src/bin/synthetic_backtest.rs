use aqi_forecast::synthetic::SyntheticAqi;
use aqi_forecast::tables::{comparison_frame, detail_frame, forecast_frame, summary_frame, write_csv};
use aqi_forecast::{ForecastConfig, ForecastError, ForecastPipeline, Parameter, Result};
use chrono::{TimeZone, Utc};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Sixty days of hourly data
const HOURS: usize = 24 * 60;

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "aqi_forecast=info,synthetic_backtest=info".into()),
        )
        .init();

    // Optional output directory for CSV tables
    let out_dir = std::env::args().nth(1).map(PathBuf::from);

    let start = Utc
        .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .ok_or_else(|| ForecastError::InvalidParameter("Invalid start time".to_string()))?;
    let generator = SyntheticAqi {
        missing_rate: 0.02,
        ..SyntheticAqi::default()
    };
    let records = generator.observations("Denver", "CO", Parameter::O3, start, HOURS)?;
    info!("Generated {} synthetic observations", records.len());

    let mut config = ForecastConfig::default();
    config.horizons = vec![24, 48, 72];
    config.model.n_estimators = 60;
    config.model.forest_trees = 30;
    config.backtest.n_folds = 3;
    config.backtest.min_train_days = 30;
    config.blend.enabled = true;

    let pipeline = ForecastPipeline::new(config)?;
    let output = pipeline.run(&records, "Denver, CO", Parameter::O3, None)?;

    let mut forecasts = forecast_frame(&output.forecasts)?;
    println!("Forecasts\n{}", forecasts);

    if let Some(report) = &output.backtest {
        let mut summary = summary_frame(&report.summary)?;
        let mut detail = detail_frame(&report.detail)?;
        let mut comparison = comparison_frame(&report.comparison())?;
        println!("Backtest summary\n{}", summary);
        println!("Model vs baselines\n{}", comparison);

        if let Some(dir) = &out_dir {
            std::fs::create_dir_all(dir)?;
            write_csv(&mut summary, dir.join("backtest_summary.csv"))?;
            write_csv(&mut detail, dir.join("backtest_detail.csv"))?;
            write_csv(&mut comparison, dir.join("backtest_comparison.csv"))?;
        }
    }

    if let Some(anatomy) = &output.anatomy {
        for alert in &anatomy.regime_alerts {
            println!(
                "Regime alert at {}h: recent MAE {:.2} > historical p90 {:.2}",
                alert.horizon_h, alert.recent_mae, alert.historical_p90
            );
        }
    }

    println!(
        "Blend weights: global {:.2}, local {:.2}",
        output.blend.global, output.blend.local
    );

    if let Some(dir) = &out_dir {
        std::fs::create_dir_all(dir)?;
        write_csv(&mut forecasts, dir.join("forecast.csv"))?;
        output.bundle.save(dir.join("bundle.json"))?;
        info!("Wrote tables and bundle to {}", dir.display());
    }

    Ok(())
}
