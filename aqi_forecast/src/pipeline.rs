//! End-to-end run for one city and pollutant

use crate::backtest::{BacktestEngine, BacktestReport};
use crate::blend::{BlendWeights, LocalBlender};
use crate::bundle::ModelBundle;
use crate::calibration::IntervalCalibrator;
use crate::config::ForecastConfig;
use crate::data::{CleanSeries, Parameter, RawObservation, WeatherSeries};
use crate::diagnostics::ErrorAnatomy;
use crate::error::{ForecastError, Result};
use crate::forecast::{ForecastEngine, ForecastRow};
use crate::normalize::TimeSeriesNormalizer;
use crate::orchestrator::MultiHorizonOrchestrator;
use tracing::{info, warn};

/// Everything a pipeline run produces
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub series: CleanSeries,
    pub bundle: ModelBundle,
    /// Final rows after calibration and blending
    pub forecasts: Vec<ForecastRow>,
    /// `None` when backtesting was switched off
    pub backtest: Option<BacktestReport>,
    pub anatomy: Option<ErrorAnatomy>,
    pub blend: BlendWeights,
}

/// normalize, train, forecast, then optionally backtest, calibrate and blend
#[derive(Debug)]
pub struct ForecastPipeline {
    config: ForecastConfig,
    run_backtest: bool,
}

impl ForecastPipeline {
    pub fn new(config: ForecastConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            run_backtest: true,
        })
    }

    /// Skip or enable the backtest (and with it interval calibration)
    pub fn with_backtest(mut self, enabled: bool) -> Self {
        self.run_backtest = enabled;
        self
    }

    pub fn config(&self) -> &ForecastConfig {
        &self.config
    }

    /// Run from raw records
    pub fn run(
        &self,
        raw: &[RawObservation],
        city: &str,
        parameter: Parameter,
        weather: Option<&WeatherSeries>,
    ) -> Result<PipelineOutput> {
        let normalizer = TimeSeriesNormalizer::new(self.config.normalize.clone());
        let series = normalizer.normalize(raw, city, parameter)?;
        self.run_series(series, weather)
    }

    /// Run from an already clean series
    pub fn run_series(&self, series: CleanSeries, weather: Option<&WeatherSeries>) -> Result<PipelineOutput> {
        let horizons = &self.config.horizons;
        let city_meta = series.city_meta();

        let orchestrator = MultiHorizonOrchestrator::new(&self.config);
        let bundle = orchestrator.train_all(&series, horizons, city_meta.as_ref(), weather)?;
        if bundle.is_empty() {
            return Err(ForecastError::ModelFit(format!(
                "No horizon could be trained for {} {}",
                series.city_key, series.parameter
            )));
        }

        let engine = ForecastEngine::new(&self.config);
        let mut forecasts = engine.forecast_with(&series, &bundle, horizons, city_meta.as_ref(), weather)?;

        let (backtest, anatomy) = if self.run_backtest {
            let report = BacktestEngine::new(&self.config).run(&series, horizons, city_meta.as_ref())?;
            if report.is_empty() {
                warn!("Backtest not feasible for {}, intervals left uncalibrated", series.city_key);
                (Some(report), None)
            } else {
                let coverage = report.coverage_by_horizon();
                let calibrator =
                    IntervalCalibrator::new(self.config.calibration.clone(), self.config.engine.aqi_ceiling);
                forecasts = calibrator.adjust(&forecasts, &coverage);
                let anatomy = ErrorAnatomy::from_detail(&report.detail);
                (Some(report), Some(anatomy))
            }
        } else {
            (None, None)
        };

        let blender = LocalBlender::new(self.config.blend.clone(), self.config.engine.aqi_ceiling);
        let blended = blender.blend(&forecasts, &series);

        info!(
            "Forecast ready for {} {}: {} horizons",
            series.city_key,
            series.parameter,
            blended.rows.len()
        );
        Ok(PipelineOutput {
            series,
            bundle,
            forecasts: blended.rows,
            backtest,
            anatomy,
            blend: blended.weights,
        })
    }
}
