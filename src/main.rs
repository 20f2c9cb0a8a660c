//! gal-scan batch front end.
//!
//! Runs exactly one survey against the simulated station and writes the
//! observation table to the given output directory. Nothing is queued: the
//! survey runs directly, and Ctrl-C aborts it between targets.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use gal_scan::coords::{RefractionEnvironment, SiteTransform, WeatherReading};
use gal_scan::hardware::mock::{MockMount, MockSpectrometer};
use gal_scan::hardware::{Pipeline, Station};
use gal_scan::survey::{Repeat, Survey, SurveyState};
use gal_scan::{logging, weather, PlanArgs, Settings};

#[derive(Parser, Debug)]
#[command(name = "gal-scan", version, about = "Run one hydrogen-line survey")]
struct Cli {
    /// Directory receiving the observation table and artifacts
    output_dir: PathBuf,

    /// Settings file
    #[arg(long, value_name = "PATH", default_value = "galscan.toml")]
    config: PathBuf,

    /// Scale applied to integration and settle times of the simulated station
    #[arg(long, value_name = "FACTOR", default_value_t = 1.0)]
    time_scale: f64,

    /// Simulated mount slew speed in degrees per second
    #[arg(long, value_name = "DEG_PER_SEC", default_value_t = 10.0)]
    slew_speed: f64,

    /// Initial weather reading as TEMP_F,HUMIDITY_PCT,PRESSURE_MBAR
    #[arg(long, value_name = "READING", value_parser = parse_weather)]
    weather: Option<WeatherReading>,

    /// Print the plan and estimated duration, then exit
    #[arg(long)]
    dry_run: bool,

    #[command(flatten)]
    plan: PlanArgs,
}

fn parse_weather(s: &str) -> Result<WeatherReading, String> {
    let fields: Vec<f64> = s
        .split(',')
        .map(|f| f.trim().parse::<f64>().map_err(|e| format!("'{f}': {e}")))
        .collect::<Result<_, _>>()?;
    match fields.as_slice() {
        [temperature_f, humidity, pressure] => {
            let reading = WeatherReading::from_imperial(*temperature_f, *humidity, *pressure);
            if reading.is_plausible() {
                Ok(reading)
            } else {
                Err(format!("implausible reading {s}"))
            }
        }
        _ => Err("expected TEMP_F,HUMIDITY_PCT,PRESSURE_MBAR".to_string()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if !(cli.time_scale >= 0.0 && cli.time_scale.is_finite()) {
        bail!("--time-scale must be a non-negative number");
    }

    let settings = Settings::load_from(&cli.config)
        .with_context(|| format!("loading settings from {}", cli.config.display()))?;
    let _log_buffer = logging::init(&settings.logging);

    let mut params = cli.plan.survey_params(&settings)?;
    params.settle = params.settle.mul_f64(cli.time_scale);
    params.long_settle = params.long_settle.mul_f64(cli.time_scale);
    let targets = Repeat::new(cli.plan.target_iterator()?, cli.plan.repeat_count(&settings)?);
    let survey = Arc::new(
        Survey::new(targets, params, &cli.output_dir).with_storage_settings(&settings),
    );

    let environment = RefractionEnvironment::new();
    let (weather_tx, weather_task) = weather::spawn_listener(environment.clone());
    if let Some(reading) = cli.weather {
        weather_tx.send(reading).await?;
    }

    let spectrometer = MockSpectrometer::new(
        settings.receiver.center_frequency_hz,
        settings.receiver.bandwidth_hz,
        settings.receiver.channels,
    )
    .with_time_scale(cli.time_scale);
    let station = Station::new(
        Arc::new(MockMount::with_speed(cli.slew_speed)),
        Arc::new(Pipeline::new(Arc::new(spectrometer))),
        Arc::new(SiteTransform::new(settings.site.clone(), environment)),
    );

    info!(
        plan = %survey.targets(),
        targets = survey.targets().len(),
        output = %cli.output_dir.display(),
        "Planned survey"
    );
    let estimate = survey.time_remaining(station.sky.as_ref());
    info!(estimate_secs = estimate.as_secs(), "Estimated duration");
    if cli.dry_run {
        println!("{}", survey.targets());
        println!("estimated duration: {}s", estimate.as_secs());
        return Ok(());
    }

    let abort_handle = survey.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, aborting after the current target");
            abort_handle.abort();
        }
    });

    station.pipeline.ensure_started().await?;
    let result = survey.run(&station).await;
    if let Err(err) = station.pipeline.shutdown().await {
        warn!("Failed to stop pipeline: {err:#}");
    }

    drop(weather_tx);
    weather_task.await?;

    let outcome = result?;
    info!(
        records = outcome.records,
        skipped = outcome.skipped,
        persisted = outcome.persisted,
        "Survey finished"
    );
    if outcome.state == SurveyState::Aborted {
        bail!("survey aborted after {} records", outcome.records);
    }
    Ok(())
}
