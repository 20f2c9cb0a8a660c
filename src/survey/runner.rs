//! One run of the instrument over a plan's targets.

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::artifacts::{ArtifactSink, CsvArtifacts, NoArtifacts};
use super::iterators::{Repeat, TargetDescriptor};
use super::record::{ObservationRecord, ObservationTable};
use crate::config::{Settings, SurveyConfig};
use crate::coords::spherical::directional_offset;
use crate::coords::{velocity_axis, CoordinateTransform, HorizontalPosition};
use crate::error::{AppResult, ScanError};
use crate::hardware::Station;
use crate::storage::{FilePersistence, Persistence};

/// Timing and acquisition parameters of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyParams {
    pub integration: Duration,
    pub gain_db: f64,
    /// Zero disables dark-sky calibration
    pub dark_sky_offset_deg: f64,
    pub horizon_margin_deg: f64,
    pub reference_frequency_hz: Option<f64>,
    /// Receiver tuning applied before the first target, if set
    pub center_frequency_hz: Option<f64>,
    pub bandwidth_hz: Option<f64>,
    /// Settle after a short slew between neighbouring targets
    pub settle: Duration,
    /// Settle after the first slew, or after skipping targets
    pub long_settle: Duration,
}

impl SurveyParams {
    pub fn from_config(config: &SurveyConfig) -> Self {
        Self {
            integration: Duration::from_secs_f64(config.integration_secs.max(0.0)),
            gain_db: config.gain_db,
            dark_sky_offset_deg: config.dark_sky_offset_deg,
            horizon_margin_deg: config.horizon_margin_deg,
            reference_frequency_hz: config.reference_frequency_hz,
            center_frequency_hz: None,
            bandwidth_hz: None,
            settle: config.settle(),
            long_settle: config.long_settle(),
        }
    }

    pub fn dark_sky_enabled(&self) -> bool {
        self.dark_sky_offset_deg != 0.0
    }
}

impl Default for SurveyParams {
    fn default() -> Self {
        Self::from_config(&SurveyConfig::default())
    }
}

/// Lifecycle of a [`Survey`]. Both terminal states go through persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SurveyState {
    Planned,
    Running,
    Completed,
    Aborted,
}

impl SurveyState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SurveyState::Completed | SurveyState::Aborted)
    }
}

/// Named set of horizontal positions for the sky map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinateGroup {
    pub name: String,
    pub positions: Vec<HorizontalPosition>,
}

/// Point-in-time view of a survey for status displays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyProgress {
    /// Lifecycle state at the time of the read
    pub state: SurveyState,
    /// Records collected so far, calibration rows included
    pub observed: usize,
    /// Targets passed over as unreachable
    pub skipped: usize,
    /// Time since the run started, zero while planned
    pub elapsed: Duration,
    /// Label of the target being worked on
    pub current: Option<String>,
}

/// How a finished run ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyOutcome {
    /// Completed or Aborted
    pub state: SurveyState,
    /// Rows collected, calibration rows included
    pub records: usize,
    /// Targets passed over as unreachable
    pub skipped: usize,
    /// False when nothing was collected and persistence was skipped
    pub persisted: bool,
}

#[derive(Debug)]
struct RunState {
    state: SurveyState,
    started: Option<Instant>,
    finished: Option<Duration>,
    current: Option<String>,
    observed: Vec<HorizontalPosition>,
    skipped: Vec<HorizontalPosition>,
}

impl RunState {
    fn new() -> Self {
        Self {
            state: SurveyState::Planned,
            started: None,
            finished: None,
            current: None,
            observed: Vec::new(),
            skipped: Vec::new(),
        }
    }
}

/// A planned run: targets, parameters, and where the results go.
///
/// `run` executes at most once. `abort` may be called from any thread while it
/// runs; the loop notices it before the next pointing.
pub struct Survey {
    targets: Repeat,
    params: SurveyParams,
    output_dir: PathBuf,
    persistence: Arc<dyn Persistence>,
    artifacts: Arc<dyn ArtifactSink>,
    abort_requested: AtomicBool,
    run_state: Mutex<RunState>,
}

impl Survey {
    /// A survey writing tables and CSV artifacts into `output_dir`.
    pub fn new(targets: Repeat, params: SurveyParams, output_dir: impl Into<PathBuf>) -> Self {
        let output_dir = output_dir.into();
        Self {
            targets,
            params,
            artifacts: Arc::new(CsvArtifacts::new(output_dir.clone())),
            output_dir,
            persistence: Arc::new(FilePersistence::default()),
            abort_requested: AtomicBool::new(false),
            run_state: Mutex::new(RunState::new()),
        }
    }

    /// Apply the storage section of `settings`.
    pub fn with_storage_settings(self, settings: &Settings) -> Self {
        let survey = self.with_persistence(Arc::new(FilePersistence::from_config(&settings.storage)));
        if settings.storage.write_artifacts {
            survey
        } else {
            survey.with_artifacts(Arc::new(NoArtifacts))
        }
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = persistence;
        self
    }

    pub fn with_artifacts(mut self, artifacts: Arc<dyn ArtifactSink>) -> Self {
        self.artifacts = artifacts;
        self
    }

    pub fn targets(&self) -> &Repeat {
        &self.targets
    }

    pub fn params(&self) -> &SurveyParams {
        &self.params
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn state(&self) -> SurveyState {
        self.run_state.lock().state
    }

    /// Ask the run loop to stop before its next pointing. One-way.
    pub fn abort(&self) {
        if !self.abort_requested.swap(true, Ordering::SeqCst) {
            info!(output = %self.output_dir.display(), "Survey abort requested");
        }
    }

    pub fn is_abort_requested(&self) -> bool {
        self.abort_requested.load(Ordering::SeqCst)
    }

    pub fn progress(&self) -> SurveyProgress {
        let run = self.run_state.lock();
        let elapsed = match (run.finished, run.started) {
            (Some(total), _) => total,
            (None, Some(started)) => started.elapsed(),
            (None, None) => Duration::ZERO,
        };
        SurveyProgress {
            state: run.state,
            observed: run.observed.len(),
            skipped: run.skipped.len(),
            elapsed,
            current: run.current.clone(),
        }
    }

    /// Planned, observed and skipped positions for the sky map.
    ///
    /// Planned positions are resolved at `sky.now()`.
    pub fn coordinate_groups(&self, sky: &dyn CoordinateTransform) -> Vec<CoordinateGroup> {
        let now = sky.now();
        let planned = self
            .targets
            .coordinates(sky)
            .map(|t| sky.to_horizontal(&t.position, now))
            .collect();
        let run = self.run_state.lock();
        vec![
            CoordinateGroup {
                name: "planned".to_string(),
                positions: planned,
            },
            CoordinateGroup {
                name: "observed".to_string(),
                positions: run.observed.clone(),
            },
            CoordinateGroup {
                name: "skipped".to_string(),
                positions: run.skipped.clone(),
            },
        ]
    }

    /// Estimated duration of the whole plan if started now.
    ///
    /// Counts targets above the horizon margin at `sky.now()`, doubled with
    /// dark-sky calibration, times integration plus settle.
    pub fn time_remaining(&self, sky: &dyn CoordinateTransform) -> Duration {
        let now = sky.now();
        let visible = self
            .targets
            .coordinates(sky)
            .filter(|t| sky.to_horizontal(&t.position, now).elevation >= self.params.horizon_margin_deg)
            .count();
        let per_target = if self.params.dark_sky_enabled() { 2 } else { 1 };
        let count = u32::try_from(visible * per_target).unwrap_or(u32::MAX);
        (self.params.integration + self.params.settle) * count
    }

    /// Execute the plan against `station`.
    ///
    /// Whatever was collected is persisted before returning, including after a
    /// hardware failure, which is then returned as [`ScanError::Hardware`].
    pub async fn run(&self, station: &Station) -> AppResult<SurveyOutcome> {
        {
            let mut run = self.run_state.lock();
            if run.state != SurveyState::Planned {
                return Err(ScanError::Validation(format!(
                    "survey writing to {} has already run",
                    self.output_dir.display()
                )));
            }
            run.state = SurveyState::Running;
            run.started = Some(Instant::now());
        }
        info!(
            plan = %self.targets,
            targets = self.targets.len(),
            estimate_secs = self.time_remaining(station.sky.as_ref()).as_secs(),
            "Starting survey"
        );

        let mut table = ObservationTable::new();
        let collected = self.collect(station, &mut table).await;

        let state = if collected.is_ok() && !self.is_abort_requested() {
            SurveyState::Completed
        } else {
            SurveyState::Aborted
        };
        let persisted = self.finish(&table).await;

        let skipped = {
            let mut run = self.run_state.lock();
            run.state = state;
            run.current = None;
            run.finished = run.started.map(|s| s.elapsed());
            run.skipped.len()
        };
        info!(?state, records = table.len(), skipped, "Survey finished");

        match (collected, persisted) {
            (Err(e), persisted) => {
                if let Err(pe) = persisted {
                    error!(error = %pe, "Could not persist partial survey results");
                }
                Err(e)
            }
            (Ok(()), Err(pe)) => Err(pe),
            (Ok(()), Ok(persisted)) => Ok(SurveyOutcome {
                state,
                records: table.len(),
                skipped,
                persisted,
            }),
        }
    }

    async fn collect(&self, station: &Station, table: &mut ObservationTable) -> AppResult<()> {
        let spectrometer = station.spectrometer();
        if let Some(hz) = self.params.center_frequency_hz {
            spectrometer
                .set_center_frequency(hz)
                .await
                .map_err(|e| ScanError::hardware("set_center_frequency", e))?;
        }
        if let Some(hz) = self.params.bandwidth_hz {
            spectrometer
                .set_bandwidth(hz)
                .await
                .map_err(|e| ScanError::hardware("set_bandwidth", e))?;
        }
        spectrometer
            .set_gain(self.params.gain_db)
            .await
            .map_err(|e| ScanError::hardware("set_gain", e))?;

        let sky = station.sky.as_ref();
        let mut long_settle = true;

        for target in self.targets.coordinates(sky) {
            if self.is_abort_requested() {
                info!("Survey aborted before next target");
                break;
            }
            let label = self.targets.format_label(&target);
            self.run_state.lock().current = Some(label.clone());

            let Some(record) = self
                .observe_at(station, &target, false, &mut long_settle, table.len() as u64)
                .await?
            else {
                continue;
            };
            let stem = self.targets.format_filename_stem(&target);
            if let Err(e) = self.artifacts.observation(&stem, &label, &record) {
                warn!(error = %e, label = %label, "Could not write observation artifacts");
            }
            table.push(record);

            if self.params.dark_sky_enabled() {
                if self.is_abort_requested() {
                    info!("Survey aborted before dark-sky calibration");
                    break;
                }
                let dark = TargetDescriptor {
                    position: directional_offset(&target.position, 0.0, self.params.dark_sky_offset_deg),
                    ..target
                };
                if let Some(record) = self
                    .observe_at(station, &dark, true, &mut long_settle, table.len() as u64)
                    .await?
                {
                    table.push(record);
                }
            }
        }
        Ok(())
    }

    /// Point at one target and integrate. `None` when it is below the
    /// horizon margin.
    async fn observe_at(
        &self,
        station: &Station,
        target: &TargetDescriptor,
        is_reference: bool,
        long_settle: &mut bool,
        seq: u64,
    ) -> AppResult<Option<ObservationRecord>> {
        let sky = station.sky.as_ref();
        let commanded = sky.to_horizontal(&target.position, sky.now());
        if commanded.elevation < self.params.horizon_margin_deg {
            info!(
                position = %target.position,
                el = commanded.elevation,
                margin = self.params.horizon_margin_deg,
                is_reference,
                "Target below horizon margin, skipping"
            );
            self.run_state.lock().skipped.push(commanded);
            *long_settle = true;
            return Ok(None);
        }

        info!(
            position = %target.position,
            az = commanded.azimuth,
            el = commanded.elevation,
            is_reference,
            "Pointing"
        );
        station
            .mount
            .point(commanded.azimuth, commanded.elevation)
            .await
            .map_err(|e| ScanError::hardware(&format!("point{commanded}"), e))?;

        let settle = if *long_settle {
            self.params.long_settle
        } else {
            self.params.settle
        };
        *long_settle = false;
        tokio::time::sleep(settle).await;

        debug!(integration = ?self.params.integration, "Observing");
        let timestamp = Utc::now();
        let data = station
            .pipeline
            .observe(self.params.integration)
            .await
            .map_err(|e| ScanError::hardware("observe", e))?;
        let actual = station
            .mount
            .position()
            .await
            .map_err(|e| ScanError::hardware("position", e))?;

        let at = sky.now();
        let spectrometer = station.spectrometer();
        let frequencies = spectrometer.channel_frequencies();
        let galactic = sky.to_galactic(&target.position, at);
        let velocities = self
            .params
            .reference_frequency_hz
            .map(|f0| velocity_axis(f0, &frequencies, galactic.lon));

        self.run_state.lock().observed.push(actual);
        Ok(Some(ObservationRecord {
            seq,
            mode: self.targets.inner().mode().to_string(),
            gain_db: spectrometer.gain(),
            center_frequency_hz: spectrometer.center_frequency(),
            frequencies,
            data,
            timestamp,
            commanded,
            actual,
            target: target.position,
            equatorial: sky.to_equatorial(&target.position, at),
            galactic,
            velocities,
            weather: sky.environment(),
            is_reference,
            pass: target.pass,
        }))
    }

    /// Hand the table to persistence once, then regenerate the summary.
    /// Returns whether anything was written.
    async fn finish(&self, table: &ObservationTable) -> AppResult<bool> {
        if table.is_empty() {
            warn!(
                output = %self.output_dir.display(),
                "Survey produced no observations, leaving previous results in place"
            );
            return Ok(false);
        }
        self.persistence.write(table, &self.output_dir).await?;
        if let Err(e) = self.artifacts.summary(table) {
            warn!(error = %e, "Could not write survey summary");
        }
        Ok(true)
    }
}

impl std::fmt::Debug for Survey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Survey")
            .field("targets", &self.targets)
            .field("params", &self.params)
            .field("output_dir", &self.output_dir)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SiteConfig;
    use crate::coords::{RefractionEnvironment, SiteTransform};
    use crate::hardware::mock::{MockMount, MockSpectrometer};
    use crate::hardware::Pipeline;
    use crate::survey::{AzimuthSweep, Sweep, TargetIterator};
    use tracing_test::traced_test;

    fn station() -> Station {
        let spectrometer = Arc::new(MockSpectrometer::new(1420.406e6, 2.4e6, 8));
        Station::new(
            Arc::new(MockMount::instant()),
            Arc::new(Pipeline::new(spectrometer)),
            Arc::new(SiteTransform::new(
                SiteConfig::default(),
                RefractionEnvironment::new(),
            )),
        )
    }

    fn low_sweep() -> Repeat {
        let sweep = AzimuthSweep {
            azimuths: Sweep::new(0.0, 90.0, 90.0).unwrap(),
            elevation: -5.0,
        };
        Repeat::new(TargetIterator::AzimuthSweep(sweep), 1)
    }

    #[test]
    fn params_follow_survey_config() {
        let config = SurveyConfig {
            integration_secs: 12.5,
            dark_sky_offset_deg: 3.0,
            ..SurveyConfig::default()
        };
        let params = SurveyParams::from_config(&config);
        assert_eq!(params.integration, Duration::from_millis(12_500));
        assert_eq!(params.settle, Duration::from_secs(2));
        assert_eq!(params.long_settle, Duration::from_secs(10));
        assert!(params.dark_sky_enabled());
        assert!(!SurveyParams::default().dark_sky_enabled());
    }

    #[tokio::test]
    #[traced_test]
    async fn skipped_targets_are_logged_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let station = station();
        station.pipeline.ensure_started().await.unwrap();
        let survey = Survey::new(low_sweep(), SurveyParams::default(), dir.path())
            .with_artifacts(Arc::new(NoArtifacts));

        let outcome = survey.run(&station).await.unwrap();

        assert_eq!(outcome.state, SurveyState::Completed);
        assert_eq!(outcome.skipped, 2);
        assert!(!outcome.persisted);
        assert!(logs_contain("Target below horizon margin, skipping"));
        assert!(logs_contain("Survey produced no observations"));
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn abort_is_idempotent_and_visible() {
        let survey = Survey::new(low_sweep(), SurveyParams::default(), "unused");
        assert!(!survey.is_abort_requested());
        survey.abort();
        survey.abort();
        assert!(survey.is_abort_requested());
        assert_eq!(survey.state(), SurveyState::Planned);
        assert!(!survey.state().is_terminal());
    }
}
