//! Operator plans.
//!
//! [`PlanArgs`] is the one parameter set shared by the command line, the
//! operator API and saved plan files. Unset fields fall back to [`Settings`].
//! [`PlanArgs::build`] validates everything up front so a bad plan is rejected
//! before anything is queued.

use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::Settings;
use crate::coords::{lookup_named_object, Body, Frame, SkyPosition};
use crate::error::{AppResult, ScanError};
use crate::survey::{
    AzimuthSweep, BodyRelativeGrid, Lattice, LongitudeSweep, Repeat, SkyGrid, Survey,
    SurveyParams, Sweep, TargetIterator,
};

const DEFAULT_START: f64 = 0.0;
const DEFAULT_STOP: f64 = 360.0;
const DEFAULT_STEP: f64 = 2.5;
const DEFAULT_ELEVATION: f64 = 45.0;

/// Survey type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// Galactic longitude sweep
    #[default]
    Gal,
    /// Azimuth sweep at fixed elevation
    Az,
    /// Grid about a named object or galactic position
    Grid,
    /// Grid about the Sun or Moon
    #[value(alias = "solar_grid")]
    #[serde(alias = "solar_grid")]
    SolarGrid,
}

/// Plan parameters.
#[derive(Debug, Clone, Default, PartialEq, Args, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanArgs {
    /// Integration time [default: from settings]
    #[arg(long = "int-time", value_name = "SECONDS", help_heading = "General")]
    pub int_time: Option<f64>,

    /// SDR gain in dB [default: from settings]
    #[arg(long, value_name = "DB", help_heading = "General")]
    pub gain: Option<f64>,

    /// Number of times to repeat the scan
    #[arg(long, help_heading = "General")]
    pub repeat: Option<u32>,

    /// Center frequency
    #[arg(long = "sdr-frequency", value_name = "HZ", help_heading = "RF")]
    pub sdr_frequency: Option<f64>,

    /// Filter bandwidth
    #[arg(long, value_name = "HZ", help_heading = "RF")]
    pub bandwidth: Option<f64>,

    /// Survey type
    #[arg(long, value_enum, default_value_t = Mode::Gal, help_heading = "Iterator")]
    pub mode: Mode,

    /// Sweep start, or first grid offset [default: 0]
    #[arg(long, allow_negative_numbers = true, help_heading = "Iterator")]
    pub start: Option<f64>,

    /// Sweep end, or last grid offset [default: 360]
    #[arg(long, allow_negative_numbers = true, help_heading = "Iterator")]
    pub stop: Option<f64>,

    /// Sweep step [default: 2.5]
    #[arg(long, help_heading = "Iterator")]
    pub step: Option<f64>,

    /// Dark-sky calibration offset in degrees, 0 to disable
    #[arg(long = "darksky-offset", value_name = "DEG", allow_negative_numbers = true, help_heading = "Iterator")]
    pub darksky_offset: Option<f64>,

    /// Fixed elevation for azimuth sweeps [default: 45]
    #[arg(long, value_name = "DEG", help_heading = "mode=az")]
    pub elevation: Option<f64>,

    /// Named object at the grid center
    #[arg(long = "obj-name", help_heading = "mode=grid")]
    pub obj_name: Option<String>,

    /// Galactic latitude: grid center, or the latitude of a galactic sweep
    #[arg(long, value_name = "DEG", allow_negative_numbers = true, help_heading = "mode=grid")]
    pub lat: Option<f64>,

    /// Galactic longitude of the grid center
    #[arg(long, value_name = "DEG", allow_negative_numbers = true, help_heading = "mode=grid")]
    pub lon: Option<f64>,

    /// Grid rotation
    #[arg(long, value_name = "DEG", allow_negative_numbers = true, help_heading = "mode=grid")]
    pub rotation: Option<f64>,

    /// Grid rotation frame (icrs or galactic) [default: icrs]
    #[arg(long = "rotation-frame", help_heading = "mode=grid")]
    pub rotation_frame: Option<Frame>,

    /// Solar system body (sun or moon) [default: sun]
    #[arg(long = "body-name", help_heading = "mode=solar-grid")]
    pub body_name: Option<String>,
}

impl PlanArgs {
    /// The pointing sequence this plan describes.
    pub fn target_iterator(&self) -> AppResult<TargetIterator> {
        let sweep = Sweep::new(
            self.start.unwrap_or(DEFAULT_START),
            self.stop.unwrap_or(DEFAULT_STOP),
            self.step.unwrap_or(DEFAULT_STEP),
        )?;

        let lattice = || {
            Lattice::new(
                sweep,
                self.rotation.unwrap_or(0.0),
                self.rotation_frame.unwrap_or(Frame::Equatorial),
            )
        };

        Ok(match self.mode {
            Mode::Gal => TargetIterator::LongitudeSweep(LongitudeSweep {
                longitudes: sweep,
                latitude: self.lat.unwrap_or(0.0),
            }),
            Mode::Az => {
                let elevation = self.elevation.unwrap_or(DEFAULT_ELEVATION);
                if !(-90.0..=90.0).contains(&elevation) {
                    return Err(ScanError::Validation(format!(
                        "elevation {elevation} is outside [-90, 90]"
                    )));
                }
                TargetIterator::AzimuthSweep(AzimuthSweep {
                    azimuths: sweep,
                    elevation,
                })
            }
            Mode::Grid => {
                let (anchor, anchor_name) = match (&self.obj_name, self.lon, self.lat) {
                    (Some(name), _, _) => (lookup_named_object(name)?, Some(name.clone())),
                    (None, Some(l), Some(b)) => (SkyPosition::galactic(l, b), None),
                    _ => {
                        return Err(ScanError::Validation(
                            "grid mode needs --obj-name or both --lon and --lat".to_string(),
                        ))
                    }
                };
                TargetIterator::SkyGrid(SkyGrid {
                    anchor,
                    anchor_name,
                    lattice: lattice()?,
                })
            }
            Mode::SolarGrid => {
                let body: Body = self.body_name.as_deref().unwrap_or("sun").parse()?;
                TargetIterator::BodyRelativeGrid(BodyRelativeGrid {
                    body,
                    lattice: lattice()?,
                })
            }
        })
    }

    /// Run parameters, with unset fields taken from `settings`.
    pub fn survey_params(&self, settings: &Settings) -> AppResult<SurveyParams> {
        let bandwidth = self.bandwidth.unwrap_or(settings.receiver.bandwidth_hz);
        if bandwidth > settings.receiver.max_bandwidth_hz {
            return Err(ScanError::Validation(format!(
                "bandwidth must be <{:e}",
                settings.receiver.max_bandwidth_hz
            )));
        }
        if bandwidth <= 0.0 {
            return Err(ScanError::Validation(
                "bandwidth must be positive".to_string(),
            ));
        }

        let int_time = self.int_time.unwrap_or(settings.survey.integration_secs);
        if !(int_time.is_finite() && int_time > 0.0) {
            return Err(ScanError::Validation(format!(
                "integration time must be positive, got {int_time}"
            )));
        }

        let mut params = SurveyParams::from_config(&settings.survey);
        params.integration = Duration::from_secs_f64(int_time);
        params.gain_db = self.gain.unwrap_or(settings.survey.gain_db);
        params.dark_sky_offset_deg = self
            .darksky_offset
            .unwrap_or(settings.survey.dark_sky_offset_deg);
        params.center_frequency_hz = Some(
            self.sdr_frequency
                .unwrap_or(settings.receiver.center_frequency_hz),
        );
        params.bandwidth_hz = Some(bandwidth);
        Ok(params)
    }

    pub fn repeat_count(&self, settings: &Settings) -> AppResult<u32> {
        match self.repeat.unwrap_or(settings.survey.repeat) {
            0 => Err(ScanError::Validation(
                "repeat must be at least 1".to_string(),
            )),
            n => Ok(n),
        }
    }

    /// Validate and assemble a [`Survey`] writing into `output_dir`.
    pub fn build(&self, settings: &Settings, output_dir: impl Into<PathBuf>) -> AppResult<Survey> {
        let targets = Repeat::new(self.target_iterator()?, self.repeat_count(settings)?);
        let params = self.survey_params(settings)?;
        Ok(Survey::new(targets, params, output_dir).with_storage_settings(settings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        plan: PlanArgs,
    }

    fn parse(args: &[&str]) -> PlanArgs {
        Cli::parse_from(std::iter::once("gal-scan").chain(args.iter().copied())).plan
    }

    #[test]
    fn defaults_follow_settings() {
        let settings = Settings::default();
        let survey = PlanArgs::default().build(&settings, "out").unwrap();
        assert_eq!(survey.targets().len(), 145);
        assert_eq!(survey.targets().inner().mode(), "gal");
        assert_eq!(survey.params().integration, Duration::from_secs(30));
        assert!(!survey.params().dark_sky_enabled());
    }

    #[test]
    fn cli_flags_parse() {
        let plan = parse(&[
            "--mode",
            "solar_grid",
            "--start",
            "-2",
            "--stop",
            "2",
            "--step",
            "1",
            "--body-name",
            "moon",
            "--rotation-frame",
            "galactic",
            "--darksky-offset",
            "5",
            "--int-time",
            "10",
        ]);
        assert_eq!(plan.mode, Mode::SolarGrid);
        assert_eq!(plan.start, Some(-2.0));
        assert_eq!(plan.rotation_frame, Some(Frame::Galactic));

        let survey = plan.build(&Settings::default(), "out").unwrap();
        assert_eq!(survey.targets().len(), 25);
        assert_eq!(survey.params().dark_sky_offset_deg, 5.0);
        assert!(matches!(
            survey.targets().inner(),
            TargetIterator::BodyRelativeGrid(BodyRelativeGrid { body: Body::Moon, .. })
        ));
    }

    #[test]
    fn bandwidth_above_ceiling_is_rejected() {
        let plan = PlanArgs {
            bandwidth: Some(6e6),
            ..Default::default()
        };
        let err = plan.build(&Settings::default(), "out").unwrap_err();
        assert!(matches!(err, ScanError::Validation(ref m) if m.contains("bandwidth")));
    }

    #[test]
    fn unknown_body_is_rejected() {
        let plan = PlanArgs {
            mode: Mode::SolarGrid,
            body_name: Some("pluto".into()),
            ..Default::default()
        };
        assert!(matches!(
            plan.build(&Settings::default(), "out"),
            Err(ScanError::Validation(_))
        ));
    }

    #[test]
    fn grid_needs_an_anchor() {
        let plan = PlanArgs {
            mode: Mode::Grid,
            lon: Some(30.0),
            ..Default::default()
        };
        assert!(plan.build(&Settings::default(), "out").is_err());

        let named = PlanArgs {
            mode: Mode::Grid,
            obj_name: Some("Cas A".into()),
            start: Some(-1.0),
            stop: Some(1.0),
            step: Some(1.0),
            ..Default::default()
        };
        let survey = named.build(&Settings::default(), "out").unwrap();
        assert_eq!(survey.targets().len(), 9);

        let unknown = PlanArgs {
            obj_name: Some("nowhere".into()),
            ..named
        };
        assert!(unknown.build(&Settings::default(), "out").is_err());
    }

    #[test]
    fn zero_step_and_repeat_are_rejected() {
        let step = PlanArgs {
            step: Some(0.0),
            ..Default::default()
        };
        assert!(step.build(&Settings::default(), "out").is_err());

        let repeat = PlanArgs {
            repeat: Some(0),
            ..Default::default()
        };
        assert!(repeat.build(&Settings::default(), "out").is_err());
    }

    #[test]
    fn oversized_grid_is_rejected() {
        let plan = PlanArgs {
            mode: Mode::Grid,
            obj_name: Some("Cas A".into()),
            start: Some(-10.0),
            stop: Some(10.0),
            step: Some(0.01),
            ..Default::default()
        };
        let err = plan.build(&Settings::default(), "out").unwrap_err();
        assert!(matches!(err, ScanError::Validation(ref m) if m.contains("exceeds")));
    }

    #[test]
    fn plans_load_from_json() {
        let plan: PlanArgs =
            serde_json::from_str(r#"{"mode": "az", "stop": 270, "step": 90, "repeat": 2}"#).unwrap();
        let survey = plan.build(&Settings::default(), "out").unwrap();
        assert_eq!(survey.targets().len(), 8);
    }
}
