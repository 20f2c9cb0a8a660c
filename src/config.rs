//! Configuration System using Figment
//!
//! Settings are layered from:
//! 1. Built-in defaults (the MIT radome station)
//! 2. `galscan.toml` (or a path given on the command line)
//! 3. Environment variables prefixed with `GALSCAN_`
//!
//! # Environment Variable Overrides
//!
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! GALSCAN_SURVEY__HORIZON_MARGIN_DEG=10
//! GALSCAN_LOGGING__LEVEL=debug
//! GALSCAN_STORAGE__OUTPUT_DIR=/data/scans
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AppResult, ScanError};
use crate::storage::TableFormat;

/// Hydrogen line rest frequency in Hz.
pub const HYDROGEN_FREQ_HZ: f64 = 1_420.406e6;

/// Top-level settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Observer location
    #[serde(default)]
    pub site: SiteConfig,
    /// Survey loop timing and defaults
    #[serde(default)]
    pub survey: SurveyConfig,
    /// Receiver front end
    #[serde(default)]
    pub receiver: ReceiverConfig,
    /// Observation table output
    #[serde(default)]
    pub storage: StorageConfig,
    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Geodetic position of the dish.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Degrees north
    pub latitude_deg: f64,
    /// Degrees east
    pub longitude_deg: f64,
    /// Meters above sea level
    pub elevation_m: f64,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            latitude_deg: 42.3601,
            longitude_deg: -71.0942,
            elevation_m: 100.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurveyConfig {
    /// Targets below this elevation are skipped
    pub horizon_margin_deg: f64,
    /// Settle time after a short slew between adjacent targets
    pub settle_secs: f64,
    /// Settle time after the first slew or after skipping targets
    pub long_settle_secs: f64,
    pub integration_secs: f64,
    pub gain_db: f64,
    pub repeat: u32,
    pub reference_frequency_hz: Option<f64>,
    /// Dark-sky calibration offset; zero disables calibration
    pub dark_sky_offset_deg: f64,
}

impl Default for SurveyConfig {
    fn default() -> Self {
        Self {
            horizon_margin_deg: 0.0,
            settle_secs: 2.0,
            long_settle_secs: 10.0,
            integration_secs: 30.0,
            gain_db: 60.0,
            repeat: 1,
            reference_frequency_hz: Some(HYDROGEN_FREQ_HZ),
            dark_sky_offset_deg: 0.0,
        }
    }
}

impl SurveyConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_secs_f64(self.settle_secs.max(0.0))
    }

    pub fn long_settle(&self) -> Duration {
        Duration::from_secs_f64(self.long_settle_secs.max(0.0))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiverConfig {
    pub center_frequency_hz: f64,
    pub bandwidth_hz: f64,
    /// Hardware ceiling; plans asking for more are rejected
    pub max_bandwidth_hz: f64,
    pub channels: usize,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            center_frequency_hz: HYDROGEN_FREQ_HZ,
            bandwidth_hz: 2.4e6,
            max_bandwidth_hz: 5e6,
            channels: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Default directory for survey output
    pub output_dir: PathBuf,
    /// Write per-observation spectra artifacts while the survey runs
    pub write_artifacts: bool,
    /// Table formats written at the end of each run
    pub formats: Vec<TableFormat>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("scans"),
            write_artifacts: true,
            formats: vec![TableFormat::Csv, TableFormat::Bincode],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
    /// Number of recent lines retained for the operator log view
    pub buffer_lines: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            buffer_lines: 100,
        }
    }
}

impl Settings {
    /// Load settings from `galscan.toml` in the working directory.
    pub fn load() -> AppResult<Self> {
        Self::load_from("galscan.toml")
    }

    /// Load settings from a specific file path. A missing file is not an
    /// error; defaults and environment overrides still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings: Self = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("GALSCAN_").split("__"))
            .extract()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate settings after loading.
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ScanError::Validation(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        if !(-90.0..=90.0).contains(&self.site.latitude_deg) {
            return Err(ScanError::Validation(format!(
                "Site latitude {} is outside [-90, 90]",
                self.site.latitude_deg
            )));
        }

        if self.receiver.bandwidth_hz > self.receiver.max_bandwidth_hz {
            return Err(ScanError::Validation(format!(
                "bandwidth must be <{:e}",
                self.receiver.max_bandwidth_hz
            )));
        }

        if self.receiver.channels == 0 {
            return Err(ScanError::Validation(
                "receiver must have at least one channel".to_string(),
            ));
        }

        if self.storage.formats.is_empty() {
            return Err(ScanError::Validation(
                "at least one table format must be configured".to_string(),
            ));
        }

        if self.survey.integration_secs <= 0.0 {
            return Err(ScanError::Validation(
                "integration time must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_validate() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.survey.repeat, 1);
        assert_eq!(settings.receiver.max_bandwidth_hz, 5e6);
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings.survey.integration_secs, 30.0);
    }

    #[test]
    fn toml_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("galscan.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[survey]\nhorizon_margin_deg = 12.5\nsettle_secs = 0.0").unwrap();
        writeln!(file, "[logging]\nlevel = \"debug\"").unwrap();
        writeln!(file, "[storage]\nformats = [\"bincode\"]").unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.survey.horizon_margin_deg, 12.5);
        assert_eq!(settings.survey.settle(), Duration::ZERO);
        assert_eq!(settings.logging.level, "debug");
        assert_eq!(settings.storage.formats, vec![TableFormat::Bincode]);
        // untouched keys keep their defaults
        assert_eq!(settings.survey.long_settle_secs, 10.0);
    }

    #[test]
    fn invalid_log_level_is_rejected() {
        let mut settings = Settings::default();
        settings.logging.level = "loud".into();
        assert!(matches!(settings.validate(), Err(ScanError::Validation(_))));
    }

    #[test]
    fn bandwidth_ceiling_is_enforced() {
        let mut settings = Settings::default();
        settings.receiver.bandwidth_hz = 6e6;
        assert!(settings.validate().is_err());
    }
}
