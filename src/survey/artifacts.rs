//! Diagnostic artifacts written alongside the observation table.
//!
//! Per-observation series are written as soon as a science record exists, so
//! an aborted run still leaves them behind. The summary is regenerated from
//! the complete table after persistence.

use std::path::PathBuf;
use tracing::debug;

use super::record::{ObservationRecord, ObservationTable};
use crate::error::AppResult;
use crate::storage::{write_rows, write_series};

/// Receives artifacts from a running survey.
pub trait ArtifactSink: Send + Sync {
    /// One science observation. `stem` is unique per target and pass.
    fn observation(&self, stem: &str, label: &str, record: &ObservationRecord) -> AppResult<()>;

    /// The finished table.
    fn summary(&self, table: &ObservationTable) -> AppResult<()>;
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoArtifacts;

impl ArtifactSink for NoArtifacts {
    fn observation(&self, _: &str, _: &str, _: &ObservationRecord) -> AppResult<()> {
        Ok(())
    }

    fn summary(&self, _: &ObservationTable) -> AppResult<()> {
        Ok(())
    }
}

/// Writes frequency- and velocity-binned spectra and a summary as CSV series.
#[derive(Debug, Clone)]
pub struct CsvArtifacts {
    dir: PathBuf,
}

impl CsvArtifacts {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ArtifactSink for CsvArtifacts {
    fn observation(&self, stem: &str, label: &str, record: &ObservationRecord) -> AppResult<()> {
        std::fs::create_dir_all(&self.dir)?;

        let mhz: Vec<f64> = record.frequencies.iter().map(|f| f / 1e6).collect();
        let freq_path = self.dir.join(format!("{stem}_freq.csv"));
        write_series(&freq_path, ["frequency_mhz", "power"], &mhz, &record.data)?;

        if let Some(velocities) = &record.velocities {
            let vel_path = self.dir.join(format!("{stem}_vel.csv"));
            write_series(&vel_path, ["velocity_km_s", "power"], velocities, &record.data)?;
        }

        debug!(label, stem, "Wrote observation artifacts");
        Ok(())
    }

    fn summary(&self, table: &ObservationTable) -> AppResult<()> {
        std::fs::create_dir_all(&self.dir)?;
        let rows: Vec<Vec<String>> = table
            .records
            .iter()
            .map(|r| {
                vec![
                    r.seq.to_string(),
                    r.pass.to_string(),
                    r.is_reference.to_string(),
                    r.galactic.lon.to_string(),
                    r.galactic.lat.to_string(),
                    r.actual.azimuth.to_string(),
                    r.actual.elevation.to_string(),
                    r.total_power().to_string(),
                ]
            })
            .collect();
        write_rows(
            &self.dir.join("summary.csv"),
            &["seq", "pass", "is_reference", "l", "b", "az", "el", "total_power"],
            &rows,
        )
    }
}
