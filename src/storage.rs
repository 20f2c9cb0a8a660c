//! Observation table persistence with clean feature flag handling.
//!
//! A run's table is written once, at the end, in every configured format:
//!
//! - `observations.csv`: one row per record, vectors JSON-encoded per cell
//!   (requires the `storage_csv` feature)
//! - `observations.bin`: bincode, reloadable with [`load_table`]
//!
//! The CSV helpers are also used for the small per-observation artifacts.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::info;

use crate::config::StorageConfig;
use crate::error::{AppResult, ScanError};
use crate::survey::{ObservationRecord, ObservationTable};

/// On-disk table format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableFormat {
    Csv,
    Bincode,
}

impl TableFormat {
    pub fn file_name(self) -> &'static str {
        match self {
            TableFormat::Csv => "observations.csv",
            TableFormat::Bincode => "observations.bin",
        }
    }
}

/// Destination for a finished observation table.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Write `table` into the directory `destination`, replacing earlier output.
    async fn write(&self, table: &ObservationTable, destination: &Path) -> AppResult<()>;
}

/// Writes tables as files in the configured formats.
#[derive(Debug, Clone)]
pub struct FilePersistence {
    formats: Vec<TableFormat>,
}

impl Default for FilePersistence {
    fn default() -> Self {
        Self::new(vec![TableFormat::Csv, TableFormat::Bincode])
    }
}

impl FilePersistence {
    pub fn new(formats: Vec<TableFormat>) -> Self {
        Self { formats }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(config.formats.clone())
    }
}

#[async_trait]
impl Persistence for FilePersistence {
    async fn write(&self, table: &ObservationTable, destination: &Path) -> AppResult<()> {
        std::fs::create_dir_all(destination)?;
        for format in &self.formats {
            let path = destination.join(format.file_name());
            match format {
                TableFormat::Csv => write_table_csv(table, &path)?,
                TableFormat::Bincode => write_table_bincode(table, &path)?,
            }
            info!(
                path = %path.display(),
                records = table.len(),
                "Wrote observation table"
            );
        }
        Ok(())
    }
}

/// Write the table as bincode.
pub fn write_table_bincode(table: &ObservationTable, path: &Path) -> AppResult<()> {
    let file = File::create(path)?;
    bincode::serialize_into(BufWriter::new(file), table)?;
    Ok(())
}

/// Reload a table written by [`write_table_bincode`].
pub fn load_table(path: &Path) -> AppResult<ObservationTable> {
    let file = File::open(path)?;
    Ok(bincode::deserialize_from(BufReader::new(file))?)
}

/// Flat CSV view of an [`ObservationRecord`].
#[derive(Debug, Serialize)]
struct CsvRow {
    seq: u64,
    mode: String,
    pass: u32,
    is_reference: bool,
    timestamp: String,
    gain_db: f64,
    center_frequency_hz: f64,
    commanded_az: f64,
    commanded_el: f64,
    actual_az: f64,
    actual_el: f64,
    target_frame: String,
    target_lon: f64,
    target_lat: f64,
    ra: f64,
    dec: f64,
    l: f64,
    b: f64,
    temperature_c: Option<f64>,
    relative_humidity: Option<f64>,
    pressure_mbar: Option<f64>,
    frequencies: String,
    data: String,
    velocities: Option<String>,
}

impl CsvRow {
    fn from_record(r: &ObservationRecord) -> AppResult<Self> {
        Ok(Self {
            seq: r.seq,
            mode: r.mode.clone(),
            pass: r.pass,
            is_reference: r.is_reference,
            timestamp: r.timestamp.to_rfc3339(),
            gain_db: r.gain_db,
            center_frequency_hz: r.center_frequency_hz,
            commanded_az: r.commanded.azimuth,
            commanded_el: r.commanded.elevation,
            actual_az: r.actual.azimuth,
            actual_el: r.actual.elevation,
            target_frame: r.target.frame.to_string(),
            target_lon: r.target.lon,
            target_lat: r.target.lat,
            ra: r.equatorial.lon,
            dec: r.equatorial.lat,
            l: r.galactic.lon,
            b: r.galactic.lat,
            temperature_c: r.weather.map(|w| w.temperature_c),
            relative_humidity: r.weather.map(|w| w.relative_humidity),
            pressure_mbar: r.weather.map(|w| w.pressure_mbar),
            frequencies: serde_json::to_string(&r.frequencies)?,
            data: serde_json::to_string(&r.data)?,
            velocities: r
                .velocities
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        })
    }
}

// ============================================================================
// CSV Writer
// ============================================================================

#[cfg(feature = "storage_csv")]
mod csv_enabled {
    use super::*;

    fn persistence_error(path: &Path, err: csv::Error) -> ScanError {
        ScanError::Persistence(format!("{}: {err}", path.display()))
    }

    pub fn write_table_csv(table: &ObservationTable, path: &Path) -> AppResult<()> {
        let mut writer = csv::Writer::from_path(path).map_err(|e| persistence_error(path, e))?;
        for record in &table.records {
            writer
                .serialize(CsvRow::from_record(record)?)
                .map_err(|e| persistence_error(path, e))?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Two-column series, e.g. frequency against power.
    pub fn write_series(path: &Path, header: [&str; 2], xs: &[f64], ys: &[f64]) -> AppResult<()> {
        let mut writer = csv::Writer::from_path(path).map_err(|e| persistence_error(path, e))?;
        writer
            .write_record(header)
            .map_err(|e| persistence_error(path, e))?;
        for (x, y) in xs.iter().zip(ys) {
            writer
                .write_record([x.to_string(), y.to_string()])
                .map_err(|e| persistence_error(path, e))?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Arbitrary rows under a header.
    pub fn write_rows(path: &Path, header: &[&str], rows: &[Vec<String>]) -> AppResult<()> {
        let mut writer = csv::Writer::from_path(path).map_err(|e| persistence_error(path, e))?;
        writer
            .write_record(header)
            .map_err(|e| persistence_error(path, e))?;
        for row in rows {
            writer
                .write_record(row)
                .map_err(|e| persistence_error(path, e))?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(not(feature = "storage_csv"))]
mod csv_disabled {
    use super::*;

    pub fn write_table_csv(table: &ObservationTable, _path: &Path) -> AppResult<()> {
        // still reject unencodable rows so both builds fail the same way
        for record in &table.records {
            CsvRow::from_record(record)?;
        }
        Err(ScanError::FeatureNotEnabled("storage_csv".to_string()))
    }

    pub fn write_series(_path: &Path, _header: [&str; 2], _xs: &[f64], _ys: &[f64]) -> AppResult<()> {
        Err(ScanError::FeatureNotEnabled("storage_csv".to_string()))
    }

    pub fn write_rows(_path: &Path, _header: &[&str], _rows: &[Vec<String>]) -> AppResult<()> {
        Err(ScanError::FeatureNotEnabled("storage_csv".to_string()))
    }
}

#[cfg(feature = "storage_csv")]
pub use csv_enabled::{write_rows, write_series, write_table_csv};

#[cfg(not(feature = "storage_csv"))]
pub use csv_disabled::{write_rows, write_series, write_table_csv};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::survey::record::fixtures::record;

    fn table() -> ObservationTable {
        let mut table = ObservationTable::new();
        table.push(record(0, false));
        table.push(record(1, true));
        table
    }

    #[tokio::test]
    async fn bincode_table_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = FilePersistence::new(vec![TableFormat::Bincode]);
        let table = table();
        persistence.write(&table, dir.path()).await.unwrap();

        let loaded = load_table(&dir.path().join("observations.bin")).unwrap();
        assert_eq!(loaded, table);
        assert_eq!(loaded, self::table());
        assert!(!dir.path().join("observations.csv").exists());
    }

    #[tokio::test]
    async fn destination_directory_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("run-1");
        FilePersistence::new(vec![TableFormat::Bincode])
            .write(&table(), &nested)
            .await
            .unwrap();
        assert!(nested.join("observations.bin").exists());
    }

    #[cfg(feature = "storage_csv")]
    #[tokio::test]
    async fn csv_has_one_row_per_record() {
        let dir = tempfile::tempdir().unwrap();
        FilePersistence::default()
            .write(&table(), dir.path())
            .await
            .unwrap();

        let mut reader = csv::Reader::from_path(dir.path().join("observations.csv")).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert!(headers.iter().any(|h| h == "is_reference"));
        let data_col = headers.iter().position(|h| h == "data").unwrap();

        let rows: Vec<_> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        let data: Vec<f64> = serde_json::from_str(&rows[0][data_col]).unwrap();
        assert_eq!(data, vec![1.0, 2.0, 1.5]);
    }

    #[cfg(not(feature = "storage_csv"))]
    #[test]
    fn csv_requires_feature() {
        let dir = tempfile::tempdir().unwrap();
        let err = write_table_csv(&table(), &dir.path().join("x.csv")).unwrap_err();
        assert!(matches!(err, ScanError::FeatureNotEnabled(_)));
    }
}
