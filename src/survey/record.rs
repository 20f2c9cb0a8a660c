//! Observation records and the per-run table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::coords::{HorizontalPosition, SkyPosition, WeatherReading};

/// One successful pointing + acquisition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRecord {
    /// Position in the run, starting at 0
    pub seq: u64,
    /// Plan mode tag (`gal`, `az`, `grid`, `solar-grid`)
    pub mode: String,
    pub gain_db: f64,
    pub center_frequency_hz: f64,
    /// Channel frequencies in Hz
    pub frequencies: Vec<f64>,
    /// Integrated power per channel
    pub data: Vec<f64>,
    pub timestamp: DateTime<Utc>,
    /// Position sent to the mount
    pub commanded: HorizontalPosition,
    /// Encoder read-back after the acquisition
    pub actual: HorizontalPosition,
    /// Target as generated by the iterator
    pub target: SkyPosition,
    pub equatorial: SkyPosition,
    pub galactic: SkyPosition,
    /// Radial velocity per channel in km/s, when a reference frequency is set
    pub velocities: Option<Vec<f64>>,
    pub weather: Option<WeatherReading>,
    /// Dark-sky calibration row
    pub is_reference: bool,
    /// Repeat pass, starting at 0
    pub pass: u32,
}

impl ObservationRecord {
    /// Sum of the power vector.
    pub fn total_power(&self) -> f64 {
        self.data.iter().sum()
    }
}

/// All records from one run, in acquisition order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservationTable {
    pub records: Vec<ObservationRecord>,
}

impl ObservationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: ObservationRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records pointed at the science target.
    pub fn science(&self) -> impl Iterator<Item = &ObservationRecord> {
        self.records.iter().filter(|r| !r.is_reference)
    }

    /// Dark-sky calibration records.
    pub fn references(&self) -> impl Iterator<Item = &ObservationRecord> {
        self.records.iter().filter(|r| r.is_reference)
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::record;
    use super::*;

    #[test]
    fn table_splits_science_and_reference_rows() {
        let mut table = ObservationTable::new();
        table.push(record(0, false));
        table.push(record(1, true));
        table.push(record(2, false));

        assert_eq!(table.len(), 3);
        assert_eq!(table.science().count(), 2);
        assert_eq!(table.references().map(|r| r.seq).collect::<Vec<_>>(), vec![1]);
        assert!((table.records[0].total_power() - 4.5).abs() < 1e-12);
    }
}
