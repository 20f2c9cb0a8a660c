//! Survey execution.
//!
//! A [`Survey`] turns a [`Repeat`]ed [`TargetIterator`] into observations:
//! for every target it resolves the horizontal position at the current
//! instant, skips it if below the horizon margin, points, settles, integrates
//! and records. With a dark-sky offset each visible target is followed by a
//! calibration observation offset in latitude.
//!
//! ```text
//! Planned ──run──▶ Running ──┬── targets exhausted ──▶ Completed ─┐
//!                            └── abort / hardware error ▶ Aborted ─┴─▶ persist once
//! ```
//!
//! # Modules
//!
//! - `iterators` - target sequence generators
//! - `record` - observation rows and the run's table
//! - `runner` - the run loop, abort and time estimate
//! - `artifacts` - per-observation and summary CSV series

pub mod artifacts;
pub mod iterators;
pub mod record;
pub mod runner;

pub use artifacts::{ArtifactSink, CsvArtifacts, NoArtifacts};
pub use iterators::{
    AzimuthSweep, BodyRelativeGrid, GridOffset, Lattice, LongitudeSweep, Repeat, SkyGrid, Sweep,
    TargetDescriptor, TargetIterator, Targets,
};
pub use record::{ObservationRecord, ObservationTable};
pub use runner::{
    CoordinateGroup, Survey, SurveyOutcome, SurveyParams, SurveyProgress, SurveyState,
};
