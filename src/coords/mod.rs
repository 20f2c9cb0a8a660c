//! Sky positions, reference frames and the coordinate transform engine.
//!
//! Targets are described as a [`SkyPosition`] tagged with its [`Frame`]. The
//! survey loop never caches horizontal coordinates: it asks a
//! [`CoordinateTransform`] for the horizontal position at the instant it is
//! about to point, because the sky rotates underneath a fixed target.
//!
//! # Components
//!
//! - [`spherical`]: frame rotations and directional offsets on the sphere
//! - [`ephemeris`]: sidereal time, Sun/Moon positions, named radio sources
//! - [`transform`]: the [`CoordinateTransform`] contract and [`SiteTransform`]
//! - [`doppler`]: frequency axis to radial velocity

pub mod doppler;
pub mod ephemeris;
pub mod spherical;
pub mod transform;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ScanError;

pub use doppler::velocity_axis;
pub use ephemeris::{lookup_named_object, Body};
pub use spherical::offset_by;
pub use transform::{CoordinateTransform, RefractionEnvironment, SiteTransform, WeatherReading};

/// Reference frame of a [`SkyPosition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frame {
    /// Azimuth/elevation at the site
    Horizontal,
    /// ICRS right ascension/declination (J2000)
    Equatorial,
    /// Galactic longitude/latitude
    Galactic,
}

impl Frame {
    /// Axis names used in labels and table columns.
    pub fn axis_names(self) -> (&'static str, &'static str) {
        match self {
            Frame::Horizontal => ("az", "el"),
            Frame::Equatorial => ("ra", "dec"),
            Frame::Galactic => ("l", "b"),
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Horizontal => write!(f, "altaz"),
            Frame::Equatorial => write!(f, "icrs"),
            Frame::Galactic => write!(f, "galactic"),
        }
    }
}

impl FromStr for Frame {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "altaz" | "horizontal" => Ok(Frame::Horizontal),
            "icrs" | "equatorial" => Ok(Frame::Equatorial),
            "galactic" => Ok(Frame::Galactic),
            other => Err(ScanError::Validation(format!(
                "unknown frame '{other}' (expected icrs, galactic or altaz)"
            ))),
        }
    }
}

/// A point on the sky: longitude-like and latitude-like angles in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkyPosition {
    pub frame: Frame,
    /// Azimuth, right ascension or galactic longitude
    pub lon: f64,
    /// Elevation, declination or galactic latitude
    pub lat: f64,
}

impl SkyPosition {
    /// Angles are stored as given; sweeps past 360° keep their numbering.
    pub fn new(frame: Frame, lon: f64, lat: f64) -> Self {
        Self { frame, lon, lat }
    }

    pub fn horizontal(azimuth: f64, elevation: f64) -> Self {
        Self::new(Frame::Horizontal, azimuth, elevation)
    }

    pub fn equatorial(ra: f64, dec: f64) -> Self {
        Self::new(Frame::Equatorial, ra, dec)
    }

    pub fn galactic(l: f64, b: f64) -> Self {
        Self::new(Frame::Galactic, l, b)
    }
}

impl fmt::Display for SkyPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (lon, lat) = self.frame.axis_names();
        write!(f, "{}={:.2} {}={:.2}", lon, self.lon, lat, self.lat)
    }
}

/// Mount coordinates in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HorizontalPosition {
    pub azimuth: f64,
    pub elevation: f64,
}

impl HorizontalPosition {
    pub fn new(azimuth: f64, elevation: f64) -> Self {
        Self {
            azimuth: wrap_360(azimuth),
            elevation,
        }
    }
}

impl fmt::Display for HorizontalPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2}, {:.2})", self.azimuth, self.elevation)
    }
}

/// Normalize an angle in degrees to `[0, 360)`.
pub fn wrap_360(deg: f64) -> f64 {
    let wrapped = deg.rem_euclid(360.0);
    // rem_euclid can return 360.0 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}
