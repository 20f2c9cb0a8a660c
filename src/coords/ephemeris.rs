//! Low-precision ephemeris: sidereal time, Sun, Moon and a small catalog of
//! named radio sources.
//!
//! Accuracy is a few tenths of a degree, which is well inside the beam of a
//! small dish at 21 cm.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{wrap_360, SkyPosition};
use crate::error::ScanError;

/// Julian date of the J2000.0 epoch.
const J2000: f64 = 2_451_545.0;

/// Julian date of a UTC instant.
pub fn julian_day(at: DateTime<Utc>) -> f64 {
    let secs = at.timestamp() as f64 + f64::from(at.timestamp_subsec_nanos()) * 1e-9;
    secs / 86_400.0 + 2_440_587.5
}

/// Greenwich mean sidereal time in degrees.
pub fn gmst_deg(at: DateTime<Utc>) -> f64 {
    let d = julian_day(at) - J2000;
    let t = d / 36_525.0;
    wrap_360(280.460_618_37 + 360.985_647_366_29 * d + 0.000_387_933 * t * t - t * t * t / 38_710_000.0)
}

/// Local sidereal time in degrees for an east-positive longitude.
pub fn local_sidereal_deg(at: DateTime<Utc>, longitude_deg: f64) -> f64 {
    wrap_360(gmst_deg(at) + longitude_deg)
}

fn mean_obliquity_deg(d: f64) -> f64 {
    23.439 - 0.000_000_4 * d
}

fn ecliptic_to_equatorial(lambda_deg: f64, beta_deg: f64, epsilon_deg: f64) -> SkyPosition {
    let (l, b, e) = (
        lambda_deg.to_radians(),
        beta_deg.to_radians(),
        epsilon_deg.to_radians(),
    );
    let x = b.cos() * l.cos();
    let y = e.cos() * b.cos() * l.sin() - e.sin() * b.sin();
    let z = e.sin() * b.cos() * l.sin() + e.cos() * b.sin();
    SkyPosition::equatorial(wrap_360(y.atan2(x).to_degrees()), z.clamp(-1.0, 1.0).asin().to_degrees())
}

/// Apparent geocentric position of the Sun.
pub fn sun_position(at: DateTime<Utc>) -> SkyPosition {
    let n = julian_day(at) - J2000;
    let mean_lon = wrap_360(280.460 + 0.985_647_4 * n);
    let g = wrap_360(357.528 + 0.985_600_3 * n).to_radians();
    let lambda = mean_lon + 1.915 * g.sin() + 0.020 * (2.0 * g).sin();
    ecliptic_to_equatorial(lambda, 0.0, mean_obliquity_deg(n))
}

/// Geocentric position of the Moon (parallax ignored).
pub fn moon_position(at: DateTime<Utc>) -> SkyPosition {
    let d = julian_day(at) - J2000;
    let t = d / 36_525.0;
    let s = |a: f64, b: f64| (a + b * t).to_radians().sin();

    let lambda = 218.32 + 481_267.881 * t + 6.29 * s(135.0, 477_198.87)
        - 1.27 * s(259.3, -413_335.36)
        + 0.66 * s(235.7, 890_534.22)
        + 0.21 * s(269.9, 954_397.74)
        - 0.19 * s(357.5, 35_999.05)
        - 0.11 * s(186.5, 966_404.03);
    let beta = 5.13 * s(93.3, 483_202.02) + 0.28 * s(228.2, 960_400.89)
        - 0.28 * s(318.3, 6_003.15)
        - 0.17 * s(217.6, -407_332.21);

    ecliptic_to_equatorial(wrap_360(lambda), beta, mean_obliquity_deg(d))
}

/// Solar-system bodies a grid can be anchored to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Body {
    Sun,
    Moon,
}

impl Body {
    pub const ALL: [Body; 2] = [Body::Sun, Body::Moon];

    /// Equatorial position at `at`.
    pub fn position(self, at: DateTime<Utc>) -> SkyPosition {
        match self {
            Body::Sun => sun_position(at),
            Body::Moon => moon_position(at),
        }
    }
}

impl fmt::Display for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Sun => write!(f, "sun"),
            Body::Moon => write!(f, "moon"),
        }
    }
}

impl FromStr for Body {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sun" => Ok(Body::Sun),
            "moon" => Ok(Body::Moon),
            other => Err(ScanError::Validation(format!(
                "unknown solar system body '{other}' (expected one of: sun, moon)"
            ))),
        }
    }
}

/// (aliases, ra, dec) in ICRS degrees.
const CATALOG: &[(&[&str], f64, f64)] = &[
    (&["sgra*", "sgra", "galacticcenter"], 266.416_83, -29.007_81),
    (&["casa", "cassiopeiaa"], 350.850, 58.815),
    (&["cyga", "cygnusa"], 299.868, 40.733_9),
    (&["taua", "crab", "m1"], 83.633, 22.014_5),
    (&["vira", "m87"], 187.705_9, 12.391_1),
    (&["orion", "m42", "orionnebula"], 83.822, -5.391),
    (&["m31", "andromeda"], 10.684_7, 41.269_0),
    (&["polaris"], 37.954_6, 89.264_1),
];

/// Resolve a named object to its equatorial position.
///
/// Matching ignores case and whitespace, so `"Cas A"` and `"casa"` agree.
pub fn lookup_named_object(name: &str) -> Result<SkyPosition, ScanError> {
    let key: String = name
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_lowercase();
    CATALOG
        .iter()
        .find(|(aliases, _, _)| aliases.contains(&key.as_str()))
        .map(|(_, ra, dec)| SkyPosition::equatorial(*ra, *dec))
        .ok_or_else(|| ScanError::Validation(format!("unknown object name '{name}'")))
}
