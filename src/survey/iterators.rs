//! Target sequence generators.
//!
//! A [`TargetIterator`] describes a plan's pointing sequence; calling
//! [`TargetIterator::coordinates`] yields it lazily. Sequences are restartable:
//! every call starts from the first target. [`Repeat`] replays any variant a
//! fixed number of times.
//!
//! Iterators never filter by reachability. Whether a target is above the
//! horizon depends on when it is evaluated, so the survey loop decides.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::coords::spherical::{convert_fixed, directional_offset};
use crate::coords::{Body, CoordinateTransform, Frame, SkyPosition};
use crate::error::{AppResult, ScanError};

/// Lazily generated targets.
pub type Targets<'a> = Box<dyn Iterator<Item = TargetDescriptor> + Send + 'a>;

/// Lattice offset of a grid target from its anchor, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridOffset {
    /// Perpendicular to the rotation direction, applied second
    pub x: f64,
    /// Along the rotation direction, applied first
    pub y: f64,
}

/// One position to observe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetDescriptor {
    pub position: SkyPosition,
    /// Set for grid targets
    pub offset: Option<GridOffset>,
    /// Zero-based pass number under [`Repeat`]
    pub pass: u32,
}

impl TargetDescriptor {
    fn at(position: SkyPosition) -> Self {
        Self {
            position,
            offset: None,
            pass: 0,
        }
    }
}

/// Largest number of targets one sweep or lattice may describe.
pub const MAX_TARGETS: usize = 100_000;

/// Evenly spaced values over `[start, stop]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sweep {
    pub start: f64,
    pub stop: f64,
    pub step: f64,
}

impl Sweep {
    pub fn new(start: f64, stop: f64, step: f64) -> AppResult<Self> {
        if !(start.is_finite() && stop.is_finite() && step.is_finite()) {
            return Err(ScanError::Validation(
                "sweep bounds must be finite".to_string(),
            ));
        }
        if step <= 0.0 {
            return Err(ScanError::Validation(format!(
                "step must be positive, got {step}"
            )));
        }
        if stop < start {
            return Err(ScanError::Validation(format!(
                "stop ({stop}) is before start ({start})"
            )));
        }
        let intervals = (stop - start) / step;
        if !intervals.is_finite() || intervals >= MAX_TARGETS as f64 {
            return Err(ScanError::Validation(format!(
                "{start}..{stop} step {step} exceeds {MAX_TARGETS} points"
            )));
        }
        Ok(Self { start, stop, step })
    }

    /// `floor((stop - start) / step) + 1`, tolerant of float rounding so an
    /// evenly dividing span keeps its last endpoint.
    pub fn len(&self) -> usize {
        ((self.stop - self.start) / self.step + 1e-9).floor() as usize + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Values are computed from the index, not accumulated.
    pub fn values(&self) -> impl Iterator<Item = f64> + Send + Clone {
        let Sweep { start, step, .. } = *self;
        (0..self.len()).map(move |i| start + i as f64 * step)
    }
}

impl fmt::Display for Sweep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{} step {}", self.start, self.stop, self.step)
    }
}

/// Square lattice of offsets, rotated by a position angle in `rotation_frame`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Lattice {
    /// Offsets along each axis, in degrees from the anchor
    pub offsets: Sweep,
    /// Position angle of the y axis, degrees east of north
    pub rotation: f64,
    pub rotation_frame: Frame,
}

impl Lattice {
    pub fn new(offsets: Sweep, rotation: f64, rotation_frame: Frame) -> AppResult<Self> {
        if rotation_frame == Frame::Horizontal {
            return Err(ScanError::Validation(
                "grid rotation frame must be icrs or galactic".to_string(),
            ));
        }
        let side = offsets.len();
        if side.checked_mul(side).map_or(true, |n| n > MAX_TARGETS) {
            return Err(ScanError::Validation(format!(
                "{side}x{side} grid exceeds {MAX_TARGETS} points"
            )));
        }
        Ok(Self {
            offsets,
            rotation,
            rotation_frame,
        })
    }

    pub fn len(&self) -> usize {
        self.offsets.len() * self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Grid points about `anchor`.
    ///
    /// Each point is two successive great-circle moves, first along the
    /// rotation direction by `y`, then perpendicular to it by `x`.
    fn points(self, anchor: SkyPosition) -> Targets<'static> {
        let anchor = convert_fixed(&anchor, self.rotation_frame).unwrap_or(anchor);
        let rotation = self.rotation;
        let ys = self.offsets.values();
        Box::new(self.offsets.values().flat_map(move |x| {
            ys.clone().map(move |y| {
                let along = directional_offset(&anchor, rotation, y);
                TargetDescriptor {
                    position: directional_offset(&along, rotation + 90.0, x),
                    offset: Some(GridOffset { x, y }),
                    pass: 0,
                }
            })
        }))
    }
}

/// Galactic longitude sweep at fixed latitude.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LongitudeSweep {
    pub longitudes: Sweep,
    pub latitude: f64,
}

/// Azimuth sweep at fixed elevation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AzimuthSweep {
    pub azimuths: Sweep,
    pub elevation: f64,
}

/// Lattice about a fixed sky position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkyGrid {
    pub anchor: SkyPosition,
    /// Catalog name, when the anchor came from one
    pub anchor_name: Option<String>,
    pub lattice: Lattice,
}

/// Lattice about a moving solar-system body.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BodyRelativeGrid {
    pub body: Body,
    pub lattice: Lattice,
}

/// The plan's pointing sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TargetIterator {
    LongitudeSweep(LongitudeSweep),
    AzimuthSweep(AzimuthSweep),
    SkyGrid(SkyGrid),
    BodyRelativeGrid(BodyRelativeGrid),
}

impl TargetIterator {
    /// Generate the sequence.
    ///
    /// Body-relative grids look up the body's position at `sky.now()` on every
    /// call, so two calls made minutes apart differ.
    pub fn coordinates<'a>(&'a self, sky: &'a dyn CoordinateTransform) -> Targets<'a> {
        match self {
            TargetIterator::LongitudeSweep(s) => {
                let b = s.latitude;
                Box::new(
                    s.longitudes
                        .values()
                        .map(move |l| TargetDescriptor::at(SkyPosition::galactic(l, b))),
                )
            }
            TargetIterator::AzimuthSweep(s) => {
                let el = s.elevation;
                Box::new(
                    s.azimuths
                        .values()
                        .map(move |az| TargetDescriptor::at(SkyPosition::horizontal(az, el))),
                )
            }
            TargetIterator::SkyGrid(g) => g.lattice.points(g.anchor),
            TargetIterator::BodyRelativeGrid(g) => {
                let anchor = sky.body_position(g.body, sky.now());
                g.lattice.points(anchor)
            }
        }
    }

    /// Number of targets in one pass.
    pub fn len(&self) -> usize {
        match self {
            TargetIterator::LongitudeSweep(s) => s.longitudes.len(),
            TargetIterator::AzimuthSweep(s) => s.azimuths.len(),
            TargetIterator::SkyGrid(g) => g.lattice.len(),
            TargetIterator::BodyRelativeGrid(g) => g.lattice.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Short mode tag stored with every record.
    pub fn mode(&self) -> &'static str {
        match self {
            TargetIterator::LongitudeSweep(_) => "gal",
            TargetIterator::AzimuthSweep(_) => "az",
            TargetIterator::SkyGrid(_) => "grid",
            TargetIterator::BodyRelativeGrid(_) => "solar-grid",
        }
    }

    /// Human-readable name of one target, for logs and plot titles.
    pub fn format_label(&self, target: &TargetDescriptor) -> String {
        match (self, target.offset) {
            (TargetIterator::LongitudeSweep(_), _) => format!("l={:.2}", target.position.lon),
            (TargetIterator::AzimuthSweep(_), _) => format!("az={:.2}", target.position.lon),
            (_, Some(o)) => format!("{} x={:+.2} y={:+.2}", self.anchor_label(), o.x, o.y),
            (_, None) => target.position.to_string(),
        }
    }

    /// File-name-safe stem for a target's artifacts.
    pub fn format_filename_stem(&self, target: &TargetDescriptor) -> String {
        match (self, target.offset) {
            (TargetIterator::LongitudeSweep(_), _) => format!("lon{:.2}", target.position.lon),
            (TargetIterator::AzimuthSweep(_), _) => format!("az{:.2}", target.position.lon),
            (_, Some(o)) => format!("x{:+.2}_y{:+.2}", o.x, o.y),
            (_, None) => format!("{:.2}_{:.2}", target.position.lon, target.position.lat),
        }
    }

    fn anchor_label(&self) -> String {
        match self {
            TargetIterator::SkyGrid(g) => g
                .anchor_name
                .clone()
                .unwrap_or_else(|| g.anchor.to_string()),
            TargetIterator::BodyRelativeGrid(g) => g.body.to_string(),
            _ => String::new(),
        }
    }
}

impl fmt::Display for TargetIterator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetIterator::LongitudeSweep(s) => {
                write!(f, "galactic sweep l={} at b={}", s.longitudes, s.latitude)
            }
            TargetIterator::AzimuthSweep(s) => {
                write!(f, "azimuth sweep az={} at el={}", s.azimuths, s.elevation)
            }
            TargetIterator::SkyGrid(SkyGrid { lattice, .. })
            | TargetIterator::BodyRelativeGrid(BodyRelativeGrid { lattice, .. }) => write!(
                f,
                "grid about {} offsets {} rotated {}° in {}",
                self.anchor_label(),
                lattice.offsets,
                lattice.rotation,
                lattice.rotation_frame
            ),
        }
    }
}

/// Replays a [`TargetIterator`] `times` times.
///
/// Each pass calls the inner iterator afresh, so body-relative grids are
/// re-anchored per pass. Everything else delegates to the inner iterator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repeat {
    inner: TargetIterator,
    times: u32,
}

impl Repeat {
    pub fn new(inner: TargetIterator, times: u32) -> Self {
        Self { inner, times }
    }

    pub fn inner(&self) -> &TargetIterator {
        &self.inner
    }

    pub fn times(&self) -> u32 {
        self.times
    }

    pub fn coordinates<'a>(&'a self, sky: &'a dyn CoordinateTransform) -> Targets<'a> {
        Box::new((0..self.times).flat_map(move |pass| {
            self.inner
                .coordinates(sky)
                .map(move |target| TargetDescriptor { pass, ..target })
        }))
    }

    pub fn len(&self) -> usize {
        self.inner.len().saturating_mul(self.times as usize)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn format_label(&self, target: &TargetDescriptor) -> String {
        let label = self.inner.format_label(target);
        if self.times > 1 {
            format!("{label} (pass {}/{})", target.pass + 1, self.times)
        } else {
            label
        }
    }

    /// Passes after the first get a suffix so artifacts are not overwritten.
    pub fn format_filename_stem(&self, target: &TargetDescriptor) -> String {
        let stem = self.inner.format_filename_stem(target);
        if target.pass > 0 {
            format!("{stem}_pass{}", target.pass + 1)
        } else {
            stem
        }
    }
}

impl fmt::Display for Repeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)?;
        if self.times != 1 {
            write!(f, " ×{}", self.times)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SiteConfig;
    use crate::coords::spherical::separation;
    use crate::coords::{RefractionEnvironment, SiteTransform};
    use chrono::{Duration, TimeZone, Utc};

    fn sky() -> SiteTransform {
        let at = Utc.with_ymd_and_hms(2024, 3, 20, 15, 0, 0).unwrap();
        SiteTransform::new(SiteConfig::default(), RefractionEnvironment::new()).with_fixed_time(at)
    }

    fn azimuth_sweep(start: f64, stop: f64, step: f64) -> TargetIterator {
        TargetIterator::AzimuthSweep(AzimuthSweep {
            azimuths: Sweep::new(start, stop, step).unwrap(),
            elevation: 30.0,
        })
    }

    #[test]
    fn azimuth_sweep_includes_both_endpoints() {
        let sky = sky();
        let sweep = azimuth_sweep(0.0, 270.0, 90.0);
        let az: Vec<f64> = sweep.coordinates(&sky).map(|t| t.position.lon).collect();
        assert_eq!(az, vec![0.0, 90.0, 180.0, 270.0]);
        assert_eq!(sweep.len(), 4);
        assert!(sweep
            .coordinates(&sky)
            .all(|t| t.position.lat == 30.0 && t.position.frame == Frame::Horizontal));
    }

    #[test]
    fn repeat_concatenates_passes() {
        let sky = sky();
        let repeated = Repeat::new(azimuth_sweep(0.0, 270.0, 90.0), 2);
        let targets: Vec<_> = repeated.coordinates(&sky).collect();
        assert_eq!(targets.len(), 8);
        assert_eq!(repeated.len(), 8);
        let first: Vec<_> = targets[..4].iter().map(|t| t.position).collect();
        let second: Vec<_> = targets[4..].iter().map(|t| t.position).collect();
        assert_eq!(first, second);
        assert!(targets[..4].iter().all(|t| t.pass == 0));
        assert!(targets[4..].iter().all(|t| t.pass == 1));
    }

    #[test]
    fn default_galactic_sweep_has_145_points() {
        let sky = sky();
        let sweep = TargetIterator::LongitudeSweep(LongitudeSweep {
            longitudes: Sweep::new(0.0, 360.0, 2.5).unwrap(),
            latitude: 0.0,
        });
        let l: Vec<f64> = sweep.coordinates(&sky).map(|t| t.position.lon).collect();
        assert_eq!(l.len(), 145);
        assert_eq!(l[0], 0.0);
        assert_eq!(l[144], 360.0);
        assert!(l.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn uneven_span_stops_below_stop() {
        let sweep = Sweep::new(0.0, 10.0, 3.0).unwrap();
        assert_eq!(sweep.values().collect::<Vec<_>>(), vec![0.0, 3.0, 6.0, 9.0]);
    }

    #[test]
    fn sweep_validation() {
        assert!(Sweep::new(0.0, 10.0, 0.0).is_err());
        assert!(Sweep::new(10.0, 0.0, 1.0).is_err());
        assert!(Sweep::new(0.0, f64::NAN, 1.0).is_err());
        assert_eq!(Sweep::new(5.0, 5.0, 1.0).unwrap().len(), 1);
    }

    #[test]
    fn oversized_plans_are_rejected() {
        assert!(matches!(
            Sweep::new(0.0, 1e12, 1e-6),
            Err(ScanError::Validation(_))
        ));
        assert!(matches!(
            Sweep::new(-1e308, 1e308, 1e-300),
            Err(ScanError::Validation(_))
        ));
        let widest = Sweep::new(0.0, (MAX_TARGETS - 1) as f64, 1.0).unwrap();
        assert_eq!(widest.len(), MAX_TARGETS);

        // 1001 x 1001 points
        let side = Sweep::new(-500.0, 500.0, 1.0).unwrap();
        assert!(matches!(
            Lattice::new(side, 0.0, Frame::Galactic),
            Err(ScanError::Validation(_))
        ));
    }

    #[test]
    fn grid_is_square_and_centered() {
        let sky = sky();
        let anchor = SkyPosition::galactic(30.0, 0.0);
        let grid = TargetIterator::SkyGrid(SkyGrid {
            anchor,
            anchor_name: None,
            lattice: Lattice::new(Sweep::new(-2.0, 2.0, 1.0).unwrap(), 0.0, Frame::Galactic)
                .unwrap(),
        });
        let targets: Vec<_> = grid.coordinates(&sky).collect();
        assert_eq!(targets.len(), 25);
        assert_eq!(grid.len(), 25);

        let center = targets
            .iter()
            .find(|t| t.offset == Some(GridOffset { x: 0.0, y: 0.0 }))
            .unwrap();
        assert!(separation(center.position.lon, center.position.lat, 30.0, 0.0) < 1e-9);

        let corner = targets[0];
        let expected = (2.0f64.to_radians().cos().powi(2)).acos().to_degrees();
        let sep = separation(corner.position.lon, corner.position.lat, 30.0, 0.0);
        assert!((sep - expected).abs() < 1e-6, "sep = {sep}");
    }

    #[test]
    fn rotation_turns_the_lattice() {
        let sky = sky();
        let lattice = Lattice::new(Sweep::new(0.0, 1.0, 1.0).unwrap(), 90.0, Frame::Galactic).unwrap();
        let grid = TargetIterator::SkyGrid(SkyGrid {
            anchor: SkyPosition::galactic(100.0, 0.0),
            anchor_name: Some("test".into()),
            lattice,
        });
        // y runs east when rotated by 90°
        let y_only = grid
            .coordinates(&sky)
            .find(|t| t.offset == Some(GridOffset { x: 0.0, y: 1.0 }))
            .unwrap();
        assert!((y_only.position.lon - 101.0).abs() < 1e-9);
        assert!(y_only.position.lat.abs() < 1e-9);
        assert_eq!(grid.format_label(&y_only), "test x=+0.00 y=+1.00");
    }

    #[test]
    fn grid_offsets_move_along_rotation_then_across() {
        let sky = sky();
        let anchor = SkyPosition::galactic(0.0, 0.0);
        let grid = TargetIterator::SkyGrid(SkyGrid {
            anchor,
            anchor_name: None,
            lattice: Lattice::new(Sweep::new(0.0, 10.0, 10.0).unwrap(), 0.0, Frame::Galactic)
                .unwrap(),
        });
        let corner = grid
            .coordinates(&sky)
            .find(|t| t.offset == Some(GridOffset { x: 10.0, y: 10.0 }))
            .unwrap()
            .position;

        // north 10°, then east 10° along a great circle
        assert!((corner.lon - 10.1511).abs() < 1e-3, "lon = {}", corner.lon);
        assert!((corner.lat - 9.8466).abs() < 1e-3, "lat = {}", corner.lat);
        let expected = directional_offset(&directional_offset(&anchor, 0.0, 10.0), 90.0, 10.0);
        assert!(separation(corner.lon, corner.lat, expected.lon, expected.lat) < 1e-9);
    }

    #[test]
    fn body_grid_follows_the_body() {
        let lattice = Lattice::new(Sweep::new(0.0, 0.0, 1.0).unwrap(), 0.0, Frame::Equatorial).unwrap();
        let grid = TargetIterator::BodyRelativeGrid(BodyRelativeGrid {
            body: Body::Moon,
            lattice,
        });

        let early = sky();
        let later = sky().with_fixed_time(early.now() + Duration::hours(6));
        let a = grid.coordinates(&early).next().unwrap().position;
        let b = grid.coordinates(&later).next().unwrap().position;
        let moon = Body::Moon.position(early.now());
        assert!(separation(a.lon, a.lat, moon.lon, moon.lat) < 1e-9);
        // the moon moves about 3° in 6 hours
        assert!(separation(a.lon, a.lat, b.lon, b.lat) > 1.0);
    }

    #[test]
    fn lattice_rejects_horizontal_rotation_frame() {
        assert!(Lattice::new(Sweep::new(0.0, 1.0, 1.0).unwrap(), 0.0, Frame::Horizontal).is_err());
    }

    #[test]
    fn repeat_stems_do_not_collide() {
        let sky = sky();
        let repeated = Repeat::new(azimuth_sweep(0.0, 90.0, 90.0), 2);
        let stems: Vec<_> = repeated
            .coordinates(&sky)
            .map(|t| repeated.format_filename_stem(&t))
            .collect();
        assert_eq!(stems, vec!["az0.00", "az90.00", "az0.00_pass2", "az90.00_pass2"]);
    }
}
