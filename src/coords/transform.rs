//! The coordinate transform contract and the built-in site implementation.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::ephemeris::{local_sidereal_deg, Body};
use super::spherical::convert_fixed;
use super::{wrap_360, Frame, HorizontalPosition, SkyPosition};
use crate::config::SiteConfig;

/// Surface weather used for the refraction correction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeatherReading {
    pub temperature_c: f64,
    /// 0.0 to 1.0
    pub relative_humidity: f64,
    pub pressure_mbar: f64,
}

/// Latest weather reading, shared between the weather feed and the transform.
///
/// `None` until the first reading arrives; refraction is not applied then.
#[derive(Debug, Clone, Default)]
pub struct RefractionEnvironment {
    inner: Arc<RwLock<Option<WeatherReading>>>,
}

impl RefractionEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, reading: WeatherReading) {
        *self.inner.write() = Some(reading);
    }

    pub fn current(&self) -> Option<WeatherReading> {
        *self.inner.read()
    }
}

/// Celestial ↔ horizontal conversions at the station.
///
/// Implementations must be idempotent for a given instant: the survey and the
/// time-remaining estimator both call them concurrently.
pub trait CoordinateTransform: Send + Sync {
    /// Current instant as seen by the transform.
    fn now(&self) -> DateTime<Utc>;

    /// Apparent azimuth/elevation of `position` at `at`.
    fn to_horizontal(&self, position: &SkyPosition, at: DateTime<Utc>) -> HorizontalPosition;

    /// ICRS coordinates of `position` at `at`.
    fn to_equatorial(&self, position: &SkyPosition, at: DateTime<Utc>) -> SkyPosition;

    /// Galactic coordinates of `position` at `at`.
    fn to_galactic(&self, position: &SkyPosition, at: DateTime<Utc>) -> SkyPosition {
        let eq = self.to_equatorial(position, at);
        convert_fixed(&eq, Frame::Galactic).unwrap_or(eq)
    }

    /// Equatorial position of a solar-system body at `at`.
    fn body_position(&self, body: Body, at: DateTime<Utc>) -> SkyPosition {
        body.position(at)
    }

    /// Weather currently applied to refraction, if any.
    fn environment(&self) -> Option<WeatherReading>;
}

/// Time source for [`SiteTransform`].
#[derive(Debug, Clone, Copy)]
enum Clock {
    System,
    Fixed(DateTime<Utc>),
}

/// Transform for a fixed site, with optional Bennett refraction.
#[derive(Debug, Clone)]
pub struct SiteTransform {
    site: SiteConfig,
    environment: RefractionEnvironment,
    clock: Clock,
}

impl SiteTransform {
    pub fn new(site: SiteConfig, environment: RefractionEnvironment) -> Self {
        Self {
            site,
            environment,
            clock: Clock::System,
        }
    }

    /// Freeze the clock, for replaying a plan at a known instant.
    pub fn with_fixed_time(mut self, at: DateTime<Utc>) -> Self {
        self.clock = Clock::Fixed(at);
        self
    }

    pub fn site(&self) -> &SiteConfig {
        &self.site
    }

    /// Refraction in degrees for a true (airless) elevation.
    fn refraction_for_true(&self, elevation: f64) -> f64 {
        match self.environment.current() {
            Some(wx) if elevation > -1.0 => {
                let h = elevation;
                let arcmin = 1.02 / (h + 10.3 / (h + 5.11)).to_radians().tan();
                arcmin / 60.0 * scale(&wx)
            }
            _ => 0.0,
        }
    }

    /// Refraction in degrees for an apparent (observed) elevation.
    fn refraction_for_apparent(&self, elevation: f64) -> f64 {
        match self.environment.current() {
            Some(wx) if elevation > -1.0 => {
                let h = elevation;
                let arcmin = 1.0 / (h + 7.31 / (h + 4.4)).to_radians().tan();
                arcmin / 60.0 * scale(&wx)
            }
            _ => 0.0,
        }
    }

    fn equatorial_to_horizontal(&self, ra: f64, dec: f64, at: DateTime<Utc>) -> HorizontalPosition {
        let lat = self.site.latitude_deg.to_radians();
        let ha = (local_sidereal_deg(at, self.site.longitude_deg) - ra).to_radians();
        let dec = dec.to_radians();

        let sin_alt = dec.sin() * lat.sin() + dec.cos() * lat.cos() * ha.cos();
        let alt = sin_alt.clamp(-1.0, 1.0).asin().to_degrees();
        let az = (-dec.cos() * ha.sin())
            .atan2(dec.sin() * lat.cos() - dec.cos() * lat.sin() * ha.cos())
            .to_degrees();

        HorizontalPosition::new(az, alt + self.refraction_for_true(alt))
    }

    fn horizontal_to_equatorial(&self, az: f64, el: f64, at: DateTime<Utc>) -> SkyPosition {
        let true_el = el - self.refraction_for_apparent(el);
        let lat = self.site.latitude_deg.to_radians();
        let (az, alt) = (az.to_radians(), true_el.to_radians());

        let sin_dec = alt.sin() * lat.sin() + alt.cos() * lat.cos() * az.cos();
        let dec = sin_dec.clamp(-1.0, 1.0).asin().to_degrees();
        let ha = (-az.sin() * alt.cos())
            .atan2(alt.sin() * lat.cos() - alt.cos() * lat.sin() * az.cos())
            .to_degrees();

        SkyPosition::equatorial(
            wrap_360(local_sidereal_deg(at, self.site.longitude_deg) - ha),
            dec,
        )
    }
}

fn scale(wx: &WeatherReading) -> f64 {
    (wx.pressure_mbar / 1010.0) * (283.0 / (273.0 + wx.temperature_c))
}

impl CoordinateTransform for SiteTransform {
    fn now(&self) -> DateTime<Utc> {
        match self.clock {
            Clock::System => Utc::now(),
            Clock::Fixed(at) => at,
        }
    }

    fn to_horizontal(&self, position: &SkyPosition, at: DateTime<Utc>) -> HorizontalPosition {
        match position.frame {
            Frame::Horizontal => HorizontalPosition::new(position.lon, position.lat),
            Frame::Equatorial | Frame::Galactic => {
                let eq = self.to_equatorial(position, at);
                self.equatorial_to_horizontal(eq.lon, eq.lat, at)
            }
        }
    }

    fn to_equatorial(&self, position: &SkyPosition, at: DateTime<Utc>) -> SkyPosition {
        match position.frame {
            Frame::Horizontal => self.horizontal_to_equatorial(position.lon, position.lat, at),
            Frame::Equatorial | Frame::Galactic => {
                convert_fixed(position, Frame::Equatorial).unwrap_or(*position)
            }
        }
    }

    fn environment(&self) -> Option<WeatherReading> {
        self.environment.current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn transform() -> SiteTransform {
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 4, 0, 0).unwrap();
        SiteTransform::new(SiteConfig::default(), RefractionEnvironment::new()).with_fixed_time(at)
    }

    #[test]
    fn polaris_sits_at_site_latitude() {
        let t = transform();
        let polaris = SkyPosition::equatorial(37.9546, 89.2641);
        let h = t.to_horizontal(&polaris, t.now());
        assert!((h.elevation - 42.36).abs() < 1.0, "el = {}", h.elevation);
        assert!(h.azimuth < 2.0 || h.azimuth > 358.0, "az = {}", h.azimuth);
    }

    #[test]
    fn horizontal_round_trip() {
        let t = transform();
        let target = SkyPosition::galactic(30.0, 0.0);
        let h = t.to_horizontal(&target, t.now());
        let back = t.to_galactic(&SkyPosition::horizontal(h.azimuth, h.elevation), t.now());
        assert!((back.lon - 30.0).abs() < 1e-6, "l = {}", back.lon);
        assert!(back.lat.abs() < 1e-6, "b = {}", back.lat);
    }

    #[test]
    fn refraction_raises_apparent_elevation() {
        let env = RefractionEnvironment::new();
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 4, 0, 0).unwrap();
        let t = SiteTransform::new(SiteConfig::default(), env.clone()).with_fixed_time(at);
        let target = SkyPosition::equatorial(299.868, 40.7339);
        let dry = t.to_horizontal(&target, at);

        env.update(WeatherReading {
            temperature_c: 10.0,
            relative_humidity: 0.5,
            pressure_mbar: 1010.0,
        });
        let wet = t.to_horizontal(&target, at);
        assert!(wet.elevation > dry.elevation);
        assert!(wet.elevation - dry.elevation < 1.0);
        assert_eq!(t.environment().map(|w| w.pressure_mbar), Some(1010.0));
    }

    #[test]
    fn horizontal_targets_pass_through() {
        let t = transform();
        let h = t.to_horizontal(&SkyPosition::horizontal(90.0, 45.0), t.now());
        assert_eq!(h, HorizontalPosition::new(90.0, 45.0));
    }
}
