//! Spherical trigonometry helpers.
//!
//! All public functions take and return degrees.

use super::{wrap_360, Frame, SkyPosition};

/// Rows of the ICRS → Galactic rotation (J2000).
const EQ_TO_GAL: [[f64; 3]; 3] = [
    [-0.054_875_560_4, -0.873_437_090_2, -0.483_835_015_5],
    [0.494_109_427_9, -0.444_829_630_0, 0.746_982_244_5],
    [-0.867_666_149_0, -0.198_076_373_4, 0.455_983_776_2],
];

fn to_cartesian(lon_deg: f64, lat_deg: f64) -> [f64; 3] {
    let (lon, lat) = (lon_deg.to_radians(), lat_deg.to_radians());
    [lat.cos() * lon.cos(), lat.cos() * lon.sin(), lat.sin()]
}

fn from_cartesian(v: [f64; 3]) -> (f64, f64) {
    let lon = v[1].atan2(v[0]).to_degrees();
    let lat = v[2].clamp(-1.0, 1.0).asin().to_degrees();
    (wrap_360(lon), lat)
}

fn rotate(m: &[[f64; 3]; 3], v: [f64; 3], transpose: bool) -> [f64; 3] {
    let mut out = [0.0; 3];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = (0..3)
            .map(|j| if transpose { m[j][i] } else { m[i][j] } * v[j])
            .sum();
    }
    out
}

/// ICRS (ra, dec) → galactic (l, b).
pub fn equatorial_to_galactic(ra: f64, dec: f64) -> (f64, f64) {
    from_cartesian(rotate(&EQ_TO_GAL, to_cartesian(ra, dec), false))
}

/// Galactic (l, b) → ICRS (ra, dec).
pub fn galactic_to_equatorial(l: f64, b: f64) -> (f64, f64) {
    from_cartesian(rotate(&EQ_TO_GAL, to_cartesian(l, b), true))
}

/// Angular separation between two points in the same frame.
pub fn separation(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    let (lat1, lat2) = (lat1.to_radians(), lat2.to_radians());
    let dlon = (lon2 - lon1).to_radians();
    let cos_sep = lat1.sin() * lat2.sin() + lat1.cos() * lat2.cos() * dlon.cos();
    cos_sep.clamp(-1.0, 1.0).acos().to_degrees()
}

/// Move `distance` degrees from `(lon, lat)` along position angle `posang`
/// (degrees east of north). Returns the new `(lon, lat)`.
///
/// Solves the spherical triangle with vertices at the pole (A), the start (B)
/// and the destination (C) using the cosine rule for the new co-latitude and
/// both rules together for the longitude change, so `atan2` picks the quadrant.
pub fn offset_by(lon: f64, lat: f64, posang: f64, distance: f64) -> (f64, f64) {
    let (lat_r, posang_r, dist_r) = (lat.to_radians(), posang.to_radians(), distance.to_radians());

    let cos_a = dist_r.cos();
    let sin_a = dist_r.sin();
    let cos_c = lat_r.sin();
    let sin_c = lat_r.cos();
    let cos_b_angle = posang_r.cos();
    let sin_b_angle = posang_r.sin();

    let cos_b = cos_c * cos_a + sin_c * sin_a * cos_b_angle;
    // both terms scaled by sin_b * sin_c so the poles do not divide by zero
    let xsin_a = sin_a * sin_b_angle * sin_c;
    let xcos_a = cos_a - cos_b * cos_c;

    let delta_lon = if sin_c < 1e-12 {
        // At a pole the longitude change is set by the position angle alone.
        std::f64::consts::FRAC_PI_2 + cos_c * (std::f64::consts::FRAC_PI_2 - posang_r)
    } else {
        xsin_a.atan2(xcos_a)
    };

    let out_lon = wrap_360(lon + delta_lon.to_degrees());
    let out_lat = cos_b.clamp(-1.0, 1.0).asin().to_degrees();
    (out_lon, out_lat)
}

/// [`offset_by`] for a [`SkyPosition`], keeping its frame.
pub fn directional_offset(position: &SkyPosition, posang: f64, distance: f64) -> SkyPosition {
    let (lon, lat) = offset_by(position.lon, position.lat, posang, distance);
    SkyPosition::new(position.frame, lon, lat)
}

/// Re-express a position in `target`, for the frames that need no site or time.
/// Returns `None` when a horizontal frame is involved.
pub fn convert_fixed(position: &SkyPosition, target: Frame) -> Option<SkyPosition> {
    match (position.frame, target) {
        (a, b) if a == b => Some(*position),
        (Frame::Equatorial, Frame::Galactic) => {
            let (l, b) = equatorial_to_galactic(position.lon, position.lat);
            Some(SkyPosition::galactic(l, b))
        }
        (Frame::Galactic, Frame::Equatorial) => {
            let (ra, dec) = galactic_to_equatorial(position.lon, position.lat);
            Some(SkyPosition::equatorial(ra, dec))
        }
        _ => None,
    }
}
