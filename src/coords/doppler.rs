//! Frequency → radial velocity conversion.

/// Speed of light in km/s.
pub const C_KM_S: f64 = 2.998e5;

/// Solar orbital speed about the galactic center in km/s.
pub const V_SUN_KM_S: f64 = 220.0;

/// Radial velocity (km/s) of emission observed at `frequency` for a line at
/// `reference` toward galactic longitude `l_deg`.
///
/// Uses the radio Doppler convention and corrects for the Sun's motion around
/// the galactic center projected onto the line of sight.
pub fn radial_velocity(reference: f64, frequency: f64, l_deg: f64) -> f64 {
    let v_rec = (reference - frequency) * C_KM_S / reference;
    v_rec + V_SUN_KM_S * l_deg.to_radians().sin()
}

/// Velocity axis for a spectrum's channel frequencies.
pub fn velocity_axis(reference: f64, frequencies: &[f64], l_deg: f64) -> Vec<f64> {
    frequencies
        .iter()
        .map(|&f| radial_velocity(reference, f, l_deg))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rest_frequency_at_anticenter_is_zero() {
        assert!(radial_velocity(1420.406e6, 1420.406e6, 180.0).abs() < 1e-9);
    }

    #[test]
    fn lower_frequency_is_receding() {
        let v = radial_velocity(1420.406e6, 1420.0e6, 0.0);
        assert!(v > 80.0 && v < 90.0, "v = {v}");
    }

    #[test]
    fn solar_motion_toward_l90() {
        assert!((radial_velocity(1.0, 1.0, 90.0) - 220.0).abs() < 1e-9);
        let axis = velocity_axis(1.0, &[1.0, 1.0], 270.0);
        assert!(axis.iter().all(|v| (v + 220.0).abs() < 1e-9));
    }
}
