// src/focus_zone.rs - Critical focus zone arithmetic
use serde::{Deserialize, Serialize};

/// Green light, the wavelength the CFZ rule of thumb is quoted for.
pub const REFERENCE_WAVELENGTH_UM: f64 = 0.520;
const CFZ_FACTOR: f64 = 4.88;

/// How many focuser steps fit into the critical focus zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusQuality {
    Good,
    Marginal,
    Poor,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FocusZoneMetrics {
    pub f_ratio: f64,
    pub step_size_um: f64,
    pub cfz_um: f64,
    pub steps_per_cfz: f64,
}

impl FocusZoneMetrics {
    /// Banding on steps per CFZ: at least 4 is good, above 2 marginal.
    pub fn quality(&self) -> FocusQuality {
        if self.steps_per_cfz >= 4.0 {
            FocusQuality::Good
        } else if self.steps_per_cfz > 2.0 {
            FocusQuality::Marginal
        } else {
            FocusQuality::Poor
        }
    }

    /// A zero CFZ means the optics are unknown, not that focus is perfect.
    pub fn is_indeterminate(&self) -> bool {
        self.cfz_um <= 0.0 || self.step_size_um <= 0.0
    }
}

/// Derive the focus zone metrics from the optical train and focuser travel.
pub fn compute(aperture_mm: f64, focal_length_mm: f64, travel_mm: f64, max_position_steps: i32) -> FocusZoneMetrics {
    let f_ratio = if aperture_mm * focal_length_mm == 0.0 {
        0.0
    } else {
        focal_length_mm / aperture_mm
    };
    let cfz_um = CFZ_FACTOR * REFERENCE_WAVELENGTH_UM * f_ratio * f_ratio;
    let step_size_um = if max_position_steps == 0 {
        0.0
    } else {
        1000.0 * travel_mm / max_position_steps as f64
    };
    let steps_per_cfz = if step_size_um == 0.0 {
        0.0
    } else {
        cfz_um.floor() / step_size_um
    };
    FocusZoneMetrics {
        f_ratio,
        step_size_um,
        cfz_um,
        steps_per_cfz,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f7_refractor_on_10000_steps() {
        let zone = compute(200.0, 1400.0, 10.0, 10000);
        assert_eq!(zone.f_ratio, 7.0);
        assert!((zone.cfz_um - 4.88 * 0.520 * 49.0).abs() < 1e-9);
        assert!((zone.step_size_um - 1.0).abs() < 1e-12);
        assert_eq!(zone.steps_per_cfz, 124.0);
        assert_eq!(zone.quality(), FocusQuality::Good);
        assert!(!zone.is_indeterminate());
    }

    #[test]
    fn test_zero_aperture_is_indeterminate() {
        let zone = compute(0.0, 1400.0, 10.0, 10000);
        assert_eq!(zone.f_ratio, 0.0);
        assert_eq!(zone.cfz_um, 0.0);
        assert_eq!(zone.steps_per_cfz, 0.0);
        assert!(zone.is_indeterminate());
    }

    #[test]
    fn test_zero_max_position_gives_zero_step_size() {
        let zone = compute(200.0, 1400.0, 10.0, 0);
        assert_eq!(zone.step_size_um, 0.0);
        assert_eq!(zone.steps_per_cfz, 0.0);
        assert_eq!(zone.quality(), FocusQuality::Poor);
    }

    #[test]
    fn test_quality_bands() {
        let mut zone = compute(100.0, 500.0, 40.0, 1000);
        // f/5: CFZ 63.44 um, 40 um per step
        assert!(zone.steps_per_cfz < 2.0);
        assert_eq!(zone.quality(), FocusQuality::Poor);
        zone.steps_per_cfz = 3.0;
        assert_eq!(zone.quality(), FocusQuality::Marginal);
        zone.steps_per_cfz = 2.0;
        assert_eq!(zone.quality(), FocusQuality::Poor);
        zone.steps_per_cfz = 4.0;
        assert_eq!(zone.quality(), FocusQuality::Good);
    }

    #[test]
    fn test_compute_is_pure() {
        let first = compute(80.0, 480.0, 25.0, 20000);
        let second = compute(80.0, 480.0, 25.0, 20000);
        assert_eq!(first, second);
    }
}
