// src/thermal.rs - Temperature drift compensation decisions
use focuser_shared::config::{MAX_TEMPERATURE_COEFFICIENT, ThermalConfig};
use thiserror::Error;

use crate::focus_zone::FocusZoneMetrics;

#[derive(Debug, Error)]
pub enum ThermalError {
    #[error("Temperature coefficient {0} outside 0..=50 um/m/C")]
    CoefficientOutOfRange(f64),
    #[error("Focal length {0} mm cannot be negative")]
    InvalidFocalLength(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThermalDecision {
    /// Compensation is off or no sample could be taken.
    Skipped,
    /// Temperature equals the motion anchor.
    NoChange,
    WithinTolerance { expansion_um: f64, delta_c: f64 },
    Adjust { steps: i32, expansion_um: f64, delta_c: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThermalCompensator {
    enabled: bool,
    /// Tube expansion in um per metre of focal length per degree C.
    coefficient: f64,
    focal_length_mm: f64,
}

impl ThermalCompensator {
    pub fn new(config: &ThermalConfig, focal_length_mm: f64) -> Self {
        Self {
            enabled: config.compensation,
            coefficient: config.coefficient,
            focal_length_mm,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        tracing::info!("Temperature compensation {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn coefficient(&self) -> f64 {
        self.coefficient
    }

    pub fn set_coefficient(&mut self, coefficient: f64) -> Result<(), ThermalError> {
        if !(0.0..=MAX_TEMPERATURE_COEFFICIENT).contains(&coefficient) {
            return Err(ThermalError::CoefficientOutOfRange(coefficient));
        }
        self.coefficient = coefficient;
        Ok(())
    }

    pub fn focal_length_mm(&self) -> f64 {
        self.focal_length_mm
    }

    pub fn set_focal_length(&mut self, focal_length_mm: f64) -> Result<(), ThermalError> {
        if !(focal_length_mm >= 0.0) {
            return Err(ThermalError::InvalidFocalLength(focal_length_mm));
        }
        self.focal_length_mm = focal_length_mm;
        Ok(())
    }

    /// Optical path change for a temperature change of `delta_c`.
    pub fn expansion_um(&self, delta_c: f64) -> f64 {
        self.coefficient * self.focal_length_mm / 1000.0 * delta_c
    }

    /// Decide whether drift from `last_c` to `current_c` needs a move.
    ///
    /// Moves only when the expansion exceeds half the CFZ, by
    /// `round(expansion / step_size / 2)` steps.
    pub fn evaluate(&self, current_c: f64, last_c: f64, zone: &FocusZoneMetrics) -> ThermalDecision {
        if current_c == last_c {
            return ThermalDecision::NoChange;
        }
        let delta_c = current_c - last_c;
        let expansion_um = self.expansion_um(delta_c);
        if zone.is_indeterminate() || expansion_um.abs() <= zone.cfz_um / 2.0 {
            return ThermalDecision::WithinTolerance { expansion_um, delta_c };
        }
        let steps = ((expansion_um / zone.step_size_um) / 2.0).round() as i32;
        ThermalDecision::Adjust { steps, expansion_um, delta_c }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::focus_zone;

    fn compensator(coefficient: f64, focal_length_mm: f64) -> ThermalCompensator {
        let config = ThermalConfig {
            compensation: true,
            coefficient,
            ..Default::default()
        };
        ThermalCompensator::new(&config, focal_length_mm)
    }

    #[test]
    fn test_expansion_formula() {
        let thermal = compensator(20.0, 1400.0);
        assert!((thermal.expansion_um(1.0) - 28.0).abs() < 1e-9);
        assert!((thermal.expansion_um(-2.5) + 70.0).abs() < 1e-9);
    }

    #[test]
    fn test_coefficient_range() {
        let mut thermal = compensator(0.0, 1400.0);
        assert!(thermal.set_coefficient(50.0).is_ok());
        assert!(thermal.set_coefficient(50.1).is_err());
        assert!(thermal.set_coefficient(-1.0).is_err());
        assert_eq!(thermal.coefficient(), 50.0);
    }

    #[test]
    fn test_coarse_steps_round_to_zero_adjustment() {
        let thermal = compensator(20.0, 1400.0);
        // 100 um steps: 84 um of drift is past half the CFZ but rounds to no steps
        let zone = focus_zone::compute(200.0, 1400.0, 10.0, 100);
        let decision = thermal.evaluate(13.0, 10.0, &zone);
        assert!(matches!(decision, ThermalDecision::Adjust { steps: 0, .. }));
    }

    #[test]
    fn test_indeterminate_zone_never_adjusts() {
        let thermal = compensator(20.0, 1400.0);
        let zone = focus_zone::compute(0.0, 1400.0, 10.0, 10000);
        let decision = thermal.evaluate(30.0, 10.0, &zone);
        assert!(matches!(decision, ThermalDecision::WithinTolerance { .. }));
    }
}
