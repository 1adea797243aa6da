// src/hardware/temperature.rs
use focuser_shared::{HardwareLink, LinkError, TemperatureSource};
use thiserror::Error;

pub const MIN_VALID_TEMPERATURE_C: f64 = -99.0;
pub const MAX_VALID_TEMPERATURE_C: f64 = 100.0;

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("Invalid temperature {value} C from {source_label}")]
    Fault { value: f64, source_label: &'static str },
    #[error("Link error: {0}")]
    Link(#[from] LinkError),
}

pub fn is_plausible(celsius: f64) -> bool {
    (MIN_VALID_TEMPERATURE_C..=MAX_VALID_TEMPERATURE_C).contains(&celsius)
}

/// Reads the selected temperature source and screens out sensor faults.
#[derive(Debug, Clone)]
pub struct TemperatureSensor {
    source: TemperatureSource,
}

impl TemperatureSensor {
    pub fn new(source: TemperatureSource) -> Self {
        Self { source }
    }

    pub fn source(&self) -> TemperatureSource {
        self.source
    }

    pub fn set_source(&mut self, source: TemperatureSource) {
        if source != self.source {
            tracing::info!("Temperature source set to {}", source.label());
            self.source = source;
        }
    }

    pub async fn read(&mut self, link: &dyn HardwareLink) -> Result<f64, SensorError> {
        let value = link.temperature(self.source).await?;
        if !is_plausible(value) {
            tracing::error!("Invalid temperature {} from {}", value, self.source.label());
            return Err(SensorError::Fault { value, source_label: self.source.label() });
        }
        tracing::debug!("Temperature {:.2} C from {}", value, self.source.label());
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plausible_range() {
        assert!(is_plausible(-99.0));
        assert!(is_plausible(100.0));
        assert!(is_plausible(21.5));
        assert!(!is_plausible(-99.5));
        assert!(!is_plausible(100.1));
        assert!(!is_plausible(f64::NAN));
    }
}
