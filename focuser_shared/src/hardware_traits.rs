// Trait-based interface to the remote focuser board (shared by host and simulator)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Not connected to focuser board")]
    NotConnected,
    #[error("Timeout waiting for response to '{0}'")]
    Timeout(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed response: {0}")]
    Malformed(String),
    #[error("Board error: {0}")]
    Remote(String),
}

/// Axis status word as reported by the board.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisStatus {
    pub initialized: bool,
    pub running: bool,
    /// `true` when the axis moves outward (increasing position).
    pub direction: bool,
}

/// Where temperature samples come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemperatureSource {
    /// DS18B20 on the 1-wire bus of the board's host computer.
    #[default]
    OneWire,
    /// Analog sensor on FPGA pin 14.
    AnalogPin14,
    /// Analog sensor on FPGA pin 15.
    AnalogPin15,
}

impl TemperatureSource {
    /// ADC channel used by the board for analog sources.
    pub fn adc_channel(&self) -> Option<u32> {
        match self {
            TemperatureSource::OneWire => None,
            TemperatureSource::AnalogPin14 => Some(20),
            TemperatureSource::AnalogPin15 => Some(28),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TemperatureSource::OneWire => "1-wire (DS18B20)",
            TemperatureSource::AnalogPin14 => "FPGA analog pin 14",
            TemperatureSource::AnalogPin15 => "FPGA analog pin 15",
        }
    }
}

/// Stepper driver chip fitted to the board.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotorDriver {
    #[default]
    Drv8825,
    Tmc2226,
}

impl MotorDriver {
    /// Flag value the board expects for this driver.
    pub fn as_flag(&self) -> bool {
        matches!(self, MotorDriver::Tmc2226)
    }
}

/// Capability interface of the focuser board.
///
/// Methods returning `bool` report whether the board accepted the request;
/// transport problems are reported as `LinkError`. Implementations must bound
/// every call with a timeout so a dead board can never hang the caller.
#[async_trait]
pub trait HardwareLink: Send + Sync {
    async fn initialize(&self) -> Result<(), LinkError>;
    async fn axis_status(&self) -> Result<AxisStatus, LinkError>;
    async fn position(&self) -> Result<i32, LinkError>;
    async fn set_position(&self, ticks: i32) -> Result<(), LinkError>;
    async fn start_absolute_move(&self, target: i32, period_ticks: f64, direction: bool) -> Result<bool, LinkError>;
    async fn start_relative_move(&self, ticks: u32, period_ticks: f64, direction: bool) -> Result<bool, LinkError>;
    async fn stop(&self, hard: bool) -> Result<bool, LinkError>;
    async fn grid_per_revolution(&self) -> Result<u32, LinkError>;
    async fn set_grid_per_revolution(&self, value: u32) -> Result<bool, LinkError>;
    async fn home_position(&self) -> Result<i32, LinkError>;
    async fn timer_frequency_hz(&self) -> Result<f64, LinkError>;
    async fn min_period(&self) -> Result<u32, LinkError>;
    async fn max_period(&self) -> Result<u32, LinkError>;
    async fn set_backlash_period(&self, period_ticks: f64) -> Result<bool, LinkError>;
    async fn set_backlash_cycles(&self, cycles: u32) -> Result<bool, LinkError>;
    async fn enable_backlash(&self, enabled: bool) -> Result<bool, LinkError>;
    async fn set_motor_type(&self, tmc: bool) -> Result<bool, LinkError>;
    async fn set_debug(&self, enabled: bool) -> Result<bool, LinkError>;
    async fn temperature(&self, source: TemperatureSource) -> Result<f64, LinkError>;
}
