//! # Focuser Configuration
//!
//! All settings of a focuser instance live in one TOML file. Every section is
//! optional and falls back to the defaults below.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [device]
//! name = "FPGA Focuser"
//!
//! [link]
//! host = "192.168.1.40"
//! port = 36000
//! timeout_ms = 2000
//!
//! [motion]
//! speed_us = 1000.0
//! reverse = false
//!
//! [backlash]
//! enabled = true
//! step_count = 40
//! period_us = 45.0
//!
//! [thermal]
//! compensation = true
//! coefficient = 12.0
//! source = "analog_pin14"
//!
//! [optics]
//! aperture_mm = 200.0
//! focal_length_mm = 1400.0
//! travel_mm = 10.0
//!
//! [presets]
//! positions = [1200, 4800, 9000]
//! ```

use crate::hardware_traits::{MotorDriver, TemperatureSource};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Number of stored focus presets.
pub const PRESET_COUNT: usize = 3;

/// Upper bound of the thermal coefficient, in µm per metre of focal length per °C.
pub const MAX_TEMPERATURE_COEFFICIENT: f64 = 50.0;

/// Main configuration struct for one focuser instance.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub motion: MotionConfig,
    #[serde(default)]
    pub backlash: BacklashConfig,
    #[serde(default)]
    pub thermal: ThermalConfig,
    #[serde(default)]
    pub optics: OpticsConfig,
    #[serde(default)]
    pub board: BoardConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub presets: PresetsConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DeviceConfig {
    #[serde(default = "default_device_name")]
    pub name: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self { name: default_device_name() }
    }
}

/// Where the focuser board's command server listens.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LinkConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MotionConfig {
    /// Step period used for moves, in microseconds.
    #[serde(default = "default_speed_us")]
    pub speed_us: f64,
    #[serde(default)]
    pub reverse: bool,
    /// Overrides the board's grid-per-revolution as the travel limit in steps.
    #[serde(default)]
    pub max_position: Option<u32>,
    #[serde(default = "default_status_poll_ms")]
    pub status_poll_ms: u64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            speed_us: default_speed_us(),
            reverse: false,
            max_position: None,
            status_poll_ms: default_status_poll_ms(),
        }
    }
}

/// Backlash compensation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct BacklashConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub step_count: u32,
    #[serde(default = "default_backlash_period_us")]
    pub period_us: f64,
}

impl Default for BacklashConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            step_count: 0,
            period_us: default_backlash_period_us(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ThermalConfig {
    #[serde(default)]
    pub compensation: bool,
    /// µm of focus shift per metre of focal length per °C.
    #[serde(default)]
    pub coefficient: f64,
    #[serde(default)]
    pub source: TemperatureSource,
    #[serde(default = "default_thermal_interval_secs")]
    pub sample_interval_secs: u64,
    #[serde(default = "default_thermal_interval_secs")]
    pub compensation_interval_secs: u64,
}

impl Default for ThermalConfig {
    fn default() -> Self {
        Self {
            compensation: false,
            coefficient: 0.0,
            source: TemperatureSource::default(),
            sample_interval_secs: default_thermal_interval_secs(),
            compensation_interval_secs: default_thermal_interval_secs(),
        }
    }
}

/// Telescope optics and focuser mechanics used for the focus zone.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct OpticsConfig {
    #[serde(default)]
    pub aperture_mm: f64,
    #[serde(default)]
    pub focal_length_mm: f64,
    #[serde(default = "default_travel_mm")]
    pub travel_mm: f64,
}

impl Default for OpticsConfig {
    fn default() -> Self {
        Self {
            aperture_mm: 0.0,
            focal_length_mm: 0.0,
            travel_mm: default_travel_mm(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
pub struct BoardConfig {
    #[serde(default)]
    pub motor: MotorDriver,
    #[serde(default)]
    pub debug: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Directory holding `<device>.position`; resolved from the environment when unset.
    #[serde(default)]
    pub position_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WebConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self { listen: default_listen() }
    }
}

/// Named focus positions, in steps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
pub struct PresetsConfig {
    #[serde(default)]
    pub positions: [i32; PRESET_COUNT],
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.name.trim().is_empty() {
            return Err(ConfigError::Invalid("device name cannot be empty".to_string()));
        }
        if self.link.port == 0 {
            return Err(ConfigError::Invalid("link port must be > 0".to_string()));
        }
        if self.link.timeout_ms == 0 {
            return Err(ConfigError::Invalid("link timeout must be > 0".to_string()));
        }
        if !(self.motion.speed_us > 0.0) {
            return Err(ConfigError::Invalid("motion speed must be > 0 us".to_string()));
        }
        if self.motion.status_poll_ms == 0 {
            return Err(ConfigError::Invalid("status poll interval must be > 0".to_string()));
        }
        if self.motion.max_position == Some(0) {
            return Err(ConfigError::Invalid("max position must be > 0".to_string()));
        }
        if !(self.backlash.period_us > 0.0) {
            return Err(ConfigError::Invalid("backlash period must be > 0 us".to_string()));
        }
        let coefficient = self.thermal.coefficient;
        if !(0.0..=MAX_TEMPERATURE_COEFFICIENT).contains(&coefficient) {
            return Err(ConfigError::Invalid(format!(
                "temperature coefficient {} outside 0..={}",
                coefficient, MAX_TEMPERATURE_COEFFICIENT
            )));
        }
        if self.thermal.sample_interval_secs == 0 || self.thermal.compensation_interval_secs == 0 {
            return Err(ConfigError::Invalid("thermal intervals must be > 0".to_string()));
        }
        if !(self.optics.travel_mm > 0.0) {
            return Err(ConfigError::Invalid("focuser travel must be > 0 mm".to_string()));
        }
        if self.optics.aperture_mm < 0.0 || self.optics.focal_length_mm < 0.0 {
            return Err(ConfigError::Invalid("optical parameters cannot be negative".to_string()));
        }
        let max_position = self.motion.max_position.map(i64::from);
        for (index, &position) in self.presets.positions.iter().enumerate() {
            if position < 0 || max_position.is_some_and(|max| i64::from(position) > max) {
                return Err(ConfigError::Invalid(format!(
                    "preset {} at {} is outside the focuser travel",
                    index, position
                )));
            }
        }
        Ok(())
    }
}

fn default_device_name() -> String { "FPGA Focuser".to_string() }
fn default_host() -> String { "127.0.0.1".to_string() }
fn default_port() -> u16 { 36000 }
fn default_timeout_ms() -> u64 { 2000 }
fn default_speed_us() -> f64 { 1000.0 }
fn default_status_poll_ms() -> u64 { 2000 }
fn default_backlash_period_us() -> f64 { 45.0 }
fn default_thermal_interval_secs() -> u64 { 60 }
fn default_travel_mm() -> f64 { 10.0 }
fn default_listen() -> String { "127.0.0.1:8624".to_string() }

pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&contents).map_err(|e| {
        tracing::error!("Failed to parse config TOML {}: {}", path.display(), e);
        ConfigError::Toml(e)
    })?;
    config.validate()?;
    Ok(config)
}

pub fn save_config(path: impl AsRef<Path>, config: &Config) -> Result<(), ConfigError> {
    let toml_string = toml::to_string(config)?;
    std::fs::write(path, toml_string)?;
    Ok(())
}
