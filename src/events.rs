// src/events.rs - Notifications published by a Focuser
use serde::Serialize;

use crate::focus_zone::FocusZoneMetrics;
use crate::focuser::FocuserStatus;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum FocuserEvent {
    Connected,
    Disconnected,
    StatusChanged(FocuserStatus),
    PositionChanged(i32),
    TemperatureChanged(f64),
    /// A reading outside the plausible range; it was not applied.
    SensorFault(f64),
    FocusZoneChanged(FocusZoneMetrics),
    Compensated { steps: i32, delta_c: f64 },
}
