// src/motion/mod.rs - Motion state, limits and errors
pub mod controller;

pub use controller::MotionController;

use focuser_shared::{LinkError, StoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Error)]
pub enum MotionError {
    #[error("Focuser is moving, request rejected")]
    Busy,
    #[error("Target {target} outside {min}..={max}")]
    OutOfRange { target: i32, min: i32, max: i32 },
    #[error("Board declined to start motion")]
    Declined,
    #[error("Board declined '{0}'")]
    Refused(&'static str),
    #[error("Focuser is not connected")]
    NotConnected,
    #[error("Invalid setting: {0}")]
    Config(String),
    #[error("Link error: {0}")]
    Link(#[from] LinkError),
    #[error("Position store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inward,
    Outward,
}

impl Direction {
    pub fn from_outward(outward: bool) -> Self {
        if outward { Direction::Outward } else { Direction::Inward }
    }

    pub fn is_outward(self) -> bool {
        self == Direction::Outward
    }

    pub fn reversed(self) -> Self {
        match self {
            Direction::Inward => Direction::Outward,
            Direction::Outward => Direction::Inward,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MotionState {
    Idle,
    Busy { started_at: Instant, direction: Direction },
    /// A poll failed while motion was in flight; polling continues.
    Faulted { reason: String },
}

impl MotionState {
    pub fn is_idle(&self) -> bool {
        matches!(self, MotionState::Idle)
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, MotionState::Busy { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            MotionState::Idle => "idle",
            MotionState::Busy { .. } => "busy",
            MotionState::Faulted { .. } => "faulted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionKind {
    Absolute(i32),
    Relative(Direction, u32),
}

/// One motion request, consumed by `MotionController::submit`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionRequest {
    pub kind: MotionKind,
    pub speed_step_period_us: f64,
}

impl MotionRequest {
    pub fn absolute(target: i32, speed_step_period_us: f64) -> Self {
        Self { kind: MotionKind::Absolute(target), speed_step_period_us }
    }

    pub fn relative(direction: Direction, ticks: u32, speed_step_period_us: f64) -> Self {
        Self { kind: MotionKind::Relative(direction, ticks), speed_step_period_us }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveAccepted {
    Started,
    /// Target equals the confirmed position; nothing was sent to the board.
    AlreadyThere,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Idle,
    Running,
}

/// Position and step period bounds of one board connection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FocuserLimits {
    pub min_position: i32,
    pub max_position: i32,
    pub motor_period_us: f64,
    pub min_period_us: f64,
    pub max_period_us: f64,
}

impl FocuserLimits {
    /// Derive limits from the board's timer and period registers.
    pub fn derive(
        timer_frequency_hz: f64,
        min_period: u32,
        max_period: u32,
        max_position: u32,
    ) -> Result<Self, LinkError> {
        if !(timer_frequency_hz > 0.0) {
            return Err(LinkError::Malformed(format!(
                "timer frequency must be positive, got {}",
                timer_frequency_hz
            )));
        }
        let motor_period_us = 1e6 / timer_frequency_hz;
        let min_period_us = min_period as f64 * 3.0 * motor_period_us;
        let max_period_us = max_period as f64 * motor_period_us;
        if min_period_us > max_period_us {
            return Err(LinkError::Malformed(format!(
                "step period range is empty: {:.1}..{:.1} us",
                min_period_us, max_period_us
            )));
        }
        let max_position = i32::try_from(max_position)
            .map_err(|_| LinkError::Malformed(format!("grid per revolution too large: {}", max_position)))?;
        Ok(Self {
            min_position: 0,
            max_position,
            motor_period_us,
            min_period_us,
            max_period_us,
        })
    }

    pub fn contains(&self, position: i32) -> bool {
        (self.min_position..=self.max_position).contains(&position)
    }

    pub fn period_in_range(&self, period_us: f64) -> bool {
        (self.min_period_us..=self.max_period_us).contains(&period_us)
    }

    /// Convert a step period in microseconds to board timer ticks.
    pub fn period_ticks(&self, period_us: f64) -> f64 {
        period_us / self.motor_period_us
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_from_one_megahertz_timer() {
        let limits = FocuserLimits::derive(1_000_000.0, 5, 19000, 10000).unwrap();
        assert_eq!(limits.motor_period_us, 1.0);
        assert_eq!(limits.min_period_us, 15.0);
        assert_eq!(limits.max_period_us, 19000.0);
        assert_eq!(limits.max_position, 10000);
        assert!(limits.contains(0));
        assert!(limits.contains(10000));
        assert!(!limits.contains(-1));
        assert!(!limits.contains(10001));
        assert_eq!(limits.period_ticks(1000.0), 1000.0);
    }

    #[test]
    fn test_limits_reject_bad_registers() {
        assert!(FocuserLimits::derive(0.0, 5, 19000, 10000).is_err());
        assert!(FocuserLimits::derive(1_000_000.0, 10000, 100, 10000).is_err());
    }

    #[test]
    fn test_direction_reversal() {
        assert_eq!(Direction::Inward.reversed(), Direction::Outward);
        assert!(Direction::from_outward(true).is_outward());
    }
}
