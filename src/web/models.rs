//! Contains the data models for API requests and responses.

use serde::{Deserialize, Serialize};

use crate::motion::{Direction, MoveAccepted};

#[derive(Debug, Deserialize)]
pub struct MoveAbsoluteRequest {
    pub target: i32,
}

#[derive(Debug, Deserialize)]
pub struct MoveRelativeRequest {
    pub direction: Direction,
    pub ticks: u32,
}

#[derive(Debug, Deserialize)]
pub struct SyncRequest {
    pub ticks: i32,
}

#[derive(Debug, Deserialize)]
pub struct BacklashRequest {
    pub steps: u32,
    pub period_us: f64,
}

#[derive(Debug, Deserialize)]
pub struct PresetRequest {
    pub position: i32,
}

/// Body of the on/off switches.
#[derive(Debug, Deserialize)]
pub struct EnabledRequest {
    pub enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct MoveResponse {
    pub result: MoveAccepted,
}

#[derive(Debug, Serialize)]
pub struct PresetsResponse {
    pub positions: Vec<i32>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
