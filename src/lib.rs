// src/lib.rs - Motorized focuser controller
pub mod backlash;
pub mod config;
pub mod events;
pub mod focus_zone;
pub mod focuser;
pub mod hardware;
pub mod motion;
pub mod scheduler;
pub mod thermal;
pub mod web;

pub use config::Config;
pub use events::FocuserEvent;
pub use focuser::{Focuser, FocuserError, FocuserStatus};
pub use hardware::BoardLink;
pub use motion::{Direction, MotionController, MotionError, MotionState, MoveAccepted};
