// src/config.rs
pub use focuser_shared::config::*;
