// src/backlash.rs - Backlash compensation settings pushed to the board
use focuser_shared::config::BacklashConfig;
use focuser_shared::{HardwareLink, LinkError};
use thiserror::Error;

use crate::motion::FocuserLimits;

#[derive(Debug, Error)]
pub enum BacklashError {
    #[error("Backlash period {period_us} us outside {min_us:.1}..{max_us:.1} us")]
    PeriodOutOfRange { period_us: f64, min_us: f64, max_us: f64 },
    #[error("Board declined '{0}'")]
    Declined(&'static str),
    #[error("Link error: {0}")]
    Link(#[from] LinkError),
}

/// Local copy of the backlash registers. Only committed once the board accepted them.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BacklashModel {
    config: BacklashConfig,
}

impl BacklashModel {
    pub fn new(config: BacklashConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> BacklashConfig {
        self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub async fn set_config(
        &mut self,
        link: &dyn HardwareLink,
        limits: &FocuserLimits,
        step_count: u32,
        period_us: f64,
    ) -> Result<(), BacklashError> {
        check_period(limits, period_us)?;
        push_registers(link, limits, step_count, period_us).await?;
        if self.config.enabled && !link.enable_backlash(true).await? {
            return Err(BacklashError::Declined("enable backlash"));
        }
        self.config.step_count = step_count;
        self.config.period_us = period_us;
        tracing::info!("Backlash set to {} steps at {} us", step_count, period_us);
        Ok(())
    }

    pub async fn set_enabled(&mut self, link: &dyn HardwareLink, enabled: bool) -> Result<(), BacklashError> {
        if !link.enable_backlash(enabled).await? {
            return Err(BacklashError::Declined("enable backlash"));
        }
        self.config.enabled = enabled;
        tracing::info!("Backlash compensation {}", if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    /// Push the whole configuration, used right after connecting.
    pub async fn apply(&self, link: &dyn HardwareLink, limits: &FocuserLimits) -> Result<(), BacklashError> {
        check_period(limits, self.config.period_us)?;
        push_registers(link, limits, self.config.step_count, self.config.period_us).await?;
        if !link.enable_backlash(self.config.enabled).await? {
            return Err(BacklashError::Declined("enable backlash"));
        }
        Ok(())
    }
}

fn check_period(limits: &FocuserLimits, period_us: f64) -> Result<(), BacklashError> {
    if !limits.period_in_range(period_us) {
        tracing::warn!(
            "Backlash period {} us outside {:.1}..{:.1} us",
            period_us,
            limits.min_period_us,
            limits.max_period_us
        );
        return Err(BacklashError::PeriodOutOfRange {
            period_us,
            min_us: limits.min_period_us,
            max_us: limits.max_period_us,
        });
    }
    Ok(())
}

async fn push_registers(
    link: &dyn HardwareLink,
    limits: &FocuserLimits,
    step_count: u32,
    period_us: f64,
) -> Result<(), BacklashError> {
    if !link.set_backlash_period(limits.period_ticks(period_us)).await? {
        return Err(BacklashError::Declined("set backlash period"));
    }
    if !link.set_backlash_cycles(step_count).await? {
        return Err(BacklashError::Declined("set backlash cycles"));
    }
    Ok(())
}
