// src/motion/controller.rs - Focuser motion state machine
use std::sync::Arc;

use focuser_shared::config::MotionConfig;
use focuser_shared::{HardwareLink, LinkError, MotorDriver, PositionStore};
use tokio::time::Instant;

use super::{
    Direction, FocuserLimits, MotionError, MotionKind, MotionRequest, MotionState, MoveAccepted,
    PollOutcome,
};

/// Serializes motion against one board.
///
/// All methods take `&mut self`; the owning `Focuser` keeps the controller
/// behind its single mutex, so no two transitions ever interleave.
pub struct MotionController {
    link: Arc<dyn HardwareLink>,
    store: PositionStore,
    limits: FocuserLimits,
    state: MotionState,
    position: i32,
    initialized: bool,
    speed_us: f64,
    reverse: bool,
    /// Most recent valid temperature sample.
    temperature_c: Option<f64>,
    /// Temperature when the focuser last moved; compensation measures drift from here.
    last_motion_temperature_c: Option<f64>,
}

impl MotionController {
    /// Bring up the board and seed the controller from it and the position store.
    pub async fn connect(
        link: Arc<dyn HardwareLink>,
        store: PositionStore,
        settings: &MotionConfig,
    ) -> Result<Self, MotionError> {
        let status = link.axis_status().await?;
        if !status.initialized {
            tracing::info!("Focuser board not initialized, initializing");
            link.initialize().await?;
        }

        let mut grid = link.grid_per_revolution().await?;
        if let Some(max_position) = settings.max_position {
            if max_position != grid {
                if !link.set_grid_per_revolution(max_position).await? {
                    return Err(MotionError::Refused("set grid per revolution"));
                }
                grid = max_position;
            }
        }
        let limits = FocuserLimits::derive(
            link.timer_frequency_hz().await?,
            link.min_period().await?,
            link.max_period().await?,
            grid,
        )?;
        tracing::info!(
            "Focuser limits: position {}..={}, step period {:.1}..{:.1} us",
            limits.min_position,
            limits.max_position,
            limits.min_period_us,
            limits.max_period_us
        );

        let hardware_position = link.position().await?;
        let position = match store.load().await {
            Ok(Some(stored)) if limits.contains(stored) => {
                link.set_position(stored).await?;
                tracing::info!("Restored focuser position {} from {}", stored, store.path().display());
                stored
            }
            Ok(Some(stored)) => {
                tracing::warn!(
                    "Stored position {} outside {}..={}, using hardware position {}",
                    stored,
                    limits.min_position,
                    limits.max_position,
                    hardware_position
                );
                hardware_position
            }
            Ok(None) => hardware_position,
            Err(e) => {
                tracing::warn!("Could not read stored position: {}", e);
                hardware_position
            }
        };

        let speed_us = settings.speed_us.clamp(limits.min_period_us, limits.max_period_us);
        if speed_us != settings.speed_us {
            tracing::warn!(
                "Configured speed {} us outside {:.1}..{:.1} us, using {:.1} us",
                settings.speed_us,
                limits.min_period_us,
                limits.max_period_us,
                speed_us
            );
        }

        Ok(Self {
            link,
            store,
            limits,
            state: MotionState::Idle,
            position,
            initialized: true,
            speed_us,
            reverse: settings.reverse,
            temperature_c: None,
            last_motion_temperature_c: None,
        })
    }

    pub fn link(&self) -> &Arc<dyn HardwareLink> {
        &self.link
    }

    pub fn store(&self) -> &PositionStore {
        &self.store
    }

    pub fn limits(&self) -> &FocuserLimits {
        &self.limits
    }

    pub fn state(&self) -> &MotionState {
        &self.state
    }

    /// Last position confirmed by the board.
    pub fn position(&self) -> i32 {
        self.position
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn speed_us(&self) -> f64 {
        self.speed_us
    }

    pub fn reverse(&self) -> bool {
        self.reverse
    }

    pub fn temperature(&self) -> Option<f64> {
        self.temperature_c
    }

    pub fn last_motion_temperature(&self) -> Option<f64> {
        self.last_motion_temperature_c
    }

    fn motion_in_flight(&self) -> bool {
        !self.state.is_idle()
    }

    /// Read the axis status and position and fold them into the state.
    pub async fn poll_status(&mut self) -> Result<PollOutcome, MotionError> {
        let (status, position) = match self.read_status().await {
            Ok(reading) => reading,
            Err(e) => {
                if self.motion_in_flight() {
                    tracing::error!("Status poll failed while moving: {}", e);
                    self.state = MotionState::Faulted { reason: e.to_string() };
                }
                return Err(e.into());
            }
        };
        self.initialized = status.initialized;
        self.position = position;

        if status.running {
            let direction = Direction::from_outward(status.direction);
            match &mut self.state {
                MotionState::Busy { direction: current, .. } => *current = direction,
                _ => {
                    tracing::debug!("Board reports motion {:?} at {}", direction, position);
                    self.state = MotionState::Busy { started_at: Instant::now(), direction };
                }
            }
            return Ok(PollOutcome::Running);
        }

        let was_moving = self.motion_in_flight();
        self.state = MotionState::Idle;
        if was_moving {
            tracing::info!("Focuser motion finished at {}", position);
            self.store.save(position).await?;
        }
        Ok(PollOutcome::Idle)
    }

    async fn read_status(&self) -> Result<(focuser_shared::AxisStatus, i32), LinkError> {
        let status = self.link.axis_status().await?;
        let position = self.link.position().await?;
        Ok((status, position))
    }

    pub async fn move_absolute(&mut self, target: i32) -> Result<MoveAccepted, MotionError> {
        self.submit(MotionRequest::absolute(target, self.speed_us)).await
    }

    pub async fn move_relative(&mut self, direction: Direction, ticks: u32) -> Result<MoveAccepted, MotionError> {
        self.submit(MotionRequest::relative(direction, ticks, self.speed_us)).await
    }

    /// Validate and start one motion request.
    ///
    /// Requests that can be answered locally (out of range, already there,
    /// zero ticks) never reach the board while the focuser is idle.
    pub async fn submit(&mut self, request: MotionRequest) -> Result<MoveAccepted, MotionError> {
        let mut synced = false;
        if self.motion_in_flight() {
            synced = true;
            if self.poll_status().await? == PollOutcome::Running {
                tracing::warn!("Focuser still moving, rejecting {:?}", request.kind);
                return Err(MotionError::Busy);
            }
        }

        match request.kind {
            MotionKind::Absolute(target) => {
                if !self.limits.contains(target) {
                    tracing::warn!(
                        "Requested position {} outside {}..={}",
                        target,
                        self.limits.min_position,
                        self.limits.max_position
                    );
                    return Err(MotionError::OutOfRange {
                        target,
                        min: self.limits.min_position,
                        max: self.limits.max_position,
                    });
                }
                if target == self.position {
                    tracing::info!("Focuser already at {}", target);
                    return Ok(MoveAccepted::AlreadyThere);
                }
                if !synced {
                    self.ensure_not_running().await?;
                    if target == self.position {
                        tracing::info!("Focuser already at {}", target);
                        return Ok(MoveAccepted::AlreadyThere);
                    }
                }
                let direction = Direction::from_outward(target > self.position);
                let period_ticks = self.limits.period_ticks(request.speed_step_period_us);
                if !self.link.start_absolute_move(target, period_ticks, direction.is_outward()).await? {
                    tracing::warn!("Board declined move to {}", target);
                    return Err(MotionError::Declined);
                }
                self.begin_motion(direction);
                tracing::info!("Moving focuser from {} to {}", self.position, target);
            }
            MotionKind::Relative(direction, ticks) => {
                if ticks == 0 {
                    return Ok(MoveAccepted::AlreadyThere);
                }
                if !synced {
                    self.ensure_not_running().await?;
                }
                let direction = if self.reverse { direction.reversed() } else { direction };
                let period_ticks = self.limits.period_ticks(request.speed_step_period_us);
                if !self.link.start_relative_move(ticks, period_ticks, direction.is_outward()).await? {
                    tracing::warn!("Board declined relative move of {} ticks", ticks);
                    return Err(MotionError::Declined);
                }
                self.begin_motion(direction);
                tracing::info!("Moving focuser {} ticks {:?}", ticks, direction);
            }
        }
        Ok(MoveAccepted::Started)
    }

    async fn ensure_not_running(&mut self) -> Result<(), MotionError> {
        if self.poll_status().await? == PollOutcome::Running {
            tracing::warn!("Focuser moved externally, rejecting request");
            return Err(MotionError::Busy);
        }
        Ok(())
    }

    fn begin_motion(&mut self, direction: Direction) {
        self.state = MotionState::Busy { started_at: Instant::now(), direction };
        if let Some(t) = self.temperature_c {
            self.last_motion_temperature_c = Some(t);
        }
    }

    /// Redefine the current position without moving.
    pub async fn sync(&mut self, ticks: i32) -> Result<(), MotionError> {
        self.link.set_position(ticks).await?;
        self.poll_status().await?;
        self.store.save(self.position).await?;
        tracing::info!("Focuser position synced to {}", self.position);
        Ok(())
    }

    /// Ask the board to stop. State only changes on the next poll.
    pub async fn abort(&mut self) -> Result<(), MotionError> {
        if !self.link.stop(false).await? {
            tracing::warn!("Board declined stop");
            return Err(MotionError::Refused("stop"));
        }
        tracing::info!("Focuser motion aborted");
        Ok(())
    }

    /// Move to the board's home position and record zero.
    pub async fn reset_to_home(&mut self) -> Result<MoveAccepted, MotionError> {
        let home = self.link.home_position().await?;
        let accepted = self.move_absolute(home).await?;
        self.store.save(0).await?;
        tracing::info!("Focuser returning home to {}", home);
        Ok(accepted)
    }

    pub async fn set_max_position(&mut self, value: u32) -> Result<(), MotionError> {
        let max_position = i32::try_from(value)
            .ok()
            .filter(|v| *v > self.limits.min_position)
            .ok_or_else(|| MotionError::Config(format!("max position {} not usable", value)))?;
        if self.position > max_position {
            self.link.set_position(max_position).await?;
            self.position = max_position;
        }
        if !self.link.set_grid_per_revolution(value).await? {
            return Err(MotionError::Refused("set grid per revolution"));
        }
        self.limits.max_position = max_position;
        tracing::info!("Focuser max position set to {}", max_position);
        Ok(())
    }

    pub fn set_speed(&mut self, speed_us: f64) -> Result<(), MotionError> {
        if !self.limits.period_in_range(speed_us) {
            return Err(MotionError::Config(format!(
                "speed {} us outside {:.1}..{:.1} us",
                speed_us, self.limits.min_period_us, self.limits.max_period_us
            )));
        }
        self.speed_us = speed_us;
        Ok(())
    }

    pub fn set_reverse(&mut self, reverse: bool) {
        self.reverse = reverse;
    }

    pub async fn set_motor_driver(&mut self, driver: MotorDriver) -> Result<(), MotionError> {
        if !self.link.set_motor_type(driver.as_flag()).await? {
            return Err(MotionError::Refused("set motor type"));
        }
        tracing::info!("Motor driver set to {:?}", driver);
        Ok(())
    }

    pub async fn set_board_debug(&mut self, enabled: bool) -> Result<(), MotionError> {
        if !self.link.set_debug(enabled).await? {
            return Err(MotionError::Refused("set debug"));
        }
        Ok(())
    }

    pub fn record_temperature(&mut self, celsius: f64) {
        self.temperature_c = Some(celsius);
    }

    /// Take `celsius` as both the latest sample and the motion anchor.
    pub fn anchor_temperature(&mut self, celsius: f64) {
        self.temperature_c = Some(celsius);
        self.last_motion_temperature_c = Some(celsius);
    }

    /// Move the anchor to the latest sample without moving the focuser.
    pub fn reanchor(&mut self) {
        if let Some(t) = self.temperature_c {
            self.last_motion_temperature_c = Some(t);
        }
    }
}
