// src/focuser.rs - The focuser device: one control context and its periodic tasks
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use focuser_shared::config::{BacklashConfig, BoardConfig, Config, MotionConfig, OpticsConfig, PRESET_COUNT};
use focuser_shared::{HardwareLink, LinkError, MotorDriver, PositionStore, StoreError, TemperatureSource};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, broadcast};

use crate::backlash::{BacklashError, BacklashModel};
use crate::events::FocuserEvent;
use crate::focus_zone::{self, FocusQuality, FocusZoneMetrics};
use crate::hardware::{SensorError, TemperatureSensor};
use crate::motion::{
    Direction, FocuserLimits, MotionController, MotionError, MotionState, MoveAccepted, PollOutcome,
};
use crate::scheduler::{PeriodicTask, TaskControl};
use crate::thermal::{ThermalCompensator, ThermalDecision, ThermalError};

#[derive(Debug, Error)]
pub enum FocuserError {
    #[error("Focuser is not connected")]
    NotConnected,
    #[error("Motion error: {0}")]
    Motion(#[from] MotionError),
    #[error("Backlash error: {0}")]
    Backlash(#[from] BacklashError),
    #[error("Sensor error: {0}")]
    Sensor(#[from] SensorError),
    #[error("Thermal error: {0}")]
    Thermal(#[from] ThermalError),
    #[error("Position store error: {0}")]
    Store(#[from] StoreError),
    #[error("Link error: {0}")]
    Link(#[from] LinkError),
    #[error("Invalid setting: {0}")]
    Invalid(String),
}

/// Point-in-time view of the focuser, as served by the web API.
#[derive(Debug, Clone, Serialize)]
pub struct FocuserStatus {
    pub device: String,
    pub connected: bool,
    pub state: &'static str,
    pub fault: Option<String>,
    pub position: Option<i32>,
    pub limits: Option<FocuserLimits>,
    pub speed_us: f64,
    pub reverse: bool,
    pub temperature_c: Option<f64>,
    pub last_motion_temperature_c: Option<f64>,
    pub temperature_source: TemperatureSource,
    pub compensation_enabled: bool,
    pub coefficient: f64,
    pub backlash: BacklashConfig,
    pub focus_zone: FocusZoneMetrics,
    pub focus_quality: FocusQuality,
    pub presets: [i32; PRESET_COUNT],
    pub updated_at: DateTime<Utc>,
}

struct FocuserCore {
    controller: Option<MotionController>,
    backlash: BacklashModel,
    thermal: ThermalCompensator,
    sensor: TemperatureSensor,
    optics: OpticsConfig,
    zone: FocusZoneMetrics,
    motion: MotionConfig,
    board: BoardConfig,
    presets: [i32; PRESET_COUNT],
}

impl FocuserCore {
    fn controller(&mut self) -> Result<&mut MotionController, FocuserError> {
        self.controller.as_mut().ok_or(FocuserError::NotConnected)
    }

    fn max_position(&self) -> i32 {
        match &self.controller {
            Some(controller) => controller.limits().max_position,
            None => self
                .motion
                .max_position
                .map_or(0, |max| i32::try_from(max).unwrap_or(i32::MAX)),
        }
    }

    fn refresh_zone(&mut self) -> FocusZoneMetrics {
        self.zone = focus_zone::compute(
            self.optics.aperture_mm,
            self.optics.focal_length_mm,
            self.optics.travel_mm,
            self.max_position(),
        );
        self.zone
    }
}

#[derive(Default)]
struct Tasks {
    status: Option<PeriodicTask>,
    /// Set by the status poll, under the core lock, once it has decided to stop.
    status_done: bool,
    sampling: Option<PeriodicTask>,
    compensation: Option<PeriodicTask>,
}

impl Tasks {
    fn drain(&mut self) -> Vec<PeriodicTask> {
        self.status_done = false;
        [self.status.take(), self.sampling.take(), self.compensation.take()]
            .into_iter()
            .flatten()
            .collect()
    }
}

struct Shared {
    name: String,
    storage_dir: Option<PathBuf>,
    status_poll: Duration,
    sample_interval: Duration,
    compensation_interval: Duration,
    core: Mutex<FocuserCore>,
    tasks: Mutex<Tasks>,
    events: broadcast::Sender<FocuserEvent>,
}

/// Handle to one focuser device. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Focuser {
    shared: Arc<Shared>,
}

impl Focuser {
    pub fn new(config: &Config) -> Self {
        let (events, _) = broadcast::channel(64);
        let mut core = FocuserCore {
            controller: None,
            backlash: BacklashModel::new(config.backlash),
            thermal: ThermalCompensator::new(&config.thermal, config.optics.focal_length_mm),
            sensor: TemperatureSensor::new(config.thermal.source),
            optics: config.optics,
            zone: FocusZoneMetrics::default(),
            motion: config.motion.clone(),
            board: config.board.clone(),
            presets: config.presets.positions,
        };
        core.refresh_zone();
        Self {
            shared: Arc::new(Shared {
                name: config.device.name.clone(),
                storage_dir: config.storage.position_dir.clone(),
                status_poll: Duration::from_millis(config.motion.status_poll_ms),
                sample_interval: Duration::from_secs(config.thermal.sample_interval_secs),
                compensation_interval: Duration::from_secs(config.thermal.compensation_interval_secs),
                core: Mutex::new(core),
                tasks: Mutex::new(Tasks::default()),
                events,
            }),
        }
    }

    fn upgrade(weak: &Weak<Shared>) -> Option<Focuser> {
        weak.upgrade().map(|shared| Focuser { shared })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FocuserEvent> {
        self.shared.events.subscribe()
    }

    fn emit(&self, event: FocuserEvent) {
        // No subscribers is fine.
        let _ = self.shared.events.send(event);
    }

    async fn emit_status(&self) {
        let status = {
            let core = self.shared.core.lock().await;
            self.snapshot(&core)
        };
        self.emit(FocuserEvent::StatusChanged(status));
    }

    /// Connect to a board, replacing any previous connection.
    pub async fn connect(&self, link: Arc<dyn HardwareLink>) -> Result<(), FocuserError> {
        self.stop_tasks().await;
        let store = PositionStore::for_device(&self.shared.name, self.shared.storage_dir.as_deref())?;
        let zone = {
            let mut guard = self.shared.core.lock().await;
            let core = &mut *guard;
            core.controller = None;
            let mut controller = MotionController::connect(link.clone(), store, &core.motion).await?;
            if let Err(e) = controller.set_motor_driver(core.board.motor).await {
                tracing::warn!("Motor driver not applied: {}", e);
            }
            if let Err(e) = controller.set_board_debug(core.board.debug).await {
                tracing::warn!("Board debug flag not applied: {}", e);
            }
            if let Err(e) = core.backlash.apply(link.as_ref(), controller.limits()).await {
                tracing::warn!("Backlash settings not applied: {}", e);
            }
            match core.sensor.read(link.as_ref()).await {
                Ok(celsius) => controller.anchor_temperature(celsius),
                Err(e) => tracing::warn!("No temperature reading at connect: {}", e),
            }
            core.controller = Some(controller);
            core.refresh_zone()
        };
        tracing::info!("Focuser '{}' connected", self.shared.name);
        self.emit(FocuserEvent::Connected);
        self.emit(FocuserEvent::FocusZoneChanged(zone));
        self.start_tasks().await;
        Ok(())
    }

    /// Stop every periodic task, then release the board.
    pub async fn disconnect(&self) {
        self.stop_tasks().await;
        let was_connected = self.shared.core.lock().await.controller.take().is_some();
        // A tick cancelled mid-move may have restarted the status poll.
        self.stop_tasks().await;
        if was_connected {
            tracing::info!("Focuser '{}' disconnected", self.shared.name);
            self.emit(FocuserEvent::Disconnected);
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.shared.core.lock().await.controller.is_some()
    }

    /// Whether any periodic task is still running.
    pub async fn has_running_tasks(&self) -> bool {
        let tasks = self.shared.tasks.lock().await;
        [&tasks.status, &tasks.sampling, &tasks.compensation]
            .into_iter()
            .flatten()
            .any(|task| !task.is_finished())
    }

    async fn stop_tasks(&self) {
        let tasks = self.shared.tasks.lock().await.drain();
        for task in tasks {
            task.stop().await;
        }
    }

    async fn start_tasks(&self) {
        let status = self.spawn_status_poll();

        let weak = Arc::downgrade(&self.shared);
        let sampling = PeriodicTask::spawn("temperature sampling", self.shared.sample_interval, false, move || {
            let weak = weak.clone();
            async move {
                match Focuser::upgrade(&weak) {
                    Some(focuser) => {
                        focuser.sample_temperature().await;
                        TaskControl::Continue
                    }
                    None => TaskControl::Stop,
                }
            }
        });

        let weak = Arc::downgrade(&self.shared);
        let compensation = PeriodicTask::spawn(
            "temperature compensation",
            self.shared.compensation_interval,
            false,
            move || {
                let weak = weak.clone();
                async move {
                    let Some(focuser) = Focuser::upgrade(&weak) else {
                        return TaskControl::Stop;
                    };
                    if let Err(e) = focuser.compensate_temperature().await {
                        tracing::warn!("Temperature compensation failed: {}", e);
                    }
                    TaskControl::Continue
                }
            },
        );

        let mut tasks = self.shared.tasks.lock().await;
        tasks.status = Some(status);
        tasks.status_done = false;
        tasks.sampling = Some(sampling);
        tasks.compensation = Some(compensation);
    }

    fn spawn_status_poll(&self) -> PeriodicTask {
        let weak = Arc::downgrade(&self.shared);
        PeriodicTask::spawn("status poll", self.shared.status_poll, true, move || {
            let weak = weak.clone();
            async move {
                match Focuser::upgrade(&weak) {
                    Some(focuser) => focuser.poll_once().await,
                    None => TaskControl::Stop,
                }
            }
        })
    }

    /// Make sure a status poll will run after a motion start.
    ///
    /// A poll that has already decided to stop may not have exited yet, so it
    /// is replaced rather than trusted to see the new motion.
    async fn ensure_status_poll(&self) {
        let previous = {
            let mut tasks = self.shared.tasks.lock().await;
            let running = !tasks.status_done && tasks.status.as_ref().is_some_and(|task| !task.is_finished());
            if running {
                return;
            }
            tasks.status_done = false;
            tasks.status.replace(self.spawn_status_poll())
        };
        if let Some(task) = previous {
            task.stop().await;
        }
    }

    /// One status poll; keeps polling until the board reports idle.
    async fn poll_once(&self) -> TaskControl {
        let mut core = self.shared.core.lock().await;
        let Some(controller) = core.controller.as_mut() else {
            return TaskControl::Stop;
        };
        let before = (controller.position(), controller.state().label());
        let control = match controller.poll_status().await {
            Ok(PollOutcome::Running) => TaskControl::Continue,
            Ok(PollOutcome::Idle) => TaskControl::Stop,
            Err(e) => {
                tracing::warn!("Focuser status poll failed: {}", e);
                if controller.state().is_idle() { TaskControl::Stop } else { TaskControl::Continue }
            }
        };
        let after = (controller.position(), controller.state().label());
        if control == TaskControl::Stop {
            self.shared.tasks.lock().await.status_done = true;
        }
        if before != after {
            let status = self.snapshot(&core);
            drop(core);
            if before.0 != after.0 {
                self.emit(FocuserEvent::PositionChanged(after.0));
            }
            self.emit(FocuserEvent::StatusChanged(status));
        }
        control
    }

    async fn sample_temperature(&self) {
        let event = {
            let mut guard = self.shared.core.lock().await;
            let core = &mut *guard;
            let Some(controller) = core.controller.as_mut() else {
                return;
            };
            let link = controller.link().clone();
            match core.sensor.read(link.as_ref()).await {
                Ok(celsius) => {
                    let changed = controller.temperature() != Some(celsius);
                    controller.record_temperature(celsius);
                    changed.then_some(FocuserEvent::TemperatureChanged(celsius))
                }
                Err(SensorError::Fault { value, .. }) => Some(FocuserEvent::SensorFault(value)),
                Err(e) => {
                    tracing::warn!("Temperature sample failed: {}", e);
                    None
                }
            }
        };
        if let Some(event) = event {
            self.emit(event);
        }
    }

    /// Run one compensation pass now.
    pub async fn compensate_temperature(&self) -> Result<ThermalDecision, FocuserError> {
        let mut events = Vec::new();
        let result = {
            let mut core = self.shared.core.lock().await;
            run_compensation(&mut core, &mut events).await
        };
        for event in events {
            self.emit(event);
        }
        let (decision, started) = result?;
        if started {
            self.ensure_status_poll().await;
            self.emit_status().await;
        }
        Ok(decision)
    }

    pub async fn move_absolute(&self, target: i32) -> Result<MoveAccepted, FocuserError> {
        let accepted = self.shared.core.lock().await.controller()?.move_absolute(target).await?;
        self.after_move(accepted).await;
        Ok(accepted)
    }

    pub async fn move_relative(&self, direction: Direction, ticks: u32) -> Result<MoveAccepted, FocuserError> {
        let accepted = self
            .shared
            .core
            .lock()
            .await
            .controller()?
            .move_relative(direction, ticks)
            .await?;
        self.after_move(accepted).await;
        Ok(accepted)
    }

    pub async fn reset_to_home(&self) -> Result<MoveAccepted, FocuserError> {
        let accepted = self.shared.core.lock().await.controller()?.reset_to_home().await?;
        self.after_move(accepted).await;
        Ok(accepted)
    }

    async fn after_move(&self, accepted: MoveAccepted) {
        if accepted == MoveAccepted::Started {
            self.ensure_status_poll().await;
            self.emit_status().await;
        }
    }

    pub async fn sync(&self, ticks: i32) -> Result<(), FocuserError> {
        let position = {
            let mut core = self.shared.core.lock().await;
            let controller = core.controller()?;
            controller.sync(ticks).await?;
            controller.position()
        };
        self.emit(FocuserEvent::PositionChanged(position));
        self.emit_status().await;
        Ok(())
    }

    pub async fn abort(&self) -> Result<(), FocuserError> {
        self.shared.core.lock().await.controller()?.abort().await?;
        // The poll decides when the board has actually stopped.
        self.ensure_status_poll().await;
        Ok(())
    }

    pub async fn set_backlash_config(&self, step_count: u32, period_us: f64) -> Result<(), FocuserError> {
        {
            let mut guard = self.shared.core.lock().await;
            let core = &mut *guard;
            let controller = core.controller.as_ref().ok_or(FocuserError::NotConnected)?;
            core.backlash
                .set_config(controller.link().as_ref(), controller.limits(), step_count, period_us)
                .await?;
        }
        self.emit_status().await;
        Ok(())
    }

    pub async fn set_backlash_enabled(&self, enabled: bool) -> Result<(), FocuserError> {
        {
            let mut guard = self.shared.core.lock().await;
            let core = &mut *guard;
            let controller = core.controller.as_ref().ok_or(FocuserError::NotConnected)?;
            core.backlash.set_enabled(controller.link().as_ref(), enabled).await?;
        }
        self.emit_status().await;
        Ok(())
    }

    pub async fn set_temperature_compensation(&self, enabled: bool) {
        self.shared.core.lock().await.thermal.set_enabled(enabled);
        self.emit_status().await;
    }

    pub async fn set_temperature_coefficient(&self, coefficient: f64) -> Result<(), FocuserError> {
        self.shared.core.lock().await.thermal.set_coefficient(coefficient)?;
        self.emit_status().await;
        Ok(())
    }

    pub async fn set_temperature_source(&self, source: TemperatureSource) {
        self.shared.core.lock().await.sensor.set_source(source);
        self.emit_status().await;
    }

    pub async fn set_travel_distance(&self, travel_mm: f64) -> Result<FocusZoneMetrics, FocuserError> {
        if !(travel_mm > 0.0) {
            return Err(FocuserError::Invalid(format!("travel {} mm must be > 0", travel_mm)));
        }
        let zone = {
            let mut core = self.shared.core.lock().await;
            core.optics.travel_mm = travel_mm;
            core.refresh_zone()
        };
        self.emit(FocuserEvent::FocusZoneChanged(zone));
        Ok(zone)
    }

    pub async fn set_optical_parameters(
        &self,
        aperture_mm: f64,
        focal_length_mm: f64,
    ) -> Result<FocusZoneMetrics, FocuserError> {
        if !(aperture_mm >= 0.0) {
            return Err(FocuserError::Invalid(format!("aperture {} mm cannot be negative", aperture_mm)));
        }
        let zone = {
            let mut core = self.shared.core.lock().await;
            core.thermal.set_focal_length(focal_length_mm)?;
            core.optics.aperture_mm = aperture_mm;
            core.optics.focal_length_mm = focal_length_mm;
            core.refresh_zone()
        };
        self.emit(FocuserEvent::FocusZoneChanged(zone));
        Ok(zone)
    }

    pub async fn set_max_position(&self, max_position: u32) -> Result<FocusZoneMetrics, FocuserError> {
        let zone = {
            let mut core = self.shared.core.lock().await;
            core.controller()?.set_max_position(max_position).await?;
            core.motion.max_position = Some(max_position);
            core.refresh_zone()
        };
        self.emit(FocuserEvent::FocusZoneChanged(zone));
        self.emit_status().await;
        Ok(zone)
    }

    /// Step period in microseconds; applied to the next move.
    pub async fn set_speed(&self, speed_us: f64) -> Result<(), FocuserError> {
        let mut core = self.shared.core.lock().await;
        match core.controller.as_mut() {
            Some(controller) => controller.set_speed(speed_us)?,
            None if !(speed_us > 0.0) => {
                return Err(FocuserError::Invalid(format!("speed {} us must be > 0", speed_us)));
            }
            None => {}
        }
        core.motion.speed_us = speed_us;
        Ok(())
    }

    pub async fn set_reverse(&self, reverse: bool) {
        let mut core = self.shared.core.lock().await;
        if let Some(controller) = core.controller.as_mut() {
            controller.set_reverse(reverse);
        }
        core.motion.reverse = reverse;
    }

    pub async fn set_motor_driver(&self, driver: MotorDriver) -> Result<(), FocuserError> {
        let mut core = self.shared.core.lock().await;
        if let Some(controller) = core.controller.as_mut() {
            controller.set_motor_driver(driver).await?;
        }
        core.board.motor = driver;
        Ok(())
    }

    pub async fn set_board_debug(&self, enabled: bool) -> Result<(), FocuserError> {
        let mut core = self.shared.core.lock().await;
        if let Some(controller) = core.controller.as_mut() {
            controller.set_board_debug(enabled).await?;
        }
        core.board.debug = enabled;
        Ok(())
    }

    pub async fn presets(&self) -> [i32; PRESET_COUNT] {
        self.shared.core.lock().await.presets
    }

    /// Store `position` in preset slot `index`.
    pub async fn set_preset(&self, index: usize, position: i32) -> Result<(), FocuserError> {
        {
            let mut core = self.shared.core.lock().await;
            let max_position = core.max_position();
            if position < 0 || (max_position > 0 && position > max_position) {
                return Err(FocuserError::Invalid(format!(
                    "preset position {} outside 0..={}",
                    position, max_position
                )));
            }
            let slot = core.presets.get_mut(index).ok_or_else(|| preset_missing(index))?;
            *slot = position;
        }
        tracing::info!("Focus preset {} set to {}", index, position);
        self.emit_status().await;
        Ok(())
    }

    /// Move to the position stored in preset slot `index`.
    pub async fn goto_preset(&self, index: usize) -> Result<MoveAccepted, FocuserError> {
        let target = {
            let core = self.shared.core.lock().await;
            core.presets.get(index).copied().ok_or_else(|| preset_missing(index))?
        };
        tracing::info!("Moving to focus preset {} at {}", index, target);
        self.move_absolute(target).await
    }

    pub async fn focus_zone(&self) -> FocusZoneMetrics {
        self.shared.core.lock().await.zone
    }

    pub async fn status(&self) -> FocuserStatus {
        let core = self.shared.core.lock().await;
        self.snapshot(&core)
    }

    fn snapshot(&self, core: &FocuserCore) -> FocuserStatus {
        let controller = core.controller.as_ref();
        let (state, fault) = match controller.map(|c| c.state()) {
            Some(MotionState::Faulted { reason }) => ("faulted", Some(reason.clone())),
            Some(state) => (state.label(), None),
            None => ("disconnected", None),
        };
        FocuserStatus {
            device: self.shared.name.clone(),
            connected: controller.is_some(),
            state,
            fault,
            position: controller.map(|c| c.position()),
            limits: controller.map(|c| *c.limits()),
            speed_us: controller.map_or(core.motion.speed_us, |c| c.speed_us()),
            reverse: core.motion.reverse,
            temperature_c: controller.and_then(|c| c.temperature()),
            last_motion_temperature_c: controller.and_then(|c| c.last_motion_temperature()),
            temperature_source: core.sensor.source(),
            compensation_enabled: core.thermal.is_enabled(),
            coefficient: core.thermal.coefficient(),
            backlash: core.backlash.config(),
            focus_zone: core.zone,
            focus_quality: core.zone.quality(),
            presets: core.presets,
            updated_at: Utc::now(),
        }
    }
}

fn preset_missing(index: usize) -> FocuserError {
    FocuserError::Invalid(format!("no preset {} (have {})", index, PRESET_COUNT))
}

async fn run_compensation(
    core: &mut FocuserCore,
    events: &mut Vec<FocuserEvent>,
) -> Result<(ThermalDecision, bool), FocuserError> {
    if !core.thermal.is_enabled() {
        return Ok((ThermalDecision::Skipped, false));
    }
    let Some(controller) = core.controller.as_mut() else {
        return Ok((ThermalDecision::Skipped, false));
    };
    let link = controller.link().clone();
    let current = match core.sensor.read(link.as_ref()).await {
        Ok(celsius) => celsius,
        Err(SensorError::Fault { value, .. }) => {
            events.push(FocuserEvent::SensorFault(value));
            return Ok((ThermalDecision::Skipped, false));
        }
        Err(e) => return Err(e.into()),
    };
    controller.record_temperature(current);
    let Some(last) = controller.last_motion_temperature() else {
        controller.anchor_temperature(current);
        return Ok((ThermalDecision::NoChange, false));
    };

    let decision = core.thermal.evaluate(current, last, &core.zone);
    let ThermalDecision::Adjust { steps, delta_c, .. } = decision else {
        tracing::debug!("Temperature compensation: {:?}", decision);
        return Ok((decision, false));
    };
    let target = controller.position().saturating_add(steps);
    match controller.move_absolute(target).await? {
        MoveAccepted::Started => {
            tracing::info!(
                "Focuser adjusted by {} steps for a temperature change of {:.2} C",
                steps,
                delta_c
            );
            events.push(FocuserEvent::Compensated { steps, delta_c });
            Ok((decision, true))
        }
        MoveAccepted::AlreadyThere => {
            controller.reanchor();
            Ok((decision, false))
        }
    }
}
