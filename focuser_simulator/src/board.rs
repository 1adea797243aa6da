// In-process model of the FPGA focuser board
use async_trait::async_trait;
use focuser_shared::hardware_traits::{AxisStatus, HardwareLink, LinkError, TemperatureSource};
use focuser_shared::protocol::{self, Request};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

/// Requests kept in the call log; older ones are dropped.
pub const CALL_LOG_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct BoardState {
    initialized: bool,
    position: i32,
    target: i32,
    running: bool,
    direction: bool,
    grid_per_revolution: u32,
    home_position: i32,
    timer_frequency_hz: f64,
    min_period: u32,
    max_period: u32,
    backlash_period: f64,
    backlash_cycles: u32,
    backlash_enabled: bool,
    tmc_driver: bool,
    debug: bool,
    temperatures: [f64; 3],
    temperature_noise: f64,
    steps_per_status: Option<u32>,
    online: bool,
    decline_starts: bool,
    decline_backlash: bool,
    last_period_ticks: Option<f64>,
    calls: VecDeque<Request>,
}

impl Default for BoardState {
    fn default() -> Self {
        Self {
            initialized: true,
            position: 0,
            target: 0,
            running: false,
            direction: false,
            grid_per_revolution: 10000,
            home_position: 0,
            timer_frequency_hz: 1_000_000.0,
            min_period: 5,
            max_period: 19000,
            backlash_period: 0.0,
            backlash_cycles: 0,
            backlash_enabled: false,
            tmc_driver: false,
            debug: false,
            temperatures: [20.0; 3],
            temperature_noise: 0.0,
            steps_per_status: None,
            online: true,
            decline_starts: false,
            decline_backlash: false,
            last_period_ticks: None,
            calls: VecDeque::new(),
        }
    }
}

/// Snapshot of the backlash registers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BacklashRegisters {
    pub period_ticks: f64,
    pub cycles: u32,
    pub enabled: bool,
}

/// Simulated focuser board.
///
/// Motion does not advance on its own: tests call [`SimulatedBoard::finish_motion`]
/// or [`SimulatedBoard::advance`], while the TCP server configures
/// `steps_per_status` so every status query moves the axis a little.
#[derive(Debug, Default)]
pub struct SimulatedBoard {
    state: Mutex<BoardState>,
}

fn source_index(source: TemperatureSource) -> usize {
    match source {
        TemperatureSource::OneWire => 0,
        TemperatureSource::AnalogPin14 => 1,
        TemperatureSource::AnalogPin15 => 2,
    }
}

impl SimulatedBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BoardState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn with_position(self, position: i32) -> Self {
        {
            let mut state = self.state();
            state.position = position;
            state.target = position;
        }
        self
    }

    pub fn with_grid_per_revolution(self, grid: u32) -> Self {
        self.state().grid_per_revolution = grid;
        self
    }

    pub fn with_home_position(self, home: i32) -> Self {
        self.state().home_position = home;
        self
    }

    pub fn with_timer_frequency(self, hz: f64) -> Self {
        self.state().timer_frequency_hz = hz;
        self
    }

    pub fn with_period_range(self, min_period: u32, max_period: u32) -> Self {
        {
            let mut state = self.state();
            state.min_period = min_period;
            state.max_period = max_period;
        }
        self
    }

    pub fn with_steps_per_status(self, steps: u32) -> Self {
        self.state().steps_per_status = Some(steps);
        self
    }

    pub fn with_temperature_noise(self, noise: f64) -> Self {
        self.state().temperature_noise = noise;
        self
    }

    pub fn uninitialized(self) -> Self {
        self.state().initialized = false;
        self
    }

    pub fn set_temperature(&self, source: TemperatureSource, celsius: f64) {
        self.state().temperatures[source_index(source)] = celsius;
    }

    /// Make every request fail as if the board stopped answering.
    pub fn set_online(&self, online: bool) {
        self.state().online = online;
    }

    /// Refuse motion starts (`goto`/`inc`) while set.
    pub fn set_decline_starts(&self, decline: bool) {
        self.state().decline_starts = decline;
    }

    /// Refuse backlash register writes while set.
    pub fn set_decline_backlash(&self, decline: bool) {
        self.state().decline_backlash = decline;
    }

    /// Start motion that the host did not ask for, e.g. from a hand controller.
    pub fn start_external_motion(&self, target: i32) {
        let mut state = self.state();
        state.direction = target > state.position;
        state.target = target;
        state.running = true;
    }

    /// Move the axis `steps` towards its target.
    pub fn advance(&self, steps: u32) {
        let mut state = self.state();
        step_towards_target(&mut state, steps);
    }

    /// Complete any motion in flight.
    pub fn finish_motion(&self) {
        let mut state = self.state();
        if state.running {
            state.position = state.target;
            state.running = false;
        }
    }

    pub fn current_position(&self) -> i32 {
        self.state().position
    }

    pub fn is_running(&self) -> bool {
        self.state().running
    }

    pub fn is_initialized(&self) -> bool {
        self.state().initialized
    }

    pub fn backlash(&self) -> BacklashRegisters {
        let state = self.state();
        BacklashRegisters {
            period_ticks: state.backlash_period,
            cycles: state.backlash_cycles,
            enabled: state.backlash_enabled,
        }
    }

    pub fn motor_is_tmc(&self) -> bool {
        self.state().tmc_driver
    }

    pub fn debug_enabled(&self) -> bool {
        self.state().debug
    }

    pub fn grid_per_revolution_value(&self) -> u32 {
        self.state().grid_per_revolution
    }

    /// Step period of the most recent motion start, in timer ticks.
    pub fn last_period_ticks(&self) -> Option<f64> {
        self.state().last_period_ticks
    }

    /// The most recent requests, oldest first.
    pub fn calls(&self) -> Vec<Request> {
        self.state().calls.iter().cloned().collect()
    }

    /// Requests that started motion.
    pub fn motion_calls(&self) -> Vec<Request> {
        self.calls()
            .into_iter()
            .filter(|r| matches!(r, Request::GotoTarget { .. } | Request::Increment { .. }))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Run one request against the board and return the reply values.
    pub fn execute(&self, request: Request) -> Result<Vec<String>, LinkError> {
        let mut state = self.state();
        if state.calls.len() == CALL_LOG_CAPACITY {
            state.calls.pop_front();
        }
        state.calls.push_back(request.clone());
        if !state.online {
            return Err(LinkError::Timeout(request.encode()));
        }
        let reply = match request {
            Request::Initialize => {
                state.initialized = true;
                state.running = false;
                vec![]
            }
            Request::AxisStatus => {
                if state.running {
                    if let Some(steps) = state.steps_per_status {
                        step_towards_target(&mut state, steps);
                    }
                }
                vec![
                    bit(state.initialized),
                    bit(state.running),
                    bit(state.direction),
                ]
            }
            Request::GetPosition => vec![state.position.to_string()],
            Request::SetPosition(ticks) => {
                state.position = ticks;
                if !state.running {
                    state.target = ticks;
                }
                vec![]
            }
            Request::GotoTarget { target, period_ticks, direction } => {
                let accepted = !state.decline_starts && !state.running;
                if accepted {
                    let limit = grid_limit(&state);
                    state.target = target.clamp(0, limit);
                    state.direction = direction;
                    state.running = state.target != state.position;
                    state.last_period_ticks = Some(period_ticks);
                }
                vec![bit(accepted)]
            }
            Request::Increment { ticks, period_ticks, direction } => {
                let accepted = !state.decline_starts && !state.running;
                if accepted {
                    let delta = i64::from(ticks) * if direction { 1 } else { -1 };
                    let limit = i64::from(grid_limit(&state));
                    let target = (i64::from(state.position) + delta).clamp(0, limit);
                    state.target = target as i32;
                    state.direction = direction;
                    state.running = state.target != state.position;
                    state.last_period_ticks = Some(period_ticks);
                }
                vec![bit(accepted)]
            }
            Request::Stop { .. } => {
                state.target = state.position;
                state.running = false;
                vec![bit(true)]
            }
            Request::GetGridPerRevolution => vec![state.grid_per_revolution.to_string()],
            Request::SetGridPerRevolution(value) => {
                state.grid_per_revolution = value;
                vec![bit(true)]
            }
            Request::GetHomePosition => vec![state.home_position.to_string()],
            Request::GetTimerFrequency => vec![state.timer_frequency_hz.to_string()],
            Request::GetMinPeriod => vec![state.min_period.to_string()],
            Request::GetMaxPeriod => vec![state.max_period.to_string()],
            Request::SetBacklashPeriod(period) => {
                let accepted = !state.decline_backlash;
                if accepted {
                    state.backlash_period = period;
                }
                vec![bit(accepted)]
            }
            Request::SetBacklashCycles(cycles) => {
                let accepted = !state.decline_backlash;
                if accepted {
                    state.backlash_cycles = cycles;
                }
                vec![bit(accepted)]
            }
            Request::EnableBacklash(enabled) => {
                let accepted = !state.decline_backlash;
                if accepted {
                    state.backlash_enabled = enabled;
                }
                vec![bit(accepted)]
            }
            Request::SetMotorType(tmc) => {
                state.tmc_driver = tmc;
                vec![bit(true)]
            }
            Request::SetDebug(enabled) => {
                state.debug = enabled;
                vec![bit(true)]
            }
            Request::GetTemperature(source) => {
                let mut value = state.temperatures[source_index(source)];
                if state.temperature_noise > 0.0 {
                    value += state.temperature_noise * (rand::random::<f64>() - 0.5);
                }
                vec![value.to_string()]
            }
        };
        Ok(reply)
    }

    fn query(&self, request: Request) -> Result<Vec<String>, LinkError> {
        self.execute(request)
    }

    fn accepted(&self, request: Request) -> Result<bool, LinkError> {
        protocol::acknowledged(&self.execute(request)?)
    }
}

fn bit(value: bool) -> String {
    if value { "1".to_string() } else { "0".to_string() }
}

fn grid_limit(state: &BoardState) -> i32 {
    i32::try_from(state.grid_per_revolution).unwrap_or(i32::MAX)
}

fn step_towards_target(state: &mut BoardState, steps: u32) {
    if !state.running {
        return;
    }
    let remaining = i64::from(state.target) - i64::from(state.position);
    let step = i64::from(steps).min(remaining.abs());
    state.position = (i64::from(state.position) + step * remaining.signum()) as i32;
    if state.position == state.target {
        state.running = false;
    }
}

fn single<T: std::str::FromStr>(reply: Vec<String>, what: &str) -> Result<T, LinkError> {
    protocol::value(&reply, what)
}

#[async_trait]
impl HardwareLink for SimulatedBoard {
    async fn initialize(&self) -> Result<(), LinkError> {
        self.query(Request::Initialize).map(|_| ())
    }

    async fn axis_status(&self) -> Result<AxisStatus, LinkError> {
        let reply = self.query(Request::AxisStatus)?;
        let fields: Vec<&str> = reply.iter().map(String::as_str).collect();
        Ok(AxisStatus {
            initialized: protocol::flag_field(&fields, 0, "initialized")?,
            running: protocol::flag_field(&fields, 1, "running")?,
            direction: protocol::flag_field(&fields, 2, "direction")?,
        })
    }

    async fn position(&self) -> Result<i32, LinkError> {
        single(self.query(Request::GetPosition)?, "position")
    }

    async fn set_position(&self, ticks: i32) -> Result<(), LinkError> {
        self.query(Request::SetPosition(ticks)).map(|_| ())
    }

    async fn start_absolute_move(&self, target: i32, period_ticks: f64, direction: bool) -> Result<bool, LinkError> {
        self.accepted(Request::GotoTarget { target, period_ticks, direction })
    }

    async fn start_relative_move(&self, ticks: u32, period_ticks: f64, direction: bool) -> Result<bool, LinkError> {
        self.accepted(Request::Increment { ticks, period_ticks, direction })
    }

    async fn stop(&self, hard: bool) -> Result<bool, LinkError> {
        self.accepted(Request::Stop { hard })
    }

    async fn grid_per_revolution(&self) -> Result<u32, LinkError> {
        single(self.query(Request::GetGridPerRevolution)?, "grid")
    }

    async fn set_grid_per_revolution(&self, value: u32) -> Result<bool, LinkError> {
        self.accepted(Request::SetGridPerRevolution(value))
    }

    async fn home_position(&self) -> Result<i32, LinkError> {
        single(self.query(Request::GetHomePosition)?, "home position")
    }

    async fn timer_frequency_hz(&self) -> Result<f64, LinkError> {
        single(self.query(Request::GetTimerFrequency)?, "timer frequency")
    }

    async fn min_period(&self) -> Result<u32, LinkError> {
        single(self.query(Request::GetMinPeriod)?, "min period")
    }

    async fn max_period(&self) -> Result<u32, LinkError> {
        single(self.query(Request::GetMaxPeriod)?, "max period")
    }

    async fn set_backlash_period(&self, period_ticks: f64) -> Result<bool, LinkError> {
        self.accepted(Request::SetBacklashPeriod(period_ticks))
    }

    async fn set_backlash_cycles(&self, cycles: u32) -> Result<bool, LinkError> {
        self.accepted(Request::SetBacklashCycles(cycles))
    }

    async fn enable_backlash(&self, enabled: bool) -> Result<bool, LinkError> {
        self.accepted(Request::EnableBacklash(enabled))
    }

    async fn set_motor_type(&self, tmc: bool) -> Result<bool, LinkError> {
        self.accepted(Request::SetMotorType(tmc))
    }

    async fn set_debug(&self, enabled: bool) -> Result<bool, LinkError> {
        self.accepted(Request::SetDebug(enabled))
    }

    async fn temperature(&self, source: TemperatureSource) -> Result<f64, LinkError> {
        single(self.query(Request::GetTemperature(source))?, "temperature")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_absolute_move_runs_until_finished() {
        let board = SimulatedBoard::new().with_position(100);
        assert!(board.start_absolute_move(400, 10.0, true).await.unwrap());
        assert!(board.axis_status().await.unwrap().running);
        board.advance(100);
        assert_eq!(board.position().await.unwrap(), 200);
        board.finish_motion();
        let status = board.axis_status().await.unwrap();
        assert!(!status.running);
        assert_eq!(board.position().await.unwrap(), 400);
    }

    #[tokio::test]
    async fn test_relative_move_is_clamped_to_travel() {
        let board = SimulatedBoard::new().with_position(50).with_steps_per_status(1000);
        assert!(board.start_relative_move(200, 10.0, false).await.unwrap());
        let status = board.axis_status().await.unwrap();
        assert!(!status.running);
        assert_eq!(board.position().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_call_log_keeps_only_recent_requests() {
        let board = SimulatedBoard::new();
        for _ in 0..CALL_LOG_CAPACITY {
            board.axis_status().await.unwrap();
        }
        board.set_position(7).await.unwrap();
        let calls = board.calls();
        assert_eq!(calls.len(), CALL_LOG_CAPACITY);
        assert_eq!(calls.last(), Some(&Request::SetPosition(7)));
    }

    #[tokio::test]
    async fn test_offline_board_times_out() {
        let board = SimulatedBoard::new();
        board.set_online(false);
        assert!(matches!(board.axis_status().await, Err(LinkError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_declined_start_leaves_axis_idle() {
        let board = SimulatedBoard::new();
        board.set_decline_starts(true);
        assert!(!board.start_absolute_move(10, 10.0, true).await.unwrap());
        assert!(!board.is_running());
        assert_eq!(board.motion_calls().len(), 1);
    }
}
