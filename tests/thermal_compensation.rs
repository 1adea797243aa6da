//! Thermal compensation decisions and the compensation pass of a connected focuser

use std::sync::Arc;

use focuser_rs::config::{Config, OpticsConfig, ThermalConfig};
use focuser_rs::focus_zone;
use focuser_rs::thermal::{ThermalCompensator, ThermalDecision};
use focuser_rs::{Focuser, FocuserError, FocuserEvent, MotionError};
use focuser_shared::TemperatureSource;
use focuser_shared::protocol::Request;
use focuser_simulator::SimulatedBoard;
use tempfile::TempDir;

fn f7_compensator() -> ThermalCompensator {
    let thermal = ThermalConfig { compensation: true, coefficient: 20.0, ..Default::default() };
    ThermalCompensator::new(&thermal, 1400.0)
}

fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.storage.position_dir = Some(dir.path().to_path_buf());
    config.thermal.compensation = true;
    config.thermal.coefficient = 20.0;
    config.optics = OpticsConfig { aperture_mm: 200.0, focal_length_mm: 1400.0, travel_mm: 10.0 };
    config
}

async fn connected(board: &Arc<SimulatedBoard>, config: &Config) -> Focuser {
    let focuser = Focuser::new(config);
    focuser.connect(board.clone()).await.unwrap();
    focuser
}

#[test]
fn test_no_move_within_half_cfz() {
    let zone = focus_zone::compute(200.0, 1400.0, 10.0, 10000);
    let thermal = f7_compensator();
    // 28 um per degree against a 62.17 um half CFZ
    let decision = thermal.evaluate(12.0, 10.0, &zone);
    assert!(matches!(decision, ThermalDecision::WithinTolerance { .. }));
    assert_eq!(thermal.evaluate(10.0, 10.0, &zone), ThermalDecision::NoChange);
}

#[test]
fn test_adjustment_beyond_half_cfz() {
    let zone = focus_zone::compute(200.0, 1400.0, 10.0, 10000);
    let thermal = f7_compensator();
    match thermal.evaluate(13.0, 10.0, &zone) {
        ThermalDecision::Adjust { steps, expansion_um, delta_c } => {
            assert_eq!(steps, 42);
            assert!((expansion_um - 84.0).abs() < 1e-9);
            assert!((delta_c - 3.0).abs() < 1e-12);
        }
        other => panic!("expected an adjustment, got {:?}", other),
    }
    match thermal.evaluate(7.0, 10.0, &zone) {
        ThermalDecision::Adjust { steps, .. } => assert_eq!(steps, -42),
        other => panic!("expected an adjustment, got {:?}", other),
    }
}

#[tokio::test]
async fn test_zero_step_adjustment_moves_anchor() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.motion.max_position = Some(100);
    let board = Arc::new(SimulatedBoard::new().with_position(50));
    board.set_temperature(TemperatureSource::OneWire, 10.0);
    let focuser = connected(&board, &config).await;
    assert_eq!(focuser.focus_zone().await.step_size_um, 100.0);

    board.set_temperature(TemperatureSource::OneWire, 13.0);
    let decision = focuser.compensate_temperature().await.unwrap();
    assert!(matches!(decision, ThermalDecision::Adjust { steps: 0, .. }));
    assert!(board.motion_calls().is_empty());
    let status = focuser.status().await;
    assert_eq!(status.position, Some(50));
    assert_eq!(status.last_motion_temperature_c, Some(13.0));

    // Drift is measured from the new anchor
    let decision = focuser.compensate_temperature().await.unwrap();
    assert_eq!(decision, ThermalDecision::NoChange);
    focuser.disconnect().await;
}

#[tokio::test]
async fn test_compensation_moves_focuser_once() {
    let dir = TempDir::new().unwrap();
    let board = Arc::new(SimulatedBoard::new().with_position(5000));
    board.set_temperature(TemperatureSource::OneWire, 10.0);
    let focuser = connected(&board, &test_config(&dir)).await;

    board.set_temperature(TemperatureSource::OneWire, 13.0);
    let decision = focuser.compensate_temperature().await.unwrap();
    assert!(matches!(decision, ThermalDecision::Adjust { steps: 42, .. }));
    assert_eq!(
        board.motion_calls(),
        vec![Request::GotoTarget { target: 5042, period_ticks: 1000.0, direction: true }]
    );
    assert_eq!(focuser.status().await.last_motion_temperature_c, Some(13.0));
    focuser.disconnect().await;
}

#[tokio::test]
async fn test_compensation_within_tolerance_keeps_anchor() {
    let dir = TempDir::new().unwrap();
    let board = Arc::new(SimulatedBoard::new().with_position(5000));
    board.set_temperature(TemperatureSource::OneWire, 10.0);
    let focuser = connected(&board, &test_config(&dir)).await;

    board.set_temperature(TemperatureSource::OneWire, 12.0);
    let decision = focuser.compensate_temperature().await.unwrap();
    assert!(matches!(decision, ThermalDecision::WithinTolerance { .. }));
    assert!(board.motion_calls().is_empty());
    let status = focuser.status().await;
    assert_eq!(status.last_motion_temperature_c, Some(10.0));
    assert_eq!(status.temperature_c, Some(12.0));
    focuser.disconnect().await;
}

#[tokio::test]
async fn test_rejected_compensation_keeps_anchor() {
    let dir = TempDir::new().unwrap();
    let board = Arc::new(SimulatedBoard::new().with_position(9990));
    board.set_temperature(TemperatureSource::OneWire, 10.0);
    let focuser = connected(&board, &test_config(&dir)).await;

    board.set_temperature(TemperatureSource::OneWire, 13.0);
    let result = focuser.compensate_temperature().await;
    assert!(matches!(
        result,
        Err(FocuserError::Motion(MotionError::OutOfRange { target: 10032, .. }))
    ));
    assert!(board.motion_calls().is_empty());
    assert_eq!(focuser.status().await.last_motion_temperature_c, Some(10.0));

    // Drift keeps being measured from the old anchor
    board.set_temperature(TemperatureSource::OneWire, 7.0);
    let decision = focuser.compensate_temperature().await.unwrap();
    assert!(matches!(decision, ThermalDecision::Adjust { steps: -42, .. }));
    focuser.disconnect().await;
}

#[tokio::test]
async fn test_sensor_fault_is_not_applied() {
    let dir = TempDir::new().unwrap();
    let board = Arc::new(SimulatedBoard::new().with_position(5000));
    board.set_temperature(TemperatureSource::OneWire, 10.0);
    let focuser = connected(&board, &test_config(&dir)).await;
    let mut events = focuser.subscribe();

    board.set_temperature(TemperatureSource::OneWire, 150.0);
    let decision = focuser.compensate_temperature().await.unwrap();
    assert_eq!(decision, ThermalDecision::Skipped);
    assert!(board.motion_calls().is_empty());
    assert_eq!(focuser.status().await.temperature_c, Some(10.0));

    let mut saw_fault = false;
    while let Ok(event) = events.try_recv() {
        if let FocuserEvent::SensorFault(value) = event {
            assert_eq!(value, 150.0);
            saw_fault = true;
        }
    }
    assert!(saw_fault);
    focuser.disconnect().await;
}

#[tokio::test]
async fn test_disabled_compensation_does_nothing() {
    let dir = TempDir::new().unwrap();
    let board = Arc::new(SimulatedBoard::new().with_position(5000));
    board.set_temperature(TemperatureSource::OneWire, 10.0);
    let mut config = test_config(&dir);
    config.thermal.compensation = false;
    let focuser = connected(&board, &config).await;

    board.set_temperature(TemperatureSource::OneWire, 30.0);
    assert_eq!(focuser.compensate_temperature().await.unwrap(), ThermalDecision::Skipped);
    assert!(board.motion_calls().is_empty());

    focuser.set_temperature_compensation(true).await;
    assert!(matches!(
        focuser.compensate_temperature().await.unwrap(),
        ThermalDecision::Adjust { steps: 280, .. }
    ));
    focuser.disconnect().await;
}

#[tokio::test]
async fn test_selected_source_is_read() {
    let dir = TempDir::new().unwrap();
    let board = Arc::new(SimulatedBoard::new().with_position(5000));
    board.set_temperature(TemperatureSource::OneWire, 10.0);
    board.set_temperature(TemperatureSource::AnalogPin15, 10.0);
    let focuser = connected(&board, &test_config(&dir)).await;

    focuser.set_temperature_source(TemperatureSource::AnalogPin15).await;
    board.set_temperature(TemperatureSource::OneWire, 40.0);
    let decision = focuser.compensate_temperature().await.unwrap();
    assert_eq!(decision, ThermalDecision::NoChange);
    assert!(board.calls().contains(&Request::GetTemperature(TemperatureSource::AnalogPin15)));
    focuser.disconnect().await;
}
