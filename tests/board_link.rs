//! BoardLink talking to the simulated board over TCP

use std::sync::Arc;

use focuser_rs::BoardLink;
use focuser_rs::config::LinkConfig;
use focuser_shared::{HardwareLink, LinkError, TemperatureSource};
use focuser_simulator::SimulatedBoard;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

async fn serve(board: Arc<SimulatedBoard>) -> LinkConfig {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(focuser_simulator::server::serve(listener, board));
    LinkConfig { host: "127.0.0.1".to_string(), port, timeout_ms: 500 }
}

#[tokio::test]
async fn test_commands_round_trip_over_tcp() {
    let board = Arc::new(SimulatedBoard::new().with_position(120));
    board.set_temperature(TemperatureSource::AnalogPin14, 7.5);
    let link = BoardLink::new(&serve(board.clone()).await);

    let status = link.axis_status().await.unwrap();
    assert!(status.initialized);
    assert!(!status.running);
    assert_eq!(link.position().await.unwrap(), 120);
    assert_eq!(link.grid_per_revolution().await.unwrap(), 10000);
    assert_eq!(link.timer_frequency_hz().await.unwrap(), 1_000_000.0);
    assert_eq!(link.temperature(TemperatureSource::AnalogPin14).await.unwrap(), 7.5);

    assert!(link.start_absolute_move(900, 250.0, true).await.unwrap());
    assert!(link.axis_status().await.unwrap().running);
    assert_eq!(board.last_period_ticks(), Some(250.0));
    assert!(link.stop(false).await.unwrap());
    assert!(!board.is_running());

    link.set_position(42).await.unwrap();
    assert_eq!(board.current_position(), 42);
}

#[tokio::test]
async fn test_declined_request_reads_false() {
    let board = Arc::new(SimulatedBoard::new());
    board.set_decline_backlash(true);
    let link = BoardLink::new(&serve(board.clone()).await);

    assert!(!link.set_backlash_cycles(5).await.unwrap());
    assert!(link.set_debug(true).await.unwrap());
    assert!(board.debug_enabled());
}

#[tokio::test]
async fn test_silent_board_times_out_and_reconnects() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    // Accepts connections but never answers.
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    let link = BoardLink::new(&LinkConfig { host: "127.0.0.1".to_string(), port, timeout_ms: 100 });

    assert!(matches!(link.position().await, Err(LinkError::Timeout(_))));
    assert!(matches!(link.position().await, Err(LinkError::Timeout(_))));
}

#[tokio::test]
async fn test_unreachable_board_is_an_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    let link = BoardLink::new(&LinkConfig { host: "127.0.0.1".to_string(), port, timeout_ms: 200 });
    assert!(link.axis_status().await.is_err());
}

#[tokio::test]
async fn test_explicit_connect_and_disconnect() {
    let board = Arc::new(SimulatedBoard::new().with_position(64));
    let config = serve(board.clone()).await;
    let link = BoardLink::new(&config);
    assert_eq!(link.address(), format!("127.0.0.1:{}", config.port));

    link.connect().await.unwrap();
    assert_eq!(link.position().await.unwrap(), 64);
    link.disconnect().await;
    // The next request opens a fresh connection.
    assert_eq!(link.position().await.unwrap(), 64);
}

#[tokio::test]
async fn test_unterminated_reply_is_rejected() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    // Answers every request with a reply that never ends.
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 64];
        let _ = stream.read(&mut request).await;
        let _ = stream.write_all(&[b'7'; 4096]).await;
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    let link = BoardLink::new(&LinkConfig { host: "127.0.0.1".to_string(), port, timeout_ms: 2000 });
    assert!(matches!(link.position().await, Err(LinkError::Io(_))));
}
