// src/hardware/mod.rs - TCP link to the focuser board
pub mod temperature;

pub use temperature::{SensorError, TemperatureSensor};

use async_trait::async_trait;
use focuser_shared::config::LinkConfig;
use focuser_shared::protocol::{self, Request};
use focuser_shared::{AxisStatus, HardwareLink, LinkError, TemperatureSource};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio::time::timeout;

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

/// `HardwareLink` over the board's line protocol.
///
/// One request is in flight at a time. The connection is opened lazily and
/// dropped after a timeout or transport error, so the next request reconnects
/// instead of reading a stale reply.
pub struct BoardLink {
    address: String,
    timeout: Duration,
    connection: Mutex<Option<Connection>>,
}

impl BoardLink {
    pub fn new(config: &LinkConfig) -> Self {
        Self {
            address: format!("{}:{}", config.host, config.port),
            timeout: Duration::from_millis(config.timeout_ms),
            connection: Mutex::new(None),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Open the connection now rather than on the first request.
    pub async fn connect(&self) -> Result<(), LinkError> {
        let mut connection = self.connection.lock().await;
        *connection = Some(self.open().await?);
        Ok(())
    }

    pub async fn disconnect(&self) {
        if self.connection.lock().await.take().is_some() {
            tracing::info!("Disconnected from focuser board at {}", self.address);
        }
    }

    async fn open(&self) -> Result<Connection, LinkError> {
        tracing::info!("Connecting to focuser board at {}", self.address);
        let stream = timeout(self.timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| LinkError::Timeout(format!("connect {}", self.address)))??;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok(Connection { reader: BufReader::new(reader), writer })
    }

    async fn request(&self, request: Request) -> Result<Vec<String>, LinkError> {
        let mut guard = self.connection.lock().await;
        if guard.is_none() {
            *guard = Some(self.open().await?);
        }
        let connection = guard.as_mut().ok_or(LinkError::NotConnected)?;
        let line = request.encode();
        tracing::debug!("Board <- {}", line);
        match timeout(self.timeout, exchange(connection, &line)).await {
            Ok(Ok(reply)) => {
                tracing::debug!("Board -> {}", reply);
                protocol::parse_reply(&reply)
            }
            Ok(Err(e)) => {
                tracing::error!("Focuser board link failed on '{}': {}", line, e);
                *guard = None;
                Err(e)
            }
            Err(_) => {
                tracing::error!("Timeout waiting for focuser board reply to '{}'", line);
                *guard = None;
                Err(LinkError::Timeout(line))
            }
        }
    }

    async fn value<T: std::str::FromStr>(&self, request: Request, what: &str) -> Result<T, LinkError> {
        protocol::value(&self.request(request).await?, what)
    }

    async fn acknowledged(&self, request: Request) -> Result<bool, LinkError> {
        protocol::acknowledged(&self.request(request).await?)
    }
}

async fn exchange(connection: &mut Connection, line: &str) -> Result<String, LinkError> {
    connection.writer.write_all(format!("{}\n", line).as_bytes()).await?;
    connection.writer.flush().await?;
    let mut reply = String::new();
    if protocol::read_line(&mut connection.reader, &mut reply).await? == 0 {
        return Err(LinkError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "board closed the connection",
        )));
    }
    Ok(reply.trim().to_string())
}

#[async_trait]
impl HardwareLink for BoardLink {
    async fn initialize(&self) -> Result<(), LinkError> {
        self.request(Request::Initialize).await.map(|_| ())
    }

    async fn axis_status(&self) -> Result<AxisStatus, LinkError> {
        let reply = self.request(Request::AxisStatus).await?;
        let fields: Vec<&str> = reply.iter().map(String::as_str).collect();
        Ok(AxisStatus {
            initialized: protocol::flag_field(&fields, 0, "initialized flag")?,
            running: protocol::flag_field(&fields, 1, "running flag")?,
            direction: protocol::flag_field(&fields, 2, "direction flag")?,
        })
    }

    async fn position(&self) -> Result<i32, LinkError> {
        self.value(Request::GetPosition, "position").await
    }

    async fn set_position(&self, ticks: i32) -> Result<(), LinkError> {
        self.request(Request::SetPosition(ticks)).await.map(|_| ())
    }

    async fn start_absolute_move(&self, target: i32, period_ticks: f64, direction: bool) -> Result<bool, LinkError> {
        self.acknowledged(Request::GotoTarget { target, period_ticks, direction }).await
    }

    async fn start_relative_move(&self, ticks: u32, period_ticks: f64, direction: bool) -> Result<bool, LinkError> {
        self.acknowledged(Request::Increment { ticks, period_ticks, direction }).await
    }

    async fn stop(&self, hard: bool) -> Result<bool, LinkError> {
        self.acknowledged(Request::Stop { hard }).await
    }

    async fn grid_per_revolution(&self) -> Result<u32, LinkError> {
        self.value(Request::GetGridPerRevolution, "grid per revolution").await
    }

    async fn set_grid_per_revolution(&self, value: u32) -> Result<bool, LinkError> {
        self.acknowledged(Request::SetGridPerRevolution(value)).await
    }

    async fn home_position(&self) -> Result<i32, LinkError> {
        self.value(Request::GetHomePosition, "home position").await
    }

    async fn timer_frequency_hz(&self) -> Result<f64, LinkError> {
        self.value(Request::GetTimerFrequency, "timer frequency").await
    }

    async fn min_period(&self) -> Result<u32, LinkError> {
        self.value(Request::GetMinPeriod, "min period").await
    }

    async fn max_period(&self) -> Result<u32, LinkError> {
        self.value(Request::GetMaxPeriod, "max period").await
    }

    async fn set_backlash_period(&self, period_ticks: f64) -> Result<bool, LinkError> {
        self.acknowledged(Request::SetBacklashPeriod(period_ticks)).await
    }

    async fn set_backlash_cycles(&self, cycles: u32) -> Result<bool, LinkError> {
        self.acknowledged(Request::SetBacklashCycles(cycles)).await
    }

    async fn enable_backlash(&self, enabled: bool) -> Result<bool, LinkError> {
        self.acknowledged(Request::EnableBacklash(enabled)).await
    }

    async fn set_motor_type(&self, tmc: bool) -> Result<bool, LinkError> {
        self.acknowledged(Request::SetMotorType(tmc)).await
    }

    async fn set_debug(&self, enabled: bool) -> Result<bool, LinkError> {
        self.acknowledged(Request::SetDebug(enabled)).await
    }

    async fn temperature(&self, source: TemperatureSource) -> Result<f64, LinkError> {
        self.value(Request::GetTemperature(source), "temperature").await
    }
}
