// focuser-sim: serve a simulated FPGA focuser board over TCP
use clap::Parser;
use focuser_shared::TemperatureSource;
use focuser_simulator::{SimulatedBoard, server};
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Debug, Parser)]
#[command(name = "focuser-sim", about = "Simulated FPGA focuser board")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:36000")]
    listen: String,
    /// Travel limit reported as grid-per-revolution
    #[arg(long, default_value_t = 10000)]
    grid: u32,
    /// Initial axis position
    #[arg(long, default_value_t = 0)]
    position: i32,
    /// Steps the axis advances per status query while moving
    #[arg(long, default_value_t = 250)]
    steps_per_status: u32,
    /// Temperature reported by every sensor, in °C
    #[arg(long, default_value_t = 15.0)]
    temperature: f64,
    /// Peak-to-peak noise added to temperature readings, in °C
    #[arg(long, default_value_t = 0.0)]
    noise: f64,
    #[arg(long, default_value = "info")]
    log_level: tracing::Level,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let args = Args::parse();
    tracing_subscriber::fmt().with_max_level(args.log_level).init();

    let board = SimulatedBoard::new()
        .with_grid_per_revolution(args.grid)
        .with_position(args.position)
        .with_steps_per_status(args.steps_per_status)
        .with_temperature_noise(args.noise);
    for source in [
        TemperatureSource::OneWire,
        TemperatureSource::AnalogPin14,
        TemperatureSource::AnalogPin15,
    ] {
        board.set_temperature(source, args.temperature);
    }

    let listener = TcpListener::bind(&args.listen).await?;
    server::serve(listener, Arc::new(board)).await?;
    Ok(())
}
