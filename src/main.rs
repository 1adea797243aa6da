// src/main.rs - Focuser host: connect to the board and serve the control API
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use focuser_rs::{BoardLink, Focuser, config};

#[derive(Parser, Debug)]
#[command(name = "focuser-host", about = "Motorized focuser controller")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "focuser.toml")]
    config: PathBuf,

    /// Override the web API listen address
    #[arg(long)]
    listen: Option<String>,

    #[arg(long, default_value = "info")]
    log_level: tracing::Level,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let args = Args::parse();
    tracing_subscriber::fmt().with_max_level(args.log_level).init();

    tracing::info!("Starting focuser host {}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Loading configuration from: {}", args.config.display());
    let mut config = config::load_config(&args.config).map_err(|e| {
        tracing::error!("Failed to load config from '{}': {}", args.config.display(), e);
        Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>
    })?;

    tracing::info!("Device: {}", config.device.name);

    let focuser = Focuser::new(&config);
    let link = Arc::new(BoardLink::new(&config.link));
    if let Err(e) = link.connect().await {
        tracing::error!("Focuser board at {} is unreachable: {}", link.address(), e);
        return Err(e.into());
    }
    if let Err(e) = focuser.connect(link.clone()).await {
        tracing::error!("Failed to connect focuser: {}", e);
        return Err(e.into());
    }

    let listen = args.listen.unwrap_or_else(|| config.web.listen.clone());
    let listener = tokio::net::TcpListener::bind(&listen).await?;
    tracing::info!("Web API listening on {}", listen);
    let app = focuser_rs::web::create_router(focuser.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
            }
            tracing::info!("Shutting down");
        })
        .await?;

    let presets = focuser.presets().await;
    focuser.disconnect().await;
    link.disconnect().await;

    if presets != config.presets.positions {
        config.presets.positions = presets;
        match config::save_config(&args.config, &config) {
            Ok(()) => tracing::info!("Saved focus presets to {}", args.config.display()),
            Err(e) => tracing::error!("Failed to save focus presets: {}", e),
        }
    }
    Ok(())
}
