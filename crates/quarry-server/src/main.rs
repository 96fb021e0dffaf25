//! Quarry server entry point.
//!
//! Run with: `cargo run -p quarry-server -- --port 9999`

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use quarry_config::{Config, ServerArgs, default_config_dir};
use quarry_server::{GameServer, ServerError};
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let args = ServerArgs::parse();

    // Resolve config directory, load or create config, then apply CLI overrides.
    let config_dir = args.config.clone().unwrap_or_else(default_config_dir);
    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_server_args(&args);

    let log_dir = config_dir.join("logs");
    quarry_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    match serve(config).await {
        Ok(()) => {
            info!("Server stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn serve(config: Config) -> Result<(), ServerError> {
    config.validate()?;
    info!(
        "Quarry server v{} (seed {:#x}, {} Hz)",
        env!("CARGO_PKG_VERSION"),
        config.world.seed,
        config.rules.tick_rate
    );

    let server = Arc::new(GameServer::new(config));
    let signal_server = Arc::clone(&server);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received");
            signal_server.shutdown();
        }
    });

    server.run().await
}
