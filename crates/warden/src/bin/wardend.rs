//! Warden daemon: connects to the store and runs the cleanup sweeper.
//!
//! Configuration comes from the file named by `WARDEN_CONFIG` (default
//! `warden.toml`, optional) and `WARDEN__*` environment variables. A `.env`
//! file in the working directory is loaded first.

use std::path::PathBuf;
use std::process::ExitCode;

use warden::telemetry::init_tracing;
use warden::{Warden, WardenConfig, WardenError};

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "wardend exiting");
            eprintln!("wardend: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), WardenError> {
    let path = std::env::var_os("WARDEN_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("warden.toml"));
    let config = WardenConfig::load(Some(&path))?;
    init_tracing(&config.log_filter);
    tracing::info!(config = %path.display(), "configuration loaded");

    let warden = Warden::connect(config).await?;
    let sweeper = warden.spawn_sweeper();

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c; shutting down");
    }
    tracing::info!("shutdown requested");
    sweeper.shutdown().await;
    Ok(())
}
