//! Uplink Coordinator - Main Entry Point
//!
//! Runs the ground station: the worker listener and the operator console.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uplink_common::{Mode, UplinkConfig};
use uplink_coordinator::{Console, CoordinatorServer, GroundStation};

#[derive(Parser, Debug)]
#[command(name = "uplink-coordinator")]
#[command(version)]
#[command(about = "Ground station that assigns tasks to connected satellites")]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "UPLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Host to listen on
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = UplinkConfig::load(args.config.as_deref())?;
    config.mode = Mode::Coordinator;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    config.validate()?;

    // Initialize logging
    let observability = config.observability_config();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "uplink_coordinator={0},uplink_common={0}",
                    observability.log_level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Starting Uplink ground station");

    let coordinator_config = config.coordinator_config();
    info!(
        "Coordinator configuration loaded: bind={}, notify_timeout={}ms, seed tasks={}",
        config.address(),
        coordinator_config.notify_timeout_ms,
        coordinator_config.tasks.len()
    );

    let station = Arc::new(GroundStation::new(coordinator_config)?);
    let server = CoordinatorServer::bind(&config.address(), station.clone()).await?;
    let mut console = Console::new(station, tokio::io::stdin(), tokio::io::stdout())
        .with_metrics(observability.enable_metrics);

    info!("Uplink ground station running");

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = console.run() => {
            if let Err(e) = result {
                error!("Console failed: {}", e);
            }
        }
        result = server.serve() => {
            if let Err(e) = result {
                error!("Listener failed: {}", e);
                return Err(e.into());
            }
        }
    }

    info!("Uplink ground station shutdown complete");
    Ok(())
}
