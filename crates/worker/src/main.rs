//! Uplink Worker - Main Entry Point
//!
//! Connects a satellite to the ground station and executes assigned tasks
//! until the station closes the connection or Ctrl-C is pressed.

use clap::Parser;
use std::path::PathBuf;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uplink_common::{Mode, UplinkConfig};
use uplink_worker::WorkerClient;

#[derive(Parser, Debug)]
#[command(name = "uplink-worker")]
#[command(version)]
#[command(about = "Satellite that executes tasks assigned by a ground station")]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "UPLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Host where the ground station listens
    #[arg(long)]
    host: Option<String>,

    /// Port where the ground station listens
    #[arg(long)]
    port: Option<u16>,

    /// Resource id this satellite will handle (repeatable)
    #[arg(long = "resources", short = 'r')]
    resources: Vec<String>,

    /// Name used in logs
    #[arg(long)]
    name: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = UplinkConfig::load(args.config.as_deref())?;
    config.mode = Mode::Worker;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    let mut worker_config = config.worker_config();
    if !args.resources.is_empty() {
        worker_config.resources = args.resources;
    }
    if args.name.is_some() {
        worker_config.name = args.name;
    }
    config.worker = Some(worker_config.clone());
    config.validate()?;

    // Initialize logging
    let observability = config.observability_config();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "uplink_worker={0},uplink_common={0}",
                    observability.log_level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Uplink satellite");
    info!(
        "Worker configuration loaded: station={}, resources={:?}",
        config.address(),
        worker_config.resources
    );

    let mut client = WorkerClient::new(config.address(), worker_config);
    let shutdown = client.shutdown_handle();
    client.connect().await?;

    let mut runner = tokio::spawn(async move {
        let result = client.run().await;
        (client, result)
    });

    // Wait for shutdown signal
    let (client, result) = tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received shutdown signal");
            shutdown.stop();
            runner.await?
        }
        joined = &mut runner => joined?,
    };
    result?;

    info!(
        "Executed {} task(s), total payoff {}",
        client.ledger().executed().len(),
        client.ledger().total_payoff()
    );
    info!("Uplink satellite shutdown complete");
    Ok(())
}
