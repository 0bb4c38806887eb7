//! CAN telemetry gateway - main entry point

use can_gateway::config::GatewayConfig;
use can_gateway::gateway::Gateway;
use can_gateway::observability::init_default_logging;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tokio::{
    signal,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{error, info, warn};

/// How often the running gateway logs its health snapshot
const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// Resilient MQTT telemetry gateway for vehicle CAN metrics
#[derive(Parser)]
#[command(name = "can-gateway")]
#[command(about = "Resilient MQTT telemetry gateway for vehicle CAN metrics")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging (sets LOG_LEVEL=DEBUG unless already set)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway until SIGINT or SIGTERM
    Run,
    /// Validate configuration
    Config {
        /// Print the effective configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.verbose > 0 && std::env::var_os("LOG_LEVEL").is_none() {
        let level = if cli.verbose > 1 { "TRACE" } else { "DEBUG" };
        std::env::set_var("LOG_LEVEL", level);
    }
    init_default_logging();

    info!("Starting CAN gateway v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_gateway(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(
    config_path: Option<&std::path::Path>,
) -> Result<GatewayConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(GatewayConfig::load_from_file(path)?);
    }

    for path_str in ["gateway.toml", "config/gateway.toml"] {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(GatewayConfig::load_from_file(&path)?);
        }
    }

    Err("No configuration file found. Provide one with -c/--config or create gateway.toml".into())
}

async fn run_gateway(config: GatewayConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(gateway_id = %config.gateway.id, "Gateway starting");

    let mut gateway = Gateway::start(config).await?;

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
        _ = log_health(&gateway) => {}
    }

    gateway.shutdown().await;
    Ok(())
}

/// Periodically log the health snapshot; never returns
async fn log_health(gateway: &Gateway) {
    let mut ticker = interval(HEALTH_LOG_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let health = gateway.health();
        match serde_json::to_string(&health) {
            Ok(json) if health.connected => info!(health = %json, "Gateway health"),
            Ok(json) => warn!(health = %json, "Gateway degraded"),
            Err(e) => warn!("Health snapshot not serializable: {}", e),
        }
    }
}

fn handle_config_command(
    config: &GatewayConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Effective configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
