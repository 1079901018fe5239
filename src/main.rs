//! mqtt-session - Main Entry Point
//!
//! Connects with a last will, subscribes, publishes periodically, and
//! disconnects gracefully on SIGINT or SIGTERM.

use clap::{Parser, Subcommand};
use mqtt_session::config::ClientConfig;
use mqtt_session::observability::{init_logging, LoggingOptions};
use mqtt_session::session::{EventDispatcher, LoggingHandler, SessionLifecycle};
use mqtt_session::transport::mqtt::RumqttConnector;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

const DEFAULT_CONFIG_PATHS: [&str; 2] = ["mqtt-session.toml", "config/mqtt-session.toml"];

/// Long-lived MQTT client session
#[derive(Parser)]
#[command(name = "mqtt-session")]
#[command(about = "MQTT client session with last will and periodic publishing")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "MQTT_SESSION_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and run until interrupted
    Run,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(LoggingOptions::from_env().with_verbosity(cli.verbose)) {
        eprintln!("Failed to initialize logging: {e}");
    }

    info!("Starting mqtt-session v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_session(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(config_path: Option<&Path>) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(ClientConfig::load_from_file(path)?);
    }

    for path_str in DEFAULT_CONFIG_PATHS {
        let path = Path::new(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(ClientConfig::load_from_file(path)?);
        }
    }

    Err("No configuration file found. Provide one with -c/--config or create mqtt-session.toml".into())
}

async fn run_session(config: ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(client_id = %config.session.client_id, "Session starting");

    let dispatcher = EventDispatcher::new(config.subscribe.subscriptions())
        .with_handler(Arc::new(LoggingHandler));
    let mut session = SessionLifecycle::new(&config, RumqttConnector::new(), dispatcher);

    // Install handlers before connecting so an early signal still disconnects cleanly
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    session.start().await?;
    info!("Session is running; press Ctrl+C to stop");

    session
        .run_until(async move {
            tokio::select! {
                _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully..."),
                _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
            }
        })
        .await?;

    Ok(())
}

fn handle_config_command(config: &ClientConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
