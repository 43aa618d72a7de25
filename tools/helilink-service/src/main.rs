//! helilink - bridge between the operator's control channel and the
//! attached accessory

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use helilink_accessory::{LinkManager, SerialAccessoryHost};
use helilink_bridge::{BridgeService, HttpProbe, SocketIoChannel};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

use config::HelilinkConfig;

/// helilink accessory bridge
#[derive(Parser)]
#[command(name = "helilink")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "HELILINK_CONFIG")]
    config: Option<PathBuf>,

    /// Control channel server URL (overrides the config file)
    #[arg(short, long, global = true, env = "HELILINK_SERVER")]
    server: Option<String>,

    /// Serial port of the accessory (overrides the config file)
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge (default)
    Run,

    /// List serial ports that could host the accessory
    ListPorts,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli.log_level, cli.json_logs)?;

    let mut config = HelilinkConfig::load(cli.config.as_deref())?;
    if let Some(server) = cli.server {
        config.channel.server_url = server;
    }
    if let Some(port) = cli.port {
        config.accessory.port = Some(port);
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await,
        Commands::ListPorts => list_ports(),
    }
}

fn setup_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Failed to parse log level")?;

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).compact().with_writer(std::io::stderr))
            .init();
    }

    Ok(())
}

fn list_ports() -> Result<()> {
    let ports = SerialAccessoryHost::list_ports().context("Failed to enumerate serial ports")?;

    if ports.is_empty() {
        println!("No serial ports found.");
        return Ok(());
    }

    for port in ports {
        match (port.vendor_id, port.product_id) {
            (Some(vid), Some(pid)) => println!("  {} [{:04x}:{:04x}]", port, vid, pid),
            _ => println!("  {}", port),
        }
    }

    Ok(())
}

async fn run(config: HelilinkConfig) -> Result<()> {
    info!(
        "Starting helilink bridge (server {})",
        config.channel.server_url
    );

    let host = Arc::new(SerialAccessoryHost::new(config.serial_host()));
    let (link, link_events) = LinkManager::new(host, config.link());

    let channel = SocketIoChannel::new(config.socketio());
    let probe = HttpProbe::new(
        &config.channel.server_url,
        &config.keepalive.path,
        config.keepalive_timeout(),
    )
    .context("Failed to create keepalive probe")?;

    let service = BridgeService::new(link, link_events, channel, Arc::new(probe), config.service());

    service
        .run(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received shutdown signal"),
                Err(e) => {
                    error!("Failed to listen for ctrl+c: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        })
        .await
        .context("Bridge service failed")?;

    info!("helilink bridge stopped");
    Ok(())
}
