// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

use bus::Bus;
use clap::Parser;
use common::config::{DEFAULT_CONFIG_PATH, GypsyConfig};
use module_core::{Event, EventBus, EventKind, Module, ModuleCtx};
use registry::Registry;
use std::path::{Path, PathBuf};
use tokio::{
    signal::unix::{SignalKind, signal},
    sync::broadcast::error::RecvError,
};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file, /etc/gypsy.json when present
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Path of the bus socket
    #[arg(short, long)]
    socket: Option<PathBuf>,
    /// Mirror raw NMEA data into <prefix>.<device>
    #[arg(short = 'l', long, value_name = "PREFIX")]
    nmea_log: Option<PathBuf>,
    /// Exit once no client has held a device for a while
    #[arg(short, long)]
    auto_terminate: bool,
}

fn load_config(cli: &Cli) -> Result<GypsyConfig, ()> {
    let default_path = Path::new(DEFAULT_CONFIG_PATH);
    let config = match &cli.config {
        Some(path) => GypsyConfig::load(path),
        None if default_path.exists() => GypsyConfig::load(default_path),
        None => {
            info!("No config file found, every device will be denied");
            Ok(GypsyConfig::default())
        }
    };
    let mut config = config.map_err(|e| error!("{}", e))?;

    if let Some(socket) = &cli.socket {
        config.socket_path = socket.clone();
    }
    if let Some(prefix) = &cli.nmea_log {
        config.nmea_log = Some(prefix.clone());
    }
    config.auto_terminate |= cli.auto_terminate;
    debug!("Configuration: {:?}", config);
    Ok(config)
}

/// Waits for the registry's idle termination or a stop signal, then quits all modules.
async fn supervise(mut ctx: ModuleCtx) -> Result<(), ()> {
    let mut terminate = signal(SignalKind::terminate())
        .map_err(|e| error!("Failed to install SIGTERM handler. Error: {}", e))?;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            event = ctx.receiver.recv() => match event {
                Ok(Event { kind: EventKind::TerminateEvent }) => {
                    info!("Idle timeout expired, terminating");
                    break;
                }
                Ok(Event { kind: EventKind::QuitEvent }) | Err(RecvError::Closed) => return Ok(()),
                Ok(_) | Err(RecvError::Lagged(_)) => (),
            },
            _ = &mut ctrl_c => {
                info!("Interrupted, terminating");
                break;
            }
            _ = terminate.recv() => {
                info!("SIGTERM received, terminating");
                break;
            }
        }
    }

    let _ = ctx.publish_event(EventKind::QuitEvent);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), ()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = load_config(&cli)?;
    let eb = EventBus::default();
    let mut registry = Registry::new(eb.context(), &config);
    let mut bus = Bus::bind(eb.context(), &config.socket_path).map_err(|e| {
        error!(
            "Failed to bind bus socket {}. Error: {}",
            config.socket_path.display(),
            e
        )
    })?;

    info!("Starting modules...");
    let (registry_result, bus_result, supervisor_result) =
        tokio::join!(registry.run(), bus.run(), supervise(eb.context()));
    registry_result.and(bus_result).and(supervisor_result)
}
