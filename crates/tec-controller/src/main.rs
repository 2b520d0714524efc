//! TEC controller entry point.
//!
//! Loads the boot configuration, binds the client port, and runs the
//! cooperative controller loop until Ctrl+C.
//!
//! # Usage
//!
//! ```text
//! tec-controller [OPTIONS]
//!
//! Options:
//!   --config <PATH>  Boot configuration file [default: tec-controller.toml]
//!   --bind   <IP>    Override the configured listen address
//!   --port   <PORT>  Override the configured listen port
//! ```
//!
//! | Variable     | Description                   |
//! |--------------|-------------------------------|
//! | `TEC_CONFIG` | Boot configuration file       |
//! | `TEC_BIND`   | Listen address override       |
//! | `TEC_PORT`   | Listen port override          |
//! | `RUST_LOG`   | Log filter; beats `log_level` |
//!
//! Peer boards are hosted on an in-process simulated bus, one per board
//! number in the TEC map other than this board's own.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tec_controller::application::route_commands::CommandRouter;
use tec_controller::application::run_loop::ControllerService;
use tec_controller::infrastructure::actuation::SimulatedChannels;
use tec_controller::infrastructure::bus::SimulatedBus;
use tec_controller::infrastructure::network::{ConnectionManager, TcpTransport};
use tec_controller::infrastructure::storage::config::{load_config, AppConfig};
use tec_controller::infrastructure::timer::IntervalTicker;

/// Pause between cycles that found nothing to do.
const IDLE_SLEEP: Duration = Duration::from_millis(2);

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Network-facing TEC controller.
#[derive(Debug, Parser)]
#[command(name = "tec-controller", about = "Thermoelectric cooler controller", version)]
struct Cli {
    /// Boot configuration file.
    #[arg(long, default_value = "tec-controller.toml", env = "TEC_CONFIG")]
    config: PathBuf,

    /// Listen address, overriding `[network] ip`.
    #[arg(long, env = "TEC_BIND")]
    bind: Option<Ipv4Addr>,

    /// Listen port, overriding `[network] port`.
    #[arg(long, env = "TEC_PORT")]
    port: Option<u16>,
}

impl Cli {
    fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(ip) = self.bind {
            config.network.ip = ip;
        }
        if let Some(port) = self.port {
            config.network.port = port;
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let loaded = load_config(&cli.config);

    // `RUST_LOG` wins; otherwise the configured level, otherwise `info`.
    let level = loaded
        .as_ref()
        .map(|c| c.controller.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    let mut app = loaded.with_context(|| format!("loading {}", cli.config.display()))?;
    cli.apply_overrides(&mut app);
    let config = app
        .controller_config()
        .with_context(|| format!("invalid configuration in {}", cli.config.display()))?;

    info!(
        box_no = config.box_no,
        board = config.board_no,
        role = ?config.role,
        tecs = config.tecs.len(),
        "TEC controller starting"
    );

    // ── Bus and peer boards ───────────────────────────────────────────────────
    let bus = SimulatedBus::new(app.bus.max_transfer);
    for board in 1..=config.board_count {
        if board != config.board_no && config.tecs.on_board(board).next().is_some() {
            bus.attach(board, config.channels_per_board);
        }
    }

    let running = Arc::new(AtomicBool::new(true));

    let peer_bus = bus.clone();
    let peer_running = Arc::clone(&running);
    let period = app.collection_period();
    tokio::spawn(async move {
        let mut ticks = tokio::time::interval(period);
        while peer_running.load(Ordering::Relaxed) {
            ticks.tick().await;
            peer_bus.tick_peripherals();
        }
    });

    // ── Network ───────────────────────────────────────────────────────────────
    let addr = SocketAddr::from((config.ip, config.port));
    let transport = TcpTransport::bind(addr)
        .await
        .with_context(|| format!("binding client port {addr}"))?;
    let connections = ConnectionManager::new(Box::new(transport), app.connection_limits());

    let router = CommandRouter::new(
        &config,
        SimulatedChannels::new(config.channels_per_board),
        bus,
    );
    let ticker = IntervalTicker::new(period);
    let mut service = ControllerService::new(
        config,
        connections,
        router,
        Box::new(ticker),
        app.service_options(),
    );

    // ── Graceful shutdown flag ────────────────────────────────────────────────
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    // ── Main loop ─────────────────────────────────────────────────────────────
    while running.load(Ordering::Relaxed) {
        let report = service.run_once().await;
        if report.messages == 0 && report.commands.is_empty() {
            tokio::time::sleep(IDLE_SLEEP).await;
        }
    }

    info!("TEC controller stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults_leave_config_untouched() {
        // Arrange
        let cli = Cli::parse_from(["tec-controller"]);
        let mut cfg = AppConfig::default();

        // Act
        cli.apply_overrides(&mut cfg);

        // Assert
        assert_eq!(cli.config, PathBuf::from("tec-controller.toml"));
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_bind_and_port_override_network_section() {
        let cli = Cli::parse_from(["tec-controller", "--bind", "127.0.0.1", "--port", "4600"]);
        let mut cfg = AppConfig::default();

        cli.apply_overrides(&mut cfg);

        assert_eq!(cfg.network.ip, Ipv4Addr::LOCALHOST);
        assert_eq!(cfg.network.port, 4600);
    }
}
