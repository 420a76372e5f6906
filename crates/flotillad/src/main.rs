//! flotillad — the Flotilla daemon.
//!
//! Single binary that assembles all Flotilla subsystems:
//! - Process supervisor + instance fleet controller
//! - Load-balancer directory, config renderer, proxy reconciler
//! - Scaling controller
//! - Stats aggregator + durable event archive
//! - Correlation broker + WebSocket/HTTP gateway
//!
//! # Usage
//!
//! ```text
//! flotillad run --config flotilla.toml
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use flotilla_balancer::ShellRunner;
use flotilla_core::FlotillaConfig;
use flotilla_stats::RedbArchive;
use flotilla_supervisor::LocalSupervisor;
use flotillad::App;

#[derive(Parser)]
#[command(name = "flotillad", about = "Flotilla service fleet manager")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Boot the fleet and serve the management API.
    Run {
        /// Path to the flotilla.toml configuration file.
        #[arg(long, default_value = "flotilla.toml")]
        config: PathBuf,
    },

    /// Parse the configuration and print the service catalog.
    CheckConfig {
        #[arg(long, default_value = "flotilla.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,flotillad=debug,flotilla=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run { config } => run(config).await,
        Command::CheckConfig { config } => check_config(config),
    }
}

fn check_config(path: PathBuf) -> anyhow::Result<()> {
    let config = FlotillaConfig::from_file(&path)?;
    println!("manager listens on {}", config.manager.address());
    println!("proxy config at {}", config.proxy.config_path.display());
    for (service_type, spec) in &config.services {
        println!(
            "service {service_type}: base port {}, {} initial, {} max",
            spec.base_port, spec.initial_instances, spec.max_instances
        );
    }
    Ok(())
}

async fn run(config_path: PathBuf) -> anyhow::Result<()> {
    info!("flotilla daemon starting");

    let config = FlotillaConfig::from_file(&config_path)?;

    // Paths the daemon writes must exist before anything opens them.
    if let Some(parent) = config.proxy.config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if let Some(parent) = config.stats.archive_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let supervisor = Arc::new(LocalSupervisor::new());
    let runner = Arc::new(ShellRunner::new());
    let archive = Arc::new(RedbArchive::open(&config.stats.archive_path)?);

    let bind_addr: SocketAddr = config
        .manager
        .address()
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid manager address: {e}"))?;

    let app = App::bootstrap(config, supervisor, runner, archive).await?;

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = app.spawn_background(shutdown_rx);

    // ── Serve the gateway ──────────────────────────────────────

    info!(%bind_addr, "gateway starting");
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;

    let server = axum::serve(listener, app.router()).with_graceful_shutdown(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // Stop the proxy on the way out; instances die with the supervisor.
    let _ = app.reconciler.stop().await;

    for handle in handles {
        let _ = handle.await;
    }

    info!("flotilla daemon stopped");
    Ok(())
}
