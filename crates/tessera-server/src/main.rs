//! # Tessera Scheduler Server
//!
//! Loads configuration, recovers registered queues from the catalog and runs
//! their workers until interrupted.

use std::sync::Arc;
use tessera_config::ConfigLoader;
use tessera_core::init_tracing;
use tessera_jobs::{register_metrics, LoggingHandler};
use tessera_server::{app, startup};
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        // tracing may not be installed yet
        eprintln!("Application error: {:#}", e);
        error!("Application error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config_loader = ConfigLoader::from_default_location()?;
    let config = config_loader.get().await;

    init_tracing(&config.logging)?;
    startup::print_banner();
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    startup::print_startup_info(&config);

    register_metrics();

    let (service, report) = app::start(&config, Arc::new(LoggingHandler)).await?;
    startup::print_bootstrap_report(&report);

    shutdown_signal().await;

    service.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown...");
        }
    }
}
