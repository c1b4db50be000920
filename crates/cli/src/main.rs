//! Process entry point for a storage node: loads configuration, wires
//! up the node, runs until a termination signal, then drains
//! background tasks before exiting.

use clap::Parser;
use cli::{CliArgs, LifecycleService, NodeConfig};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::telemetry::init_tracing()?;

    let args = CliArgs::parse();
    let config = NodeConfig::load(args)?;
    tracing::info!(node_id = %config.node_id, bind = %config.bind, "starting node");

    let service = Arc::new(LifecycleService::build(&config).await?);
    let run_handle = {
        let service = service.clone();
        tokio::spawn(async move { service.run().await })
    };

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received, draining");
    service.stop().await;

    if let Err(e) = run_handle.await {
        tracing::warn!(error = %e, "node task panicked during shutdown");
    }
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
