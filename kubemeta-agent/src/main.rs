//! kubemeta-agent - Node agent keeping the Kubernetes metadata map fresh
//!
//! The agent runs on each Kubernetes node and:
//! - Connects to the API server with bounded retries
//! - Checks it is allowed to read events, services, pods and nodes
//! - Maps pods to services every poll interval
//! - Stops on SIGINT/SIGTERM

use anyhow::Result;
use kubemeta::config::Config;
use kubemeta::metadata::MetadataCache;
use log::info;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("kubemeta-agent v{} starting...", kubemeta::VERSION);

    let config = Config::load(None)?;
    let cancel = CancellationToken::new();

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            info!("Shutdown signal received");
            cancel.cancel();
        }
    });

    kubemeta_agent::runner::run(config, MetadataCache::new(), cancel).await?;

    info!("kubemeta-agent stopped");
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            log::warn!("Failed to listen for SIGTERM: {}", e);
            let _ = signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}
