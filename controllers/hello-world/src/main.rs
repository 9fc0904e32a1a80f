//! HelloWorld Controller
//!
//! Keeps exactly one echo Pod per HelloWorld custom resource:
//! - creates the Pod when it is missing
//! - replaces it when the message changes or the Pod drifts
//! - leaves cleanup on HelloWorld deletion to owner-reference garbage collection

mod cluster;
mod config;
mod controller;
mod error;
mod events;
mod leader;
mod metrics;
mod probes;
mod reconciler;
mod watcher;

#[cfg(test)]
mod test_utils;

use crate::config::{Config, LogFormat};
use crate::error::ControllerError;
use clap::Parser;
use controller::Controller;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    let config = Config::parse();
    init_tracing(config.log_format);

    // Configure rustls crypto provider before any TLS connection is made
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A rustls crypto provider was already installed");
    }

    info!("Starting HelloWorld Controller");
    info!("Configuration:");
    info!("  Metrics address: {}", config.metrics_bind_address);
    info!("  Health probe address: {}", config.health_probe_bind_address);
    info!("  Leader election: {}", config.leader_elect);
    info!("  Max concurrent reconciles: {}", config.max_concurrent_reconciles);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
