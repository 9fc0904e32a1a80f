//! Command-line configuration
//!
//! Flag names follow the usual controller-manager conventions so existing
//! deployment manifests keep working.

use crate::error::ControllerError;
use clap::{ArgAction, Parser, ValueEnum};
use std::net::SocketAddr;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

/// HelloWorld controller configuration
#[derive(Parser, Debug, Clone)]
#[command(name = "helloworld-controller", version, about = "Keeps one echo Pod per HelloWorld")]
pub struct Config {
    /// Address the metrics endpoint binds to; "0" disables it
    #[arg(long, default_value = ":8080")]
    pub metrics_bind_address: String,

    /// Address the health and readiness probes bind to
    #[arg(long, default_value = ":8081")]
    pub health_probe_bind_address: String,

    /// Only reconcile while holding the leader Lease
    #[arg(
        long,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_value_t = false,
        default_missing_value = "true"
    )]
    pub leader_elect: bool,

    /// Namespace of the leader Lease
    #[arg(long, env = "POD_NAMESPACE", default_value = "default")]
    pub leader_election_namespace: String,

    /// Name of the leader Lease
    #[arg(long, default_value = "80807133.tutorial.kubebuilder.io")]
    pub leader_election_id: String,

    /// Restrict watches to one namespace (default: all namespaces)
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    /// Number of HelloWorlds reconciled in parallel
    #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u16).range(1..))]
    pub max_concurrent_reconciles: u16,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Config {
    /// Metrics listen address, `None` when disabled
    pub fn metrics_addr(&self) -> Result<Option<SocketAddr>, ControllerError> {
        parse_bind_address(&self.metrics_bind_address)
    }

    /// Probe listen address, `None` when disabled
    pub fn probe_addr(&self) -> Result<Option<SocketAddr>, ControllerError> {
        parse_bind_address(&self.health_probe_bind_address)
    }
}

/// Parse a bind address.
///
/// `":8080"` binds all interfaces, `"0"` or an empty string disables the
/// listener, anything else must be a full socket address.
pub fn parse_bind_address(addr: &str) -> Result<Option<SocketAddr>, ControllerError> {
    let addr = addr.trim();
    if addr.is_empty() || addr == "0" {
        return Ok(None);
    }
    let full = match addr.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}"),
        None => addr.to_string(),
    };
    full.parse()
        .map(Some)
        .map_err(|e| ControllerError::InvalidConfig(format!("invalid bind address {addr:?}: {e}")))
}
