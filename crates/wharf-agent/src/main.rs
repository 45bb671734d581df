//! wharf agent daemon
//!
//! Runs on every cluster host. Joins the first reachable manager, keeps the
//! host's service directories synchronized, and serves the agent API over
//! the cluster tunnel.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wharf_agent::directory::Directories;
use wharf_agent::AgentSupervisor;
use wharf_core::config::{self, AgentConfig};
use wharf_core::traits::DefaultRecordBuilder;

#[derive(Parser)]
#[command(name = "wharf-agent")]
#[command(about = "wharf node agent - joins the cluster and syncs service directories")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Comma separated manager addresses (host:port), tried in order
    #[arg(short, long, env = "WHARF_JOIN_ADDRS")]
    join_addrs: Option<String>,

    /// Agent identifier (defaults to hostname)
    #[arg(long, env = "WHARF_ALIAS")]
    alias: Option<String>,

    /// Address other hosts use to reach this host's gateway
    #[arg(long, env = "WHARF_ADVERTISE_IP")]
    advertise_ip: Option<IpAddr>,

    /// Domain appended to application names in the name-resolution directory
    #[arg(long, env = "WHARF_DOMAIN")]
    domain: Option<String>,

    /// Listen address of the name-resolution directory
    #[arg(long)]
    dns_listen: Option<String>,

    /// Listen address of the reverse-proxy directory
    #[arg(long)]
    gateway_listen: Option<String>,

    /// Container engine socket reached through /proxy
    #[arg(long, env = "WHARF_CONTAINER_SOCKET")]
    container_socket: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, env = "WHARF_LOG_LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config: AgentConfig = match &args.config {
        Some(path) => config::load_config(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => {
            let default_path = config::default_config_path();
            if default_path.exists() {
                config::load_config(&default_path)
                    .with_context(|| format!("Failed to load config from {:?}", default_path))?
            } else {
                AgentConfig::default()
            }
        }
    };

    // Apply command-line overrides
    if let Some(addrs) = &args.join_addrs {
        config.set_join_addrs(addrs);
    }
    if let Some(alias) = args.alias {
        config.alias = Some(alias);
    }
    if let Some(ip) = args.advertise_ip {
        config.gateway.advertise_ip = Some(ip);
    }
    if let Some(domain) = args.domain {
        config.dns.domain = domain;
    }
    if let Some(addr) = args.dns_listen {
        config.dns.listen_addr = addr;
    }
    if let Some(addr) = args.gateway_listen {
        config.gateway.listen_addr = addr;
    }
    if let Some(socket) = args.container_socket {
        config.container_socket = socket;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    config.validate().context("Invalid configuration")?;

    tracing::info!("wharf agent starting...");
    tracing::info!("Agent id: {}", config.agent_id());
    tracing::info!("Managers: {}", config.join_addrs.join(", "));

    let directories = Directories::from_config(&config);
    let builder = Arc::new(DefaultRecordBuilder::new(config.dns.domain.clone()));
    let supervisor =
        AgentSupervisor::new(config, directories, builder).context("Failed to create agent")?;

    // Setup signal handlers
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel_clone.cancel();
    });

    if let Err(e) = supervisor.run(cancel).await {
        tracing::error!("Agent stopped: {}", e);
        return Err(e).context("Fatal agent error");
    }

    tracing::info!("wharf agent stopped");
    Ok(())
}
