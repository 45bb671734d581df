//! Agent configuration

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_secs;
use crate::error::ConfigError;

/// Configuration for the node agent.
///
/// Loaded once before the agent starts and immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Candidate manager addresses (`host:port`), probed in order
    pub join_addrs: Vec<String>,

    /// Agent identifier sent at registration (defaults to hostname)
    pub alias: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    pub log_level: String,

    /// Timeout for each manager liveness probe
    #[serde(with = "duration_secs")]
    pub probe_timeout: Duration,

    /// Timeout for establishing the tunnel
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Tunnel is considered dead after this long without any frame
    #[serde(with = "duration_secs")]
    pub heartbeat_timeout: Duration,

    /// Reconnect backoff
    pub backoff: BackoffConfig,

    /// Container engine control socket reached by the passthrough proxy
    pub container_socket: PathBuf,

    /// Name-resolution directory
    pub dns: DnsConfig,

    /// Reverse-proxy directory
    pub gateway: GatewayConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            join_addrs: vec!["127.0.0.1:9999".to_string()],
            alias: None,
            log_level: "info".to_string(),
            probe_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            heartbeat_timeout: Duration::from_secs(90),
            backoff: BackoffConfig::default(),
            container_socket: PathBuf::from("/var/run/docker.sock"),
            dns: DnsConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Agent identifier, falling back to hostname
    pub fn agent_id(&self) -> String {
        self.alias
            .clone()
            .unwrap_or_else(|| gethostname::gethostname().to_string_lossy().into_owned())
    }

    /// Replace the candidate list from a comma separated string
    pub fn set_join_addrs(&mut self, addrs: &str) {
        self.join_addrs = addrs
            .split(',')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(String::from)
            .collect();
    }

    /// Reject configurations the agent cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.join_addrs.is_empty() {
            return Err(ConfigError::Invalid(
                "join_addrs must list at least one manager".to_string(),
            ));
        }
        if let Some(addr) = self.join_addrs.iter().find(|a| a.contains("://")) {
            return Err(ConfigError::Invalid(format!(
                "join address {} must be host:port without a scheme",
                addr
            )));
        }
        if self.backoff.initial.is_zero() || self.backoff.max < self.backoff.initial {
            return Err(ConfigError::Invalid(
                "backoff.initial must be non-zero and not exceed backoff.max".to_string(),
            ));
        }
        if !self.backoff.multiplier.is_finite() || self.backoff.multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "backoff.multiplier must be a finite number of at least 1.0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Exponential backoff configuration for rejoining the cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// First delay, and the delay after any successful join
    #[serde(with = "duration_secs")]
    pub initial: Duration,

    /// Ceiling
    #[serde(with = "duration_secs")]
    pub max: Duration,

    /// Multiplier for each consecutive failure
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

/// Name-resolution directory settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsConfig {
    /// Address the directory server binds
    pub listen_addr: String,
    /// Domain appended to application names
    pub domain: String,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:5353".to_string(),
            domain: "wharf.local".to_string(),
        }
    }
}

/// Reverse-proxy directory settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address the directory server binds
    pub listen_addr: String,
    /// Address other hosts use to reach this gateway
    pub advertise_ip: Option<IpAddr>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8480".to_string(),
            advertise_ip: None,
        }
    }
}
