//! Host information snapshot served at `/sysinfo`

use serde::Serialize;
use sysinfo::System;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SysInfoError {
    #[error("System information is not available on this platform")]
    Unsupported,

    #[error("System information collection failed: {0}")]
    Collect(String),
}

/// Load averages over 1, 5 and 15 minutes
#[derive(Debug, Clone, Serialize)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

/// Host snapshot reported to the manager
#[derive(Debug, Clone, Serialize)]
pub struct SystemInfo {
    pub agent_id: String,
    pub agent_version: String,
    pub hostname: String,
    pub os_name: Option<String>,
    pub os_version: Option<String>,
    pub kernel_version: Option<String>,
    pub arch: String,
    pub cpus: usize,
    pub memory_total: u64,
    pub memory_used: u64,
    pub swap_total: u64,
    pub swap_used: u64,
    pub load_average: LoadAverage,
    pub uptime_secs: u64,
}

impl SystemInfo {
    /// Collect a snapshot on a blocking thread
    pub async fn gather(agent_id: String) -> Result<Self, SysInfoError> {
        tokio::task::spawn_blocking(move || Self::collect(agent_id))
            .await
            .map_err(|e| SysInfoError::Collect(e.to_string()))?
    }

    fn collect(agent_id: String) -> Result<Self, SysInfoError> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return Err(SysInfoError::Unsupported);
        }

        let mut sys = System::new();
        sys.refresh_memory();
        sys.refresh_cpu_all();

        let load = System::load_average();

        Ok(Self {
            agent_id,
            agent_version: env!("CARGO_PKG_VERSION").to_string(),
            hostname: gethostname::gethostname().to_string_lossy().into_owned(),
            os_name: System::name(),
            os_version: System::os_version(),
            kernel_version: System::kernel_version(),
            arch: std::env::consts::ARCH.to_string(),
            cpus: sys.cpus().len(),
            memory_total: sys.total_memory(),
            memory_used: sys.used_memory(),
            swap_total: sys.total_swap(),
            swap_used: sys.used_swap(),
            load_average: LoadAverage {
                one: load.one,
                five: load.five,
                fifteen: load.fifteen,
            },
            uptime_secs: System::uptime(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_gather_reports_host() {
        let info = SystemInfo::gather("node-1".to_string()).await.unwrap();
        assert_eq!(info.agent_id, "node-1");
        assert!(!info.hostname.is_empty());
        assert!(info.cpus > 0);
        assert!(info.memory_total >= info.memory_used);
    }
}
