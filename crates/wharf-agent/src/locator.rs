//! Manager discovery
//!
//! Probes the configured candidates in order and settles on the first one
//! whose `/ping` answers with a success status.

use std::time::Duration;

use thiserror::Error;

use wharf_core::ManagerAddr;

/// Discovery errors
#[derive(Debug, Error)]
pub enum LocatorError {
    /// The probe client could not be built
    #[error("Failed to build probe client: {0}")]
    Client(#[from] reqwest::Error),

    /// Every candidate failed its probe
    #[error("No manager available among {tried} candidate(s)")]
    Unavailable { tried: usize },
}

/// Finds a live manager among the configured candidates
#[derive(Debug, Clone)]
pub struct ManagerLocator {
    client: reqwest::Client,
}

impl ManagerLocator {
    /// Create a locator whose probes give up after `probe_timeout`
    pub fn new(probe_timeout: Duration) -> Result<Self, LocatorError> {
        // Probe connections are never reused
        let client = reqwest::Client::builder()
            .timeout(probe_timeout)
            .pool_max_idle_per_host(0)
            .build()?;
        Ok(Self { client })
    }

    /// Return the first candidate that answers its liveness probe.
    ///
    /// Candidates are tried strictly in order; a failed probe is logged and
    /// the next candidate is tried.
    pub async fn detect(&self, candidates: &[String]) -> Result<ManagerAddr, LocatorError> {
        for candidate in candidates {
            let addr = ManagerAddr::new(candidate.as_str());
            match self.probe(&addr).await {
                Ok(()) => {
                    tracing::info!("Manager {} is available", addr);
                    return Ok(addr);
                }
                Err(reason) => {
                    tracing::warn!("Manager {} unavailable: {}", addr, reason);
                }
            }
        }

        Err(LocatorError::Unavailable {
            tried: candidates.len(),
        })
    }

    async fn probe(&self, addr: &ManagerAddr) -> Result<(), String> {
        let response = self
            .client
            .get(addr.url("/ping"))
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("ping answered {}", status));
        }
        Ok(())
    }
}
