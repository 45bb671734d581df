//! wharf-agent: Node agent for a wharf cluster
//!
//! The agent finds a live manager, joins it over a multiplexed tunnel, and
//! keeps the host's name-resolution and reverse-proxy directories in line
//! with the scheduler's view of the cluster. Through the same tunnel the
//! manager reaches the agent's local API and, via a raw passthrough, the
//! host's container engine.

pub mod api;
pub mod directory;
pub mod http;
pub mod locator;
pub mod supervisor;
pub mod sync;
pub mod tunnel;

pub use supervisor::{AgentError, AgentSupervisor, Phase};
