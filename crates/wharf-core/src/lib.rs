//! wharf-core: Core abstractions and configuration for the wharf agent
//!
//! Shared types for the directory synchronization pipeline, the traits
//! that describe the agent's external collaborators (manager query
//! surface, directory servers, record derivation), and configuration.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use error::{ConfigError, DirectoryError, QueryError};
pub use types::{
    CombinedDirectoryEvent, DnsRecord, ManagerAddr, ProxyRecord, TaskEvent, TaskEventKind,
};
