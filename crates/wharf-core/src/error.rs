//! Core error types

use std::path::PathBuf;
use thiserror::Error;

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Errors from the manager's query surface
#[derive(Error, Debug)]
pub enum QueryError {
    /// Manager could not be reached
    #[error("Manager unreachable: {0}")]
    Unreachable(String),

    /// Manager answered with a non-success status
    #[error("Manager returned {status} for {path}")]
    Status { path: String, status: u16 },

    /// Response body did not match the expected record
    #[error("Malformed response for {path}: {message}")]
    Decode { path: String, message: String },
}

/// Errors raised by a directory server
#[derive(Error, Debug)]
pub enum DirectoryError {
    /// Could not bind the configured listen address
    #[error("Failed to bind {name} directory on {addr}: {source}")]
    Bind {
        name: &'static str,
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Server stopped after it was started
    #[error("{name} directory stopped: {message}")]
    Stopped { name: &'static str, message: String },
}
