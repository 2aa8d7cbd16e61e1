//! Common error types shared across the directord crates.

use std::fmt;

/// A specialized Result type for directord operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for directord operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Netlink error: {0}")]
    Netlink(String),

    #[error("IPVS error: {0}")]
    Ipvs(String),

    #[error("Reconcile error: {0}")]
    Reconcile(String),

    #[error("Health error: {0}")]
    Health(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown error: {0}")]
    Other(String),
}

impl Error {
    /// Create a new netlink error.
    pub fn netlink(msg: impl fmt::Display) -> Self {
        Error::Netlink(msg.to_string())
    }

    /// Create a new IPVS error.
    pub fn ipvs(msg: impl fmt::Display) -> Self {
        Error::Ipvs(msg.to_string())
    }

    /// Create a new reconcile error.
    pub fn reconcile(msg: impl fmt::Display) -> Self {
        Error::Reconcile(msg.to_string())
    }

    /// Create a new health error.
    pub fn health(msg: impl fmt::Display) -> Self {
        Error::Health(msg.to_string())
    }

    /// Create a new configuration error.
    pub fn config(msg: impl fmt::Display) -> Self {
        Error::Config(msg.to_string())
    }

    /// Create a new other error.
    pub fn other(msg: impl fmt::Display) -> Self {
        Error::Other(msg.to_string())
    }
}
