//! Error types for the discovery engine.

use std::net::SocketAddrV4;
use thiserror::Error;

/// Errors raised by the discovery engine.
///
/// Nothing here is fatal to the hosting process. Bind conflicts are retried,
/// other failures are logged and published as [`DiscoveryEvent::Error`].
///
/// [`DiscoveryEvent::Error`]: crate::discovery::DiscoveryEvent::Error
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Address {addr} already in use")]
    AddressInUse { addr: SocketAddrV4 },

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddrV4,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to announce to {target}: {source}")]
    Send {
        target: SocketAddrV4,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("Engine is closed")]
    Closed,

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl EngineError {
    /// True for conditions the engine recovers from on its own.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, EngineError::AddressInUse { .. } | EngineError::Send { .. })
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
