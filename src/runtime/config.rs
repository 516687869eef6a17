use crate::error::ConfigError;
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::Path;
use std::time::Duration;

/// Discovery Engine Configuration
/// All timing values are in milliseconds unless otherwise specified
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct EngineConfig {
    /// Local bind port and destination port for announcements (default: 12345)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Local bind address; `None` lets the OS choose (binds 0.0.0.0)
    #[serde(default)]
    pub address: Option<Ipv4Addr>,
    /// Period between announce attempts (ms, default: 1000)
    #[serde(default = "default_announce_interval", alias = "announceInterval")]
    pub announce_interval_ms: u64,
    /// Delay before retrying a bind that hit an address-in-use conflict (ms, default: 999)
    #[serde(default = "default_retry_interval", alias = "retryInterval")]
    pub retry_interval_ms: u64,
    /// Enables diagnostic logging
    #[serde(default)]
    pub debug: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            port: default_port(),
            address: None,
            announce_interval_ms: default_announce_interval(),
            retry_interval_ms: default_retry_interval(),
            debug: false,
        }
    }
}

fn default_port() -> u16 { 12345 }
fn default_announce_interval() -> u64 { 1000 }
fn default_retry_interval() -> u64 { 999 }

impl EngineConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let config: EngineConfig = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.announce_interval_ms == 0 {
            return Err(ConfigError::Invalid("announce_interval_ms must be non-zero".into()));
        }
        if self.retry_interval_ms == 0 {
            return Err(ConfigError::Invalid("retry_interval_ms must be non-zero".into()));
        }
        Ok(())
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_address(mut self, address: Ipv4Addr) -> Self {
        self.address = Some(address);
        self
    }

    pub fn with_announce_interval(mut self, interval: Duration) -> Self {
        self.announce_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn announce_interval(&self) -> Duration {
        Duration::from_millis(self.announce_interval_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    /// Address the listening socket binds to.
    pub fn bind_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.address.unwrap_or(Ipv4Addr::UNSPECIFIED), self.port)
    }
}
