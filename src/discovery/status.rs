use serde::{Deserialize, Serialize};
use std::fmt;

/// Connectivity of the announcing side of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectivityStatus {
    Initializing,
    NotConnected,
    Broadcasting,
}

impl fmt::Display for ConnectivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectivityStatus::Initializing => "INITIALIZING",
            ConnectivityStatus::NotConnected => "NOT_CONNECTED",
            ConnectivityStatus::Broadcasting => "BROADCASTING",
        };
        f.write_str(s)
    }
}

/// Holds the current status. Starts at `Initializing` and never returns to it.
#[derive(Debug)]
pub struct StatusTracker {
    current: ConnectivityStatus,
}

impl StatusTracker {
    pub fn new() -> Self {
        StatusTracker {
            current: ConnectivityStatus::Initializing,
        }
    }

    pub fn current(&self) -> ConnectivityStatus {
        self.current
    }

    /// Returns the new status when it differs from the current one.
    pub fn transition(&mut self, next: ConnectivityStatus) -> Option<ConnectivityStatus> {
        if next == ConnectivityStatus::Initializing || next == self.current {
            return None;
        }
        self.current = next;
        Some(next)
    }
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new()
    }
}
