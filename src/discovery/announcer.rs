use super::descriptor::ServiceDescriptor;
use crate::error::{EngineError, Result};
use serde_json::{Map, Value};
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

/// Describes a service to announce.
///
/// `host` is normally left unset; each announce tick fills it in with the
/// address of the first usable local interface.
#[derive(Debug, Clone)]
pub struct Announcement {
    base: ServiceDescriptor,
    name: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    metadata: Option<Map<String, Value>>,
    metadata_json: Option<String>,
    repeat: u32,
}

impl Announcement {
    pub fn new(name: impl Into<String>) -> Self {
        Announcement {
            base: ServiceDescriptor::new(),
            name: Some(name.into()),
            host: None,
            port: None,
            metadata: None,
            metadata_json: None,
            repeat: 0,
        }
    }

    /// Announce a complete descriptor as is.
    pub fn from_descriptor(descriptor: ServiceDescriptor) -> Self {
        Announcement {
            base: descriptor,
            name: None,
            host: None,
            port: None,
            metadata: None,
            metadata_json: None,
            repeat: 0,
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Extra keys sent alongside name, host and port.
    pub fn metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self.metadata_json = None;
        self
    }

    /// Extra keys as a JSON object string. Decoded when broadcasting starts.
    pub fn metadata_json(mut self, json: impl Into<String>) -> Self {
        self.metadata_json = Some(json.into());
        self.metadata = None;
        self
    }

    /// Stop after `count` successful sends. Zero (the default) announces until closed.
    pub fn repeat(mut self, count: u32) -> Self {
        self.repeat = count;
        self
    }

    pub fn repeat_count(&self) -> u32 {
        self.repeat
    }

    /// Assemble the descriptor. Metadata goes in first so that name, host
    /// and port take precedence over same-named metadata keys.
    pub fn build(&self) -> Result<ServiceDescriptor> {
        let mut descriptor = self.base.clone();

        let metadata = match &self.metadata_json {
            Some(json) => Some(
                ServiceDescriptor::parse(json)
                    .ok_or_else(|| EngineError::InvalidMetadata(format!("not a JSON object: {}", json)))?
                    .into_map(),
            ),
            None => self.metadata.clone(),
        };
        for (key, value) in metadata.into_iter().flatten() {
            descriptor.insert(key, value);
        }

        if let Some(port) = self.port {
            descriptor.insert("port", port);
        }
        if let Some(host) = &self.host {
            descriptor.set_host(host.clone());
        }
        if let Some(name) = &self.name {
            descriptor.insert("name", name.clone());
        }
        Ok(descriptor)
    }
}

/// Handle for one running announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AnnouncementId(pub(crate) u64);

/// Timer and send bookkeeping for one running announcement.
#[derive(Debug)]
pub(crate) struct ActiveAnnouncement {
    pub id: AnnouncementId,
    pub descriptor: ServiceDescriptor,
    pub payload: Vec<u8>,
    pub repeat: u32,
    pub sent: u32,
    pub next_tick: Instant,
}

impl ActiveAnnouncement {
    pub fn new(id: AnnouncementId, descriptor: ServiceDescriptor, repeat: u32, first_tick: Instant) -> Self {
        let payload = descriptor.to_bytes();
        ActiveAnnouncement {
            id,
            descriptor,
            payload,
            repeat,
            sent: 0,
            next_tick: first_tick,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next_tick
    }

    pub fn schedule_next(&mut self, now: Instant, interval: Duration) {
        self.next_tick = now + interval;
    }

    /// Point `host` at `ip`. Returns true if it changed, re-encoding the payload.
    pub fn refresh_host(&mut self, ip: Ipv4Addr) -> bool {
        let host = ip.to_string();
        if self.descriptor.host() == Some(host.as_str()) {
            return false;
        }
        self.descriptor.set_host(host);
        self.payload = self.descriptor.to_bytes();
        true
    }

    /// Count a successful send. Returns true once the repeat budget is spent.
    pub fn record_send(&mut self) -> bool {
        self.sent = self.sent.saturating_add(1);
        self.repeat != 0 && self.sent >= self.repeat
    }
}
