use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// JSON object describing one announced service instance.
///
/// `name`, `host` and `port` are recognized; any other key is opaque
/// application metadata and travels on the wire verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceDescriptor(Map<String, Value>);

impl ServiceDescriptor {
    pub fn new() -> Self {
        ServiceDescriptor(Map::new())
    }

    /// Decode a JSON object. Anything else (invalid JSON, numbers, booleans,
    /// arrays, `null`) yields `None`.
    pub fn parse(text: &str) -> Option<Self> {
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Some(ServiceDescriptor(map)),
            _ => None,
        }
    }

    /// Decode a datagram payload. Non UTF-8 payloads are rejected.
    pub fn from_datagram(payload: &[u8]) -> Option<Self> {
        std::str::from_utf8(payload).ok().and_then(Self::parse)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        // A map of serde_json values always serializes.
        serde_json::to_vec(&self.0).unwrap_or_default()
    }

    pub fn name(&self) -> Option<&str> {
        self.0.get("name").and_then(Value::as_str)
    }

    pub fn host(&self) -> Option<&str> {
        self.0.get("host").and_then(Value::as_str)
    }

    pub fn port(&self) -> Option<u16> {
        self.0
            .get("port")
            .and_then(Value::as_u64)
            .and_then(|p| u16::try_from(p).ok())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn set_host(&mut self, host: impl Into<String>) {
        self.0.insert("host".to_string(), Value::String(host.into()));
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for ServiceDescriptor {
    fn from(map: Map<String, Value>) -> Self {
        ServiceDescriptor(map)
    }
}
