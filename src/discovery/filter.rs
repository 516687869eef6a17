use super::descriptor::ServiceDescriptor;
use serde_json::{Map, Value};

/// Selects which announcements produce discovery events.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum MatchFilter {
    #[default]
    All,
    /// Every key must be present in the service with an equal value.
    Fields(Map<String, Value>),
}

impl MatchFilter {
    /// Filter on the service name only.
    pub fn name(name: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert("name".to_string(), Value::String(name.into()));
        MatchFilter::Fields(fields)
    }

    /// Normalize a textual filter: a JSON object decodes to a field filter,
    /// any other non-empty string is shorthand for `{"name": text}`.
    pub fn parse(text: &str) -> Self {
        if text.is_empty() {
            return MatchFilter::All;
        }
        match ServiceDescriptor::parse(text) {
            Some(descriptor) => MatchFilter::Fields(descriptor.into_map()),
            None => MatchFilter::name(text),
        }
    }

    pub fn matches(&self, service: &ServiceDescriptor) -> bool {
        match self {
            MatchFilter::All => true,
            MatchFilter::Fields(fields) => fields.iter().all(|(key, expected)| {
                service
                    .get(key)
                    .is_some_and(|actual| values_equal(expected, actual))
            }),
        }
    }
}

impl From<&str> for MatchFilter {
    fn from(text: &str) -> Self {
        MatchFilter::parse(text)
    }
}

impl From<String> for MatchFilter {
    fn from(text: String) -> Self {
        MatchFilter::parse(&text)
    }
}

impl From<Map<String, Value>> for MatchFilter {
    fn from(fields: Map<String, Value>) -> Self {
        MatchFilter::Fields(fields)
    }
}

impl From<ServiceDescriptor> for MatchFilter {
    fn from(partial: ServiceDescriptor) -> Self {
        MatchFilter::Fields(partial.into_map())
    }
}

impl<T: Into<MatchFilter>> From<Option<T>> for MatchFilter {
    fn from(filter: Option<T>) -> Self {
        filter.map(Into::into).unwrap_or_default()
    }
}

/// Strict deep equality, except that numbers compare by numeric value
/// so `4321` and `4321.0` are equal.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if x.is_f64() || y.is_f64() {
                x.as_f64() == y.as_f64()
            } else {
                x == y
            }
        }
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| values_equal(x, y)))
        }
        _ => a == b,
    }
}
