//! Event model received from the message broker.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// A domain event consumed from the broker.
///
/// Immutable once received. `event_id` is the idempotency key; `context_key`
/// groups events into one rolling window and defaults to `event_type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub event_type: String,
    #[serde(default)]
    pub context_key: String,
    #[serde(default = "Utc::now", deserialize_with = "flexible_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Event {
    pub fn new(event_id: impl Into<String>, event_type: impl Into<String>) -> Self {
        let event_type = event_type.into();
        Self {
            event_id: event_id.into(),
            context_key: event_type.clone(),
            event_type,
            timestamp: Utc::now(),
            data: Map::new(),
        }
    }

    pub fn with_context_key(mut self, context_key: impl Into<String>) -> Self {
        self.context_key = context_key.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }

    /// Apply wire defaults: an empty `context_key` falls back to the event type.
    pub fn normalized(mut self) -> Self {
        if self.context_key.is_empty() {
            self.context_key = self.event_type.clone();
        }
        self
    }

    /// Convert to the format stored in the context window.
    pub fn to_context_entry(&self) -> ContextEntry {
        ContextEntry {
            event_id: self.event_id.clone(),
            event_type: self.event_type.clone(),
            timestamp: self.timestamp,
            data: self.data.clone(),
        }
    }

    /// Rebuild an event from a context window entry.
    pub fn from_context_entry(entry: ContextEntry, context_key: &str) -> Self {
        Self {
            event_id: entry.event_id,
            event_type: entry.event_type,
            context_key: context_key.to_string(),
            timestamp: entry.timestamp,
            data: entry.data,
        }
    }
}

/// One entry of a rolling context window, stored time-ordered per context key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextEntry {
    pub event_id: String,
    pub event_type: String,
    #[serde(deserialize_with = "flexible_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: Map<String, Value>,
}

/// Accept RFC 3339, naive ISO-8601 (assumed UTC) or epoch seconds.
///
/// Producers supply timestamps in whichever of these shapes their stack
/// emits; stored entries always round-trip through RFC 3339.
fn flexible_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    parse_timestamp(&value).ok_or_else(|| serde::de::Error::custom("unrecognized timestamp"))
}

/// Parse a JSON timestamp value: number = epoch seconds, string = ISO-8601
/// (UTC assumed when the offset is missing).
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let secs = n.as_f64()?;
            let nanos = ((secs - secs.trunc()) * 1e9) as u32;
            DateTime::from_timestamp(secs.trunc() as i64, nanos)
        }
        Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        }
        Value::Null => Some(Utc::now()),
        _ => None,
    }
}
