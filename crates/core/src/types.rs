use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single observed user action, as delivered by the event-tracking pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserEvent {
    #[serde(alias = "userId")]
    pub user_id: String,
    #[serde(alias = "eventType")]
    pub event_type: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Producer-assigned identity, only consulted when de-duplication is on.
    #[serde(default, alias = "eventId", skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, serde_json::Value>,
}

impl UserEvent {
    pub fn new(user_id: impl Into<String>, event_type: impl Into<String>, timestamp: i64) -> Self {
        Self {
            user_id: user_id.into(),
            event_type: event_type.into(),
            timestamp,
            event_id: None,
            properties: HashMap::new(),
        }
    }

    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn property(&self, key: &str) -> Option<&serde_json::Value> {
        self.properties.get(key)
    }

    pub fn occurred_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp)
    }
}

/// Inclusive `[start, end]` window in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeframe {
    pub start: i64,
    pub end: i64,
}

impl Timeframe {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn from_datetimes(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: start.timestamp_millis(),
            end: end.timestamp_millis(),
        }
    }

    /// The window ending at `now` and reaching back `length`.
    pub fn trailing(length: Duration, now: DateTime<Utc>) -> Self {
        Self::from_datetimes(now - length, now)
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }
}
