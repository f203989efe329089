use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::{AggregateId, EventStoreError, Result};

/// Metadata key under which the acting user is recorded.
pub const ACTOR_METADATA_KEY: &str = "actor_id";

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of an event within its aggregate stream.
///
/// A stream with no events is at [`Version::initial`] (0); the first event
/// is written at [`Version::first`] (1). Appends name the version they were
/// computed against, which is how concurrent status updates are serialized.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Version of a stream that has no events yet.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Version of the first event in a stream.
    pub fn first() -> Self {
        Self(1)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// A stored event: the serialized domain event plus stream coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: EventId,

    /// The type of the event (e.g. "OrderPlaced", "StatusChanged").
    pub event_type: String,

    pub aggregate_id: AggregateId,

    /// The type of aggregate (e.g. "Order").
    pub aggregate_type: String,

    /// The version of the aggregate after this event.
    pub version: Version,

    pub timestamp: DateTime<Utc>,

    pub payload: serde_json::Value,

    /// Free-form context such as the acting user.
    pub metadata: HashMap<String, serde_json::Value>,
}

impl EventEnvelope {
    pub fn builder() -> EventEnvelopeBuilder {
        EventEnvelopeBuilder::default()
    }

    /// Deserializes the payload into a domain event.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    /// Returns the acting user recorded in metadata, if any.
    pub fn actor_id(&self) -> Option<&str> {
        self.metadata
            .get(ACTOR_METADATA_KEY)
            .and_then(|value| value.as_str())
    }
}

/// Builder for [`EventEnvelope`].
#[derive(Debug, Default)]
pub struct EventEnvelopeBuilder {
    event_id: Option<EventId>,
    event_type: Option<String>,
    aggregate_id: Option<AggregateId>,
    aggregate_type: Option<String>,
    version: Option<Version>,
    timestamp: Option<DateTime<Utc>>,
    payload: Option<serde_json::Value>,
    metadata: HashMap<String, serde_json::Value>,
}

impl EventEnvelopeBuilder {
    /// Sets the event ID. If not set, a new ID will be generated.
    pub fn event_id(mut self, id: EventId) -> Self {
        self.event_id = Some(id);
        self
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn aggregate_id(mut self, id: AggregateId) -> Self {
        self.aggregate_id = Some(id);
        self
    }

    pub fn aggregate_type(mut self, aggregate_type: impl Into<String>) -> Self {
        self.aggregate_type = Some(aggregate_type.into());
        self
    }

    pub fn version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    /// Sets the timestamp. If not set, the current time will be used.
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Serializes `payload` into the envelope.
    pub fn payload<T: Serialize>(mut self, payload: &T) -> Result<Self> {
        self.payload = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    pub fn payload_raw(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Records the acting user under [`ACTOR_METADATA_KEY`].
    pub fn actor(self, actor_id: impl std::fmt::Display) -> Self {
        self.metadata(
            ACTOR_METADATA_KEY,
            serde_json::Value::String(actor_id.to_string()),
        )
    }

    /// Builds the envelope, failing if a required field was never set.
    pub fn build(self) -> Result<EventEnvelope> {
        Ok(EventEnvelope {
            event_id: self.event_id.unwrap_or_default(),
            event_type: self
                .event_type
                .ok_or(EventStoreError::IncompleteEnvelope("event_type"))?,
            aggregate_id: self
                .aggregate_id
                .ok_or(EventStoreError::IncompleteEnvelope("aggregate_id"))?,
            aggregate_type: self
                .aggregate_type
                .ok_or(EventStoreError::IncompleteEnvelope("aggregate_type"))?,
            version: self
                .version
                .ok_or(EventStoreError::IncompleteEnvelope("version"))?,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            payload: self
                .payload
                .ok_or(EventStoreError::IncompleteEnvelope("payload"))?,
            metadata: self.metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_initial_and_first() {
        assert_eq!(Version::initial().as_i64(), 0);
        assert_eq!(Version::first().as_i64(), 1);
        assert_eq!(Version::initial().next(), Version::first());
        assert!(Version::first() < Version::new(2));
    }

    #[test]
    fn builder_records_actor_and_payload() {
        let aggregate_id = AggregateId::new();
        let envelope = EventEnvelope::builder()
            .event_type("OrderPlaced")
            .aggregate_id(aggregate_id)
            .aggregate_type("Order")
            .version(Version::first())
            .payload_raw(serde_json::json!({"order_number": "ORD-1"}))
            .actor("user-1")
            .build()
            .unwrap();

        assert_eq!(envelope.aggregate_id, aggregate_id);
        assert_eq!(envelope.actor_id(), Some("user-1"));
        let payload: serde_json::Value = envelope.decode().unwrap();
        assert_eq!(payload["order_number"], "ORD-1");
    }

    #[test]
    fn builder_reports_missing_field() {
        let err = EventEnvelope::builder()
            .event_type("OrderPlaced")
            .aggregate_id(AggregateId::new())
            .aggregate_type("Order")
            .payload_raw(serde_json::json!({}))
            .build()
            .unwrap_err();

        assert!(matches!(err, EventStoreError::IncompleteEnvelope("version")));
    }
}
