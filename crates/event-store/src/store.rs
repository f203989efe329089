use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_core::Stream;

use crate::{AggregateId, EventEnvelope, EventStoreError, Result, Version};

/// Options for appending events to the store.
#[derive(Debug, Clone, Default)]
pub struct AppendOptions {
    /// Version the caller read before deciding on these events.
    /// `None` skips the check.
    pub expected_version: Option<Version>,
}

impl AppendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect_version(version: Version) -> Self {
        Self {
            expected_version: Some(version),
        }
    }

    /// Expects the stream not to exist yet.
    pub fn expect_new() -> Self {
        Self::expect_version(Version::initial())
    }
}

/// A stream of events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<EventEnvelope>> + Send>>;

/// Append-only, versioned event log.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends a batch of events for one aggregate atomically.
    ///
    /// Fails with `ConcurrencyConflict` if `options.expected_version` does not
    /// match the stream's current version. Returns the new version.
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version>;

    /// Retrieves all events for an aggregate in version order.
    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>>;

    /// Lists the ids of every aggregate of the given type, oldest first.
    async fn aggregate_ids(&self, aggregate_type: &str) -> Result<Vec<AggregateId>>;

    /// Streams all events in insertion order.
    async fn stream_all_events(&self) -> Result<EventStream>;

    /// Gets the current version of an aggregate, or `None` if it has no events.
    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>>;
}

#[async_trait]
impl<T: EventStore + ?Sized> EventStore for Arc<T> {
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        (**self).append(events, options).await
    }

    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>> {
        (**self).get_events_for_aggregate(aggregate_id).await
    }

    async fn aggregate_ids(&self, aggregate_type: &str) -> Result<Vec<AggregateId>> {
        (**self).aggregate_ids(aggregate_type).await
    }

    async fn stream_all_events(&self) -> Result<EventStream> {
        (**self).stream_all_events().await
    }

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        (**self).get_aggregate_version(aggregate_id).await
    }
}

/// Convenience methods available on every event store.
#[async_trait]
pub trait EventStoreExt: EventStore {
    async fn append_event(&self, event: EventEnvelope, options: AppendOptions) -> Result<Version> {
        self.append(vec![event], options).await
    }

    async fn aggregate_exists(&self, aggregate_id: AggregateId) -> Result<bool> {
        Ok(self.get_aggregate_version(aggregate_id).await?.is_some())
    }
}

impl<T: EventStore + ?Sized> EventStoreExt for T {}

/// Checks that a batch targets one aggregate with consecutive versions.
pub fn validate_events_for_append(events: &[EventEnvelope]) -> Result<()> {
    let Some(first) = events.first() else {
        return Err(EventStoreError::InvalidAppend(
            "cannot append an empty batch".to_string(),
        ));
    };

    let mut expected_version = first.version;
    for event in events.iter().skip(1) {
        if event.aggregate_id != first.aggregate_id || event.aggregate_type != first.aggregate_type
        {
            return Err(EventStoreError::InvalidAppend(
                "all events in a batch must belong to one aggregate".to_string(),
            ));
        }
        expected_version = expected_version.next();
        if event.version != expected_version {
            return Err(EventStoreError::InvalidAppend(format!(
                "versions must be consecutive: expected {}, got {}",
                expected_version, event.version
            )));
        }
    }

    Ok(())
}
