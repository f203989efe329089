use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    AggregateId, EventEnvelope, EventStoreError, Result, Version,
    store::{AppendOptions, EventStore, EventStream, validate_events_for_append},
};

/// In-memory event store used by tests and by the server when no database
/// is configured.
///
/// The version check and the insert happen under one write lock, which gives
/// the same all-or-nothing behavior as the Postgres transaction.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    events: Arc<RwLock<Vec<EventEnvelope>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.events.read().await.len()
    }
}

fn current_version(events: &[EventEnvelope], aggregate_id: AggregateId) -> Version {
    events
        .iter()
        .filter(|e| e.aggregate_id == aggregate_id)
        .map(|e| e.version)
        .max()
        .unwrap_or_else(Version::initial)
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        validate_events_for_append(&events)?;

        let aggregate_id = events[0].aggregate_id;
        let first_new_version = events[0].version;

        let mut store = self.events.write().await;
        let current = current_version(&store, aggregate_id);

        if let Some(expected) = options.expected_version
            && current != expected
        {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual: current,
            });
        }

        // Mirrors the (aggregate_id, version) unique constraint.
        if first_new_version <= current {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected: options.expected_version.unwrap_or(current),
                actual: current,
            });
        }

        let last_version = events
            .last()
            .map(|e| e.version)
            .unwrap_or(first_new_version);
        store.extend(events);
        metrics::counter!("event_store_appends_total").increment(1);

        Ok(last_version)
    }

    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>> {
        let store = self.events.read().await;
        let mut events: Vec<_> = store
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.version);
        Ok(events)
    }

    async fn aggregate_ids(&self, aggregate_type: &str) -> Result<Vec<AggregateId>> {
        let store = self.events.read().await;
        let ids = store
            .iter()
            .filter(|e| e.aggregate_type == aggregate_type && e.version == Version::first())
            .map(|e| e.aggregate_id)
            .collect();
        Ok(ids)
    }

    async fn stream_all_events(&self) -> Result<EventStream> {
        use futures_util::stream;

        // Insertion order is already global order.
        let events = self.events.read().await.clone();
        Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
    }

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        let store = self.events.read().await;
        let version = store
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .map(|e| e.version)
            .max();
        Ok(version)
    }
}
