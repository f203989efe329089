//! Feeds events from the store to registered projections.

use event_store::{EventEnvelope, EventStore};
use futures_util::StreamExt;
use tokio::sync::Mutex;

use crate::Result;
use crate::projection::Projection;

/// Delivers events from an event store to projections.
///
/// Catch-up runs are serialized so two readers asking for fresh data at the
/// same time cannot deliver one event twice.
pub struct ProjectionProcessor<S: EventStore> {
    store: S,
    projections: Vec<Box<dyn Projection>>,
    catch_up: Mutex<()>,
}

impl<S: EventStore> ProjectionProcessor<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            projections: Vec::new(),
            catch_up: Mutex::new(()),
        }
    }

    pub fn register(&mut self, projection: Box<dyn Projection>) {
        self.projections.push(projection);
    }

    pub fn projection_count(&self) -> usize {
        self.projections.len()
    }

    /// Streams the global log and hands each projection the events past its
    /// position. Returns the number of events delivered.
    #[tracing::instrument(skip(self))]
    pub async fn run_catch_up(&self) -> Result<u64> {
        let _guard = self.catch_up.lock().await;
        let mut stream = self.store.stream_all_events().await?;
        let mut index: u64 = 0;
        let mut delivered: u64 = 0;

        while let Some(result) = stream.next().await {
            let event = result?;
            index += 1;

            for projection in &self.projections {
                if projection.position().await.events_seen < index {
                    projection.handle(&event).await?;
                    delivered += 1;
                }
            }
        }

        if delivered > 0 {
            metrics::counter!("projection_events_processed_total").increment(delivered);
            tracing::debug!(events = index, delivered, "projection catch-up complete");
        }
        Ok(delivered)
    }

    /// Delivers one event to every projection.
    #[tracing::instrument(skip(self, event), fields(event_type = %event.event_type))]
    pub async fn process_event(&self, event: &EventEnvelope) -> Result<()> {
        for projection in &self.projections {
            projection.handle(event).await?;
        }
        Ok(())
    }

    /// Resets every projection and replays the whole log.
    #[tracing::instrument(skip(self))]
    pub async fn rebuild_all(&self) -> Result<u64> {
        for projection in &self.projections {
            tracing::info!(projection = projection.name(), "resetting projection");
            projection.reset().await?;
        }
        self.run_catch_up().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::ProjectionPosition;
    use async_trait::async_trait;
    use common::AggregateId;
    use event_store::{AppendOptions, InMemoryEventStore, Version};
    use std::sync::Arc;
    use tokio::sync::RwLock;

    #[derive(Clone, Default)]
    struct CountingProjection {
        count: Arc<RwLock<u64>>,
        position: Arc<RwLock<ProjectionPosition>>,
    }

    #[async_trait]
    impl Projection for CountingProjection {
        fn name(&self) -> &'static str {
            "CountingProjection"
        }

        async fn handle(&self, event: &EventEnvelope) -> Result<()> {
            *self.count.write().await += 1;
            let mut pos = self.position.write().await;
            *pos = pos.advance(event);
            Ok(())
        }

        async fn position(&self) -> ProjectionPosition {
            *self.position.read().await
        }

        async fn reset(&self) -> Result<()> {
            *self.count.write().await = 0;
            *self.position.write().await = ProjectionPosition::zero();
            Ok(())
        }
    }

    async fn store_with_events(n: i64) -> InMemoryEventStore {
        let store = InMemoryEventStore::new();
        let order_id = AggregateId::new();
        let events = (1..=n)
            .map(|v| {
                EventEnvelope::builder()
                    .aggregate_id(order_id)
                    .aggregate_type("Order")
                    .event_type("StatusChanged")
                    .version(Version::new(v))
                    .payload_raw(serde_json::json!({}))
                    .build()
                    .unwrap()
            })
            .collect();
        store.append(events, AppendOptions::expect_new()).await.unwrap();
        store
    }

    #[tokio::test]
    async fn catch_up_delivers_each_event_once() {
        let projection = CountingProjection::default();
        let mut processor = ProjectionProcessor::new(store_with_events(3).await);
        processor.register(Box::new(projection.clone()));

        assert_eq!(processor.run_catch_up().await.unwrap(), 3);
        assert_eq!(processor.run_catch_up().await.unwrap(), 0);
        assert_eq!(*projection.count.read().await, 3);
    }

    #[tokio::test]
    async fn concurrent_catch_ups_do_not_double_deliver() {
        let projection = CountingProjection::default();
        let mut processor = ProjectionProcessor::new(store_with_events(5).await);
        processor.register(Box::new(projection.clone()));
        let processor = Arc::new(processor);

        let a = tokio::spawn({
            let processor = Arc::clone(&processor);
            async move { processor.run_catch_up().await.unwrap() }
        });
        let b = tokio::spawn({
            let processor = Arc::clone(&processor);
            async move { processor.run_catch_up().await.unwrap() }
        });

        assert_eq!(a.await.unwrap() + b.await.unwrap(), 5);
        assert_eq!(*projection.count.read().await, 5);
    }

    #[tokio::test]
    async fn rebuild_replays_from_scratch() {
        let projection = CountingProjection::default();
        let mut processor = ProjectionProcessor::new(store_with_events(2).await);
        processor.register(Box::new(projection.clone()));
        assert_eq!(processor.projection_count(), 1);

        processor.run_catch_up().await.unwrap();
        assert_eq!(processor.rebuild_all().await.unwrap(), 2);
        assert_eq!(*projection.count.read().await, 2);
        assert_eq!(projection.position.read().await.events_seen, 2);
    }
}
