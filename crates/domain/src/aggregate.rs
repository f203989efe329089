//! Core aggregate and domain event traits.

use common::AggregateId;
use event_store::Version;
use serde::{Serialize, de::DeserializeOwned};

/// Trait for domain events.
///
/// Domain events are immutable facts, named in past tense.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Returns the event type name stored alongside the payload.
    fn event_type(&self) -> &'static str;
}

/// Trait for aggregates in an event-sourced system.
///
/// Aggregates are rebuilt by replaying their events, decide on new events
/// from commands, and apply events to update their state.
pub trait Aggregate: Default + Send + Sync + Sized {
    /// The type of events this aggregate produces and consumes.
    type Event: DomainEvent;

    /// The type of errors this aggregate can produce.
    type Error: std::error::Error + Send + Sync;

    /// Returns the aggregate type name.
    fn aggregate_type() -> &'static str;

    /// Returns the aggregate's identifier, or None before its first event.
    fn id(&self) -> Option<AggregateId>;

    /// Returns the current version of the aggregate.
    fn version(&self) -> Version;

    /// Called by the command handler after loading events.
    fn set_version(&mut self, version: Version);

    /// Applies an event to the aggregate.
    ///
    /// Must be deterministic and infallible: events are facts that already happened.
    fn apply(&mut self, event: Self::Event);

    fn apply_events(&mut self, events: impl IntoIterator<Item = Self::Event>) {
        for event in events {
            self.apply(event);
        }
    }
}
