//! Append-only event log for order aggregates.
//!
//! Streams are keyed by aggregate id and versioned; appends carry an
//! expected version so that two writers racing on one order cannot both win.

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod store;

pub use common::AggregateId;
pub use error::{EventStoreError, Result};
pub use event::{EventEnvelope, EventEnvelopeBuilder, EventId, Version};
pub use memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use store::{AppendOptions, EventStore, EventStoreExt, EventStream};
