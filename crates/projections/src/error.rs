//! Projection error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("Event store error: {0}")]
    EventStore(#[from] event_store::EventStoreError),

    /// A stored payload did not match the event shape.
    #[error("Event deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ProjectionError>;
