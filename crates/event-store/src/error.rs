use thiserror::Error;

use crate::{AggregateId, Version};

/// Errors that can occur when interacting with the event store.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// The stream moved on since it was read; the append was rejected.
    #[error(
        "Concurrency conflict for aggregate {aggregate_id}: \
         expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        aggregate_id: AggregateId,
        expected: Version,
        actual: Version,
    },

    /// The batch handed to `append` is malformed.
    #[error("Invalid append: {0}")]
    InvalidAppend(String),

    /// An envelope was built without one of its required fields.
    #[error("Event envelope is missing required field `{0}`")]
    IncompleteEnvelope(&'static str),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EventStoreError {
    /// Returns true if retrying after a reload may succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, EventStoreError::ConcurrencyConflict { .. })
    }
}

/// Result type for event store operations.
pub type Result<T> = std::result::Result<T, EventStoreError>;
