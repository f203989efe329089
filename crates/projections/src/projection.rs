//! Projection trait and position tracking.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_store::EventEnvelope;

use crate::Result;

/// How far into the global event log a projection has read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectionPosition {
    /// Number of events from the global log the projection has seen,
    /// including events it chose to ignore.
    pub events_seen: u64,
    /// Timestamp of the last event seen.
    pub last_event_at: Option<DateTime<Utc>>,
}

impl ProjectionPosition {
    pub fn zero() -> Self {
        Self::default()
    }

    /// Returns the position after `event`.
    pub fn advance(&self, event: &EventEnvelope) -> Self {
        Self {
            events_seen: self.events_seen + 1,
            last_event_at: Some(event.timestamp),
        }
    }
}

impl std::fmt::Display for ProjectionPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "position({})", self.events_seen)
    }
}

/// Folds events from the global log into a read model.
///
/// `handle` is called for every event in log order; projections skip the
/// aggregate types they do not care about but must still advance.
#[async_trait]
pub trait Projection: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, event: &EventEnvelope) -> Result<()>;

    async fn position(&self) -> ProjectionPosition;

    /// Clears the read model and rewinds to the start of the log.
    async fn reset(&self) -> Result<()>;
}
