//! Fire-and-forget user notifications.
//!
//! The coordinator hands a [`Notification`] to a [`NotificationDispatcher`]
//! and moves on; delivery happens on a background worker that pushes to a
//! [`NotificationSink`].

mod queue;
mod registry;
mod templates;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::UserId;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::Result;

pub use queue::{QueueConfig, QueueDispatcher, WorkerHandle};
pub use registry::{ConnectionRegistry, RegistrySink, SessionId};
pub use templates::NotificationType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Delivery is idempotent on this id.
    pub id: Uuid,
    pub user_id: UserId,
    pub event_type: NotificationType,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        user_id: UserId,
        event_type: NotificationType,
        title: impl Into<String>,
        body: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            event_type,
            title: title.into(),
            body: body.into(),
            data,
            created_at: Utc::now(),
        }
    }
}

/// Accepts notifications without waiting for delivery.
pub trait NotificationDispatcher: Send + Sync {
    /// Queues `notification`. Errors mean it was not queued at all.
    fn dispatch(&self, notification: Notification) -> Result<()>;
}

/// Where the worker delivers notifications.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<()>;
}

/// Sink that keeps what it receives, optionally failing the first attempts.
#[derive(Clone, Default)]
pub struct RecordingSink {
    inner: Arc<Mutex<RecordingState>>,
}

#[derive(Default)]
struct RecordingState {
    delivered: Vec<Notification>,
    failures_left: u32,
    attempts: u32,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` deliveries fail.
    pub async fn fail_next(&self, count: u32) {
        self.inner.lock().await.failures_left = count;
    }

    pub async fn delivered(&self) -> Vec<Notification> {
        self.inner.lock().await.delivered.clone()
    }

    pub async fn attempts(&self) -> u32 {
        self.inner.lock().await.attempts
    }

    /// Polls until at least `count` notifications arrived or two seconds passed.
    pub async fn wait_for(&self, count: usize) -> Vec<Notification> {
        for _ in 0..200 {
            let delivered = self.delivered().await;
            if delivered.len() >= count {
                return delivered;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        self.delivered().await
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn deliver(&self, notification: &Notification) -> Result<()> {
        let mut state = self.inner.lock().await;
        state.attempts += 1;
        if state.failures_left > 0 {
            state.failures_left -= 1;
            return Err(crate::SagaError::Dependency("sink unavailable".to_string()));
        }
        state.delivered.push(notification.clone());
        Ok(())
    }
}
