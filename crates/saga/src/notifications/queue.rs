use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::{Notification, NotificationDispatcher, NotificationSink};
use crate::error::{Result, SagaError};

/// Ids remembered for duplicate suppression.
const DEDUP_WINDOW: usize = 10_000;

#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    /// Delivery attempts per notification, including the first.
    pub max_attempts: u32,
    /// Wait before retry `n` is `retry_backoff * n`.
    pub retry_backoff: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff: Duration::from_millis(200),
        }
    }
}

struct Queued {
    notification: Notification,
    attempt: u32,
}

/// Dispatcher backed by an unbounded channel and one worker task.
///
/// Delivery is at-least-once: failures are re-enqueued until `max_attempts`.
/// A notification id that was already delivered is skipped.
#[derive(Clone)]
pub struct QueueDispatcher {
    tx: mpsc::UnboundedSender<Queued>,
}

/// Joins the worker once every dispatcher clone is dropped.
pub struct WorkerHandle {
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Waits for the worker to drain the queue and exit.
    pub async fn join(self) {
        if let Err(e) = self.join.await {
            tracing::error!(error = %e, "notification worker panicked");
        }
    }
}

impl QueueDispatcher {
    /// Starts the worker on the current runtime.
    pub fn spawn(sink: Arc<dyn NotificationSink>, config: QueueConfig) -> (Self, WorkerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let join = tokio::spawn(run_worker(rx, sink, config));
        (Self { tx }, WorkerHandle { join })
    }
}

impl NotificationDispatcher for QueueDispatcher {
    fn dispatch(&self, notification: Notification) -> Result<()> {
        self.tx
            .send(Queued {
                notification,
                attempt: 1,
            })
            .map_err(|_| SagaError::Dependency("notification queue is closed".to_string()))
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<Queued>,
    sink: Arc<dyn NotificationSink>,
    config: QueueConfig,
) {
    let mut retries: VecDeque<Queued> = VecDeque::new();
    let mut seen: HashSet<Uuid> = HashSet::new();
    let mut seen_order: VecDeque<Uuid> = VecDeque::new();

    loop {
        let item = match retries.pop_front() {
            Some(item) => {
                tokio::time::sleep(config.retry_backoff * (item.attempt - 1)).await;
                item
            }
            None => match rx.recv().await {
                Some(item) => item,
                None => break,
            },
        };

        let id = item.notification.id;
        if seen.contains(&id) {
            tracing::debug!(notification_id = %id, "duplicate notification skipped");
            continue;
        }

        match sink.deliver(&item.notification).await {
            Ok(()) => {
                metrics::counter!("notifications_dispatched_total").increment(1);
                seen.insert(id);
                seen_order.push_back(id);
                if seen_order.len() > DEDUP_WINDOW
                    && let Some(old) = seen_order.pop_front()
                {
                    seen.remove(&old);
                }
            }
            Err(e) if item.attempt < config.max_attempts => {
                tracing::warn!(
                    notification_id = %id,
                    attempt = item.attempt,
                    error = %e,
                    "notification delivery failed, retrying"
                );
                retries.push_back(Queued {
                    notification: item.notification,
                    attempt: item.attempt + 1,
                });
            }
            Err(e) => {
                metrics::counter!("notifications_failed_total").increment(1);
                tracing::error!(
                    notification_id = %id,
                    user_id = %item.notification.user_id,
                    event_type = %item.notification.event_type,
                    attempts = item.attempt,
                    error = %e,
                    "notification dropped after final attempt"
                );
            }
        }
    }

    tracing::debug!("notification worker stopped");
}
