use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::UserId;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use super::{Notification, NotificationSink};
use crate::error::Result;

pub type SessionId = Uuid;

struct Session {
    user_id: UserId,
    tx: mpsc::UnboundedSender<Notification>,
}

/// Live in-app sessions, keyed by session id.
///
/// One registry exists per process. Closing it drops every sender, which ends
/// the streams held by connected clients.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    sessions: Arc<RwLock<HashMap<SessionId, Session>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn connect(
        &self,
        user_id: UserId,
    ) -> (SessionId, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session_id = Uuid::new_v4();
        self.sessions
            .write()
            .await
            .insert(session_id, Session { user_id, tx });
        tracing::debug!(%session_id, %user_id, "session connected");
        (session_id, rx)
    }

    pub async fn disconnect(&self, session_id: SessionId) {
        if self.sessions.write().await.remove(&session_id).is_some() {
            tracing::debug!(%session_id, "session disconnected");
        }
    }

    /// Pushes to every session of `user_id`. Returns how many received it.
    pub async fn send_to_user(&self, user_id: UserId, notification: &Notification) -> usize {
        self.send_where(notification, |session| session.user_id == user_id)
            .await
    }

    /// Pushes to every session, or only to `user_ids` when given.
    pub async fn broadcast(
        &self,
        notification: &Notification,
        user_ids: Option<&[UserId]>,
    ) -> usize {
        self.send_where(notification, |session| {
            user_ids.is_none_or(|ids| ids.contains(&session.user_id))
        })
        .await
    }

    async fn send_where(
        &self,
        notification: &Notification,
        filter: impl Fn(&Session) -> bool,
    ) -> usize {
        let mut sessions = self.sessions.write().await;
        let mut sent = 0;
        sessions.retain(|_, session| {
            if !filter(session) {
                return true;
            }
            match session.tx.send(notification.clone()) {
                Ok(()) => {
                    sent += 1;
                    true
                }
                Err(_) => false,
            }
        });
        sent
    }

    pub async fn connection_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn close_all(&self) {
        let mut sessions = self.sessions.write().await;
        let count = sessions.len();
        sessions.clear();
        tracing::info!(sessions = count, "connection registry closed");
    }
}

/// Default sink: pushes to connected sessions and logs the delivery.
#[derive(Clone)]
pub struct RegistrySink {
    registry: ConnectionRegistry,
}

impl RegistrySink {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl NotificationSink for RegistrySink {
    async fn deliver(&self, notification: &Notification) -> Result<()> {
        let sessions = self
            .registry
            .send_to_user(notification.user_id, notification)
            .await;
        tracing::info!(
            notification_id = %notification.id,
            user_id = %notification.user_id,
            event_type = %notification.event_type,
            sessions,
            "notification delivered"
        );
        Ok(())
    }
}
