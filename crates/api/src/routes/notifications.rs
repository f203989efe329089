//! Server-sent notification stream.

use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use saga::{ConnectionRegistry, SessionId};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::{Stream, StreamExt};

use crate::actor::CurrentActor;
use crate::state::AppState;

/// Removes the session from the registry when the response stream is dropped.
struct SessionGuard {
    registry: ConnectionRegistry,
    session_id: SessionId,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let registry = self.registry.clone();
        let session_id = self.session_id;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move { registry.disconnect(session_id).await });
        }
    }
}

/// GET /notifications/stream
pub async fn stream(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (session_id, rx) = state.registry.connect(actor.id).await;
    tracing::info!(%session_id, user_id = %actor.id, "notification stream opened");

    let guard = SessionGuard {
        registry: state.registry.clone(),
        session_id,
    };
    let events = UnboundedReceiverStream::new(rx).filter_map(move |notification| {
        let _session = &guard;
        match Event::default()
            .event(notification.event_type.as_str())
            .id(notification.id.to_string())
            .json_data(&notification)
        {
            Ok(event) => Some(Ok(event)),
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    notification_id = %notification.id,
                    "failed to encode notification"
                );
                None
            }
        }
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}
