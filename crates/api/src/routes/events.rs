//! Domain events consumed from the order and delivery services.
//!
//! Each event is turned into a user notification through the fixed title and
//! body table, then handed to the dispatcher.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use common::{OrderId, UserId};
use saga::{Notification, NotificationType};
use serde::Deserialize;

use crate::actor::CurrentActor;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DomainEvent<P> {
    pub event: NotificationType,
    pub payload: P,
}

#[derive(Debug, Deserialize)]
pub struct OrderPayload {
    pub order_id: OrderId,
}

#[derive(Debug, Deserialize)]
pub struct DeliveryPayload {
    pub customer_id: UserId,
    #[serde(default)]
    pub delivery_id: Option<String>,
}

/// POST /events/order
#[tracing::instrument(skip(state, payload))]
pub async fn order(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    payload: Result<Json<DomainEvent<OrderPayload>>, JsonRejection>,
) -> Result<(StatusCode, Json<Notification>), ApiError> {
    let Json(event) = payload?;
    let notification = state
        .coordinator
        .publish_order_event(&actor, event.payload.order_id, event.event)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(notification)))
}

/// POST /events/delivery
#[tracing::instrument(skip(state, payload))]
pub async fn delivery(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    payload: Result<Json<DomainEvent<DeliveryPayload>>, JsonRejection>,
) -> Result<(StatusCode, Json<Notification>), ApiError> {
    let Json(event) = payload?;
    let notification = state
        .coordinator
        .publish_delivery_event(
            &actor,
            event.payload.customer_id,
            event.event,
            event.payload.delivery_id,
        )
        .await?;
    Ok((StatusCode::ACCEPTED, Json(notification)))
}
