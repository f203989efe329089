//! Order endpoints.

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use common::{Money, OrderId, PaymentId, PaymentMethod, PaymentStatus, UserId};
use domain::{
    Address, CompensationState, FulfillmentStatus, Order, OrderItem, OrderNumber, OrderStatus,
    StatusHistoryEntry, StatusTimestamps,
};
use projections::OrderSummary;
use saga::{CreateOrder, OrderReceipt};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::actor::CurrentActor;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub status: Option<OrderStatus>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Full order as returned by `GET /orders/{id}`.
#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub id: OrderId,
    pub order_number: OrderNumber,
    pub customer_id: UserId,
    pub retailer_id: UserId,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    pub payment_id: Option<PaymentId>,
    pub fulfillment_status: FulfillmentStatus,
    pub items: Vec<OrderItem>,
    pub subtotal: Money,
    pub tax_amount: Money,
    pub shipping_amount: Money,
    pub total_amount: Money,
    pub shipping_address: Option<Address>,
    pub billing_address: Option<Address>,
    pub customer_notes: Option<String>,
    pub cancellation_reason: Option<String>,
    pub compensation: CompensationState,
    pub status_history: Vec<StatusHistoryEntry>,
    /// `created_at`, `confirmed_at`, `shipped_at`, `delivered_at`,
    /// `cancelled_at` and `updated_at`.
    #[serde(flatten)]
    pub timestamps: StatusTimestamps,
}

impl OrderResponse {
    fn new(id: OrderId, order: &Order) -> Self {
        let totals = order.totals();
        Self {
            id,
            order_number: order.order_number().clone(),
            customer_id: order.customer_id(),
            retailer_id: order.retailer_id(),
            status: order.status(),
            payment_status: order.payment_status(),
            payment_method: order.payment_method(),
            payment_id: order.payment_id(),
            fulfillment_status: order.fulfillment_status(),
            items: order.items().to_vec(),
            subtotal: totals.subtotal,
            tax_amount: totals.tax_amount,
            shipping_amount: totals.shipping_amount,
            total_amount: totals.total_amount,
            shipping_address: order.shipping_address().cloned(),
            billing_address: order.billing_address().cloned(),
            customer_notes: order.customer_notes().map(str::to_string),
            cancellation_reason: order.cancellation_reason().map(str::to_string),
            compensation: order.compensation(),
            status_history: order.history().to_vec(),
            timestamps: *order.timestamps(),
        }
    }
}

/// POST /orders
#[tracing::instrument(skip(state, payload))]
pub async fn create(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    payload: Result<Json<CreateOrder>, JsonRejection>,
) -> Result<(StatusCode, Json<OrderReceipt>), ApiError> {
    let Json(request) = payload?;
    let receipt = state.coordinator.create_order(&actor, request).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// GET /orders?status=&limit=&offset=
pub async fn list(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<Vec<OrderSummary>>, ApiError> {
    let Query(params) = params?;
    let orders = state
        .coordinator
        .list_orders(&actor, params.status, params.limit, params.offset)
        .await?;
    Ok(Json(orders))
}

/// GET /orders/{id}
pub async fn get(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<OrderResponse>, ApiError> {
    let Path(id) = id?;
    let order_id = OrderId::from_uuid(id);
    let order = state.coordinator.get_order(&actor, order_id).await?;
    Ok(Json(OrderResponse::new(order_id, &order)))
}

/// PATCH /orders/{id}/status
#[tracing::instrument(skip(state, payload))]
pub async fn update_status(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<UpdateStatusRequest>, JsonRejection>,
) -> Result<Json<OrderResponse>, ApiError> {
    let Path(id) = id?;
    let Json(request) = payload?;
    let order_id = OrderId::from_uuid(id);
    let order = state
        .coordinator
        .update_status(&actor, order_id, request.status, request.notes)
        .await?;
    Ok(Json(OrderResponse::new(order_id, &order)))
}
