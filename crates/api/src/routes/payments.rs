//! Payment endpoints.

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use common::{Money, PaymentId};
use ledger::Payment;
use saga::PaymentRequest;
use serde::Deserialize;
use uuid::Uuid;

use crate::actor::CurrentActor;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub success: bool,
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub payment_id: PaymentId,
    /// Full refund when omitted.
    #[serde(default)]
    pub amount: Option<Money>,
    pub reason: String,
}

/// POST /payments/process
#[tracing::instrument(skip(state, payload))]
pub async fn process(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    payload: Result<Json<PaymentRequest>, JsonRejection>,
) -> Result<Json<Payment>, ApiError> {
    let Json(request) = payload?;
    let payment = state.coordinator.process_payment(&actor, request).await?;
    Ok(Json(payment))
}

/// POST /payments/{id}/confirm
#[tracing::instrument(skip(state, payload))]
pub async fn confirm(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<ConfirmRequest>, JsonRejection>,
) -> Result<Json<Payment>, ApiError> {
    let Path(id) = id?;
    let Json(request) = payload?;
    let payment = state
        .coordinator
        .confirm_payment(&actor, PaymentId::from_uuid(id), request.success)
        .await?;
    Ok(Json(payment))
}

/// POST /payments/refund
#[tracing::instrument(skip(state, payload))]
pub async fn refund(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    payload: Result<Json<RefundRequest>, JsonRejection>,
) -> Result<Json<Payment>, ApiError> {
    let Json(request) = payload?;
    let payment = state
        .coordinator
        .refund_payment(&actor, request.payment_id, request.amount, &request.reason)
        .await?;
    Ok(Json(payment))
}

/// GET /payments/{id}
pub async fn get(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Payment>, ApiError> {
    let Path(id) = id?;
    let payment = state
        .coordinator
        .get_payment(&actor, PaymentId::from_uuid(id))
        .await?;
    Ok(Json(payment))
}
