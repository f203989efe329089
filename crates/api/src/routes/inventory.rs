//! Stock endpoints for warehouse managers and admins.

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use common::{ProductId, WarehouseId};
use ledger::{InventoryRecord, Reference, Reservation, StockAlert, StockLevel, StockMovement};
use saga::StockAdjustment;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::actor::CurrentActor;
use crate::error::ApiError;
use crate::state::AppState;

const DEFAULT_MOVEMENT_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
pub struct ReserveRequest {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub quantity: u32,
    pub reference: Reference,
}

#[derive(Debug, Deserialize)]
pub struct ReferenceRequest {
    pub reference: Reference,
}

#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    pub product_id: ProductId,
    pub from_warehouse_id: WarehouseId,
    pub to_warehouse_id: WarehouseId,
    pub quantity: u32,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TransferResponse {
    pub source: InventoryRecord,
    pub destination: InventoryRecord,
}

#[derive(Debug, Deserialize)]
pub struct ThresholdRequest {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub low_stock_threshold: i64,
    #[serde(default)]
    pub max_stock_level: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct MovementParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct AlertParams {
    #[serde(default)]
    pub include_acknowledged: bool,
}

/// POST /inventory/reserve
#[tracing::instrument(skip(state, payload))]
pub async fn reserve(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    payload: Result<Json<ReserveRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Reservation>), ApiError> {
    let Json(request) = payload?;
    let reservation = state
        .coordinator
        .reserve_stock(
            &actor,
            request.product_id,
            request.warehouse_id,
            request.quantity,
            request.reference,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(reservation)))
}

/// POST /inventory/release
#[tracing::instrument(skip(state, payload))]
pub async fn release(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    payload: Result<Json<ReferenceRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = payload?;
    let released = state.coordinator.release_stock(&actor, request.reference).await?;
    Ok(Json(json!({ "released": released })))
}

/// POST /inventory/commit
#[tracing::instrument(skip(state, payload))]
pub async fn commit(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    payload: Result<Json<ReferenceRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = payload?;
    let committed = state.coordinator.commit_stock(&actor, request.reference).await?;
    Ok(Json(json!({ "committed": committed })))
}

/// POST /inventory/transfer
#[tracing::instrument(skip(state, payload))]
pub async fn transfer(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    payload: Result<Json<TransferRequest>, JsonRejection>,
) -> Result<Json<TransferResponse>, ApiError> {
    let Json(request) = payload?;
    let (source, destination) = state
        .coordinator
        .transfer_stock(
            &actor,
            request.product_id,
            request.from_warehouse_id,
            request.to_warehouse_id,
            request.quantity,
            request.notes,
        )
        .await?;
    Ok(Json(TransferResponse { source, destination }))
}

/// POST /inventory/adjust
#[tracing::instrument(skip(state, payload))]
pub async fn adjust(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    payload: Result<Json<StockAdjustment>, JsonRejection>,
) -> Result<Json<InventoryRecord>, ApiError> {
    let Json(adjustment) = payload?;
    let record = state.coordinator.adjust_stock(&actor, adjustment).await?;
    Ok(Json(record))
}

/// GET /inventory/{product_id}
pub async fn stock(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<StockLevel>, ApiError> {
    let Path(id) = id?;
    let level = state
        .coordinator
        .stock_level(&actor, ProductId::from_uuid(id))
        .await?;
    Ok(Json(level))
}

/// GET /inventory/{product_id}/movements?limit=
pub async fn movements(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    id: Result<Path<Uuid>, PathRejection>,
    params: Result<Query<MovementParams>, QueryRejection>,
) -> Result<Json<Vec<StockMovement>>, ApiError> {
    let Path(id) = id?;
    let Query(params) = params?;
    let movements = state
        .coordinator
        .stock_movements(
            &actor,
            ProductId::from_uuid(id),
            params.limit.unwrap_or(DEFAULT_MOVEMENT_LIMIT),
        )
        .await?;
    Ok(Json(movements))
}

/// GET /inventory/alerts?include_acknowledged=
pub async fn alerts(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    params: Result<Query<AlertParams>, QueryRejection>,
) -> Result<Json<Vec<StockAlert>>, ApiError> {
    let Query(params) = params?;
    let alerts = state
        .coordinator
        .stock_alerts(&actor, params.include_acknowledged)
        .await?;
    Ok(Json(alerts))
}

/// POST /inventory/alerts/{id}/acknowledge
#[tracing::instrument(skip(state))]
pub async fn acknowledge(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<StockAlert>, ApiError> {
    let Path(id) = id?;
    let alert = state.coordinator.acknowledge_alert(&actor, id).await?;
    Ok(Json(alert))
}

/// PUT /inventory/thresholds
#[tracing::instrument(skip(state, payload))]
pub async fn thresholds(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    payload: Result<Json<ThresholdRequest>, JsonRejection>,
) -> Result<Json<InventoryRecord>, ApiError> {
    let Json(request) = payload?;
    let record = state
        .coordinator
        .configure_thresholds(
            &actor,
            request.product_id,
            request.warehouse_id,
            request.low_stock_threshold,
            request.max_stock_level,
        )
        .await?;
    Ok(Json(record))
}
