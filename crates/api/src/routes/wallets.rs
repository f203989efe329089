//! Endpoints for the caller's own wallet.

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use common::{Money, UserId};
use ledger::{Wallet, WalletTransaction};
use serde::{Deserialize, Serialize};

use crate::actor::CurrentActor;
use crate::error::ApiError;
use crate::state::AppState;

const DEFAULT_TRANSACTION_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
pub struct TransactionParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct TopUpRequest {
    pub amount: Money,
    #[serde(default)]
    pub reference: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    pub recipient_id: UserId,
    pub amount: Money,
    #[serde(default)]
    pub description: Option<String>,
}

/// Both legs of a wallet-to-wallet transfer.
#[derive(Debug, Serialize)]
pub struct TransferResponse {
    pub debit: WalletTransaction,
    pub credit: WalletTransaction,
}

/// GET /wallets/me
pub async fn get(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> Result<Json<Wallet>, ApiError> {
    Ok(Json(state.coordinator.wallet(&actor).await?))
}

/// GET /wallets/me/transactions?limit=
pub async fn transactions(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    params: Result<Query<TransactionParams>, QueryRejection>,
) -> Result<Json<Vec<WalletTransaction>>, ApiError> {
    let Query(params) = params?;
    let transactions = state
        .coordinator
        .wallet_transactions(&actor, params.limit.unwrap_or(DEFAULT_TRANSACTION_LIMIT))
        .await?;
    Ok(Json(transactions))
}

/// POST /wallets/topup
#[tracing::instrument(skip(state, payload))]
pub async fn top_up(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    payload: Result<Json<TopUpRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<WalletTransaction>), ApiError> {
    let Json(request) = payload?;
    let transaction = state
        .coordinator
        .top_up(&actor, request.amount, request.reference)
        .await?;
    Ok((StatusCode::CREATED, Json(transaction)))
}

/// POST /wallets/transfer
#[tracing::instrument(skip(state, payload))]
pub async fn transfer(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    payload: Result<Json<TransferRequest>, JsonRejection>,
) -> Result<Json<TransferResponse>, ApiError> {
    let Json(request) = payload?;
    let (debit, credit) = state
        .coordinator
        .transfer_funds(&actor, request.recipient_id, request.amount, request.description)
        .await?;
    Ok(Json(TransferResponse { debit, credit }))
}
