use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use bigdecimal::BigDecimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::LedgerError;
use crate::AppState;

#[derive(Deserialize)]
pub struct ConnectAccountRequest {
    pub country: String,
}

pub async fn connect_account(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<ConnectAccountRequest>,
) -> Result<impl IntoResponse, LedgerError> {
    let connected = state
        .payouts
        .connect_account(user_id, &payload.country)
        .await?;
    Ok((StatusCode::CREATED, Json(connected)))
}

#[derive(Deserialize)]
pub struct InitiatePayoutRequest {
    pub amount: BigDecimal,
}

pub async fn initiate_payout(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<InitiatePayoutRequest>,
) -> Result<impl IntoResponse, LedgerError> {
    let tx = state.payouts.initiate_payout(user_id, payload.amount).await?;
    Ok((StatusCode::CREATED, Json(tx)))
}

#[derive(Deserialize)]
pub struct VaultWithdrawalRequest {
    pub amount: BigDecimal,
}

pub async fn withdraw_from_vault(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<VaultWithdrawalRequest>,
) -> Result<impl IntoResponse, LedgerError> {
    let tx = state
        .payouts
        .withdraw_from_vault(user_id, payload.amount)
        .await?;
    Ok((StatusCode::CREATED, Json(tx)))
}
