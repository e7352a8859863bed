use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::models::LedgerCurrency;
use crate::db::queries;
use crate::error::LedgerError;
use crate::services::payments::PaymentRequest;
use crate::AppState;

pub async fn create_payment(
    State(state): State<AppState>,
    Json(payload): Json<PaymentRequest>,
) -> Result<impl IntoResponse, LedgerError> {
    let tx = state.payments.pay(payload).await?;
    Ok((StatusCode::CREATED, Json(tx)))
}

pub async fn get_transaction(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, LedgerError> {
    let tx = state.ledger.get_transaction(id).await?;
    Ok(Json(tx))
}

#[derive(Deserialize)]
pub struct Pagination {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list_user_transactions(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(pagination): Query<Pagination>,
) -> Result<impl IntoResponse, LedgerError> {
    let limit = pagination.limit.unwrap_or(20).clamp(1, 100);
    let offset = pagination.offset.unwrap_or(0).max(0);

    let transactions = queries::list_user_transactions(&state.db, user_id, limit, offset).await?;
    Ok(Json(transactions))
}

#[derive(Deserialize)]
pub struct BalanceParams {
    pub currency: LedgerCurrency,
}

#[derive(Serialize)]
pub struct BalanceResponse {
    pub user_id: Uuid,
    pub currency: LedgerCurrency,
    pub balance: String,
}

pub async fn get_balance(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(params): Query<BalanceParams>,
) -> Result<impl IntoResponse, LedgerError> {
    let balance = state
        .balance
        .calculate_balance(user_id, params.currency)
        .await?;

    Ok(Json(BalanceResponse {
        user_id,
        currency: params.currency,
        balance: balance.to_string(),
    }))
}
