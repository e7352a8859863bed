use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::db::models::TransactionState;
use crate::providers::ProviderError;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Insufficient balance: {0}")]
    BalanceInsufficient(String),

    #[error("An active payout account already exists for user {0}")]
    PayoutAccountExists(Uuid),

    #[error("A payout is already in flight for user {0}")]
    PayoutInFlight(Uuid),

    #[error("Transaction {id} is already {current}, cannot transition to {requested}")]
    TerminalStateViolation {
        id: Uuid,
        current: TransactionState,
        requested: TransactionState,
    },

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    fn status_code(&self) -> StatusCode {
        match self {
            LedgerError::Database(_) | LedgerError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            LedgerError::Validation(_) | LedgerError::BalanceInsufficient(_) => {
                StatusCode::BAD_REQUEST
            }
            LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
            LedgerError::PayoutAccountExists(_)
            | LedgerError::PayoutInFlight(_)
            | LedgerError::TerminalStateViolation { .. } => StatusCode::CONFLICT,
            LedgerError::Provider(ProviderError::Transient(_)) => StatusCode::SERVICE_UNAVAILABLE,
            LedgerError::Provider(ProviderError::Rejected(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            LedgerError::Provider(ProviderError::Unknown(_)) => StatusCode::BAD_GATEWAY,
            LedgerError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for LedgerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_status_code() {
        let error = LedgerError::Validation("amount must be positive".to_string());
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_not_found_error_status_code() {
        let error = LedgerError::NotFound("transaction missing".to_string());
        assert_eq!(error.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_terminal_violation_is_conflict() {
        let error = LedgerError::TerminalStateViolation {
            id: Uuid::new_v4(),
            current: TransactionState::Succeeded,
            requested: TransactionState::Failed,
        };
        assert_eq!(error.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_payout_in_flight_is_conflict() {
        let error = LedgerError::PayoutInFlight(Uuid::new_v4());
        assert_eq!(error.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_transient_provider_error_is_service_unavailable() {
        let error = LedgerError::Provider(ProviderError::Transient("timeout".to_string()));
        assert_eq!(error.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_rejected_provider_error_is_unprocessable() {
        let error = LedgerError::Provider(ProviderError::Rejected("bad destination".to_string()));
        assert_eq!(error.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_database_error_response() {
        let error = LedgerError::Database(sqlx::Error::RowNotFound);
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
