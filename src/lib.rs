pub mod clients;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod providers;
pub mod services;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use crate::services::{
    BalanceService, LedgerService, PaymentService, PayoutService, WebhookReconciler,
};

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub ledger: LedgerService,
    pub balance: BalanceService,
    pub payments: PaymentService,
    pub payouts: PayoutService,
    pub reconciler: WebhookReconciler,
    pub webhook_secret: String,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/webhooks/processor", post(handlers::webhook::processor_callback))
        .route("/payments", post(handlers::transactions::create_payment))
        .route("/transactions/:id", get(handlers::transactions::get_transaction))
        .route(
            "/users/:id/transactions",
            get(handlers::transactions::list_user_transactions),
        )
        .route("/users/:id/balance", get(handlers::transactions::get_balance))
        .route(
            "/users/:id/payout-account",
            post(handlers::payouts::connect_account),
        )
        .route("/users/:id/payouts", post(handlers::payouts::initiate_payout))
        .route(
            "/users/:id/vault-withdrawals",
            post(handlers::payouts::withdraw_from_vault),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}
