use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::LedgerCurrency;
use crate::db::queries;
use crate::error::LedgerError;

/// Read side of the ledger: derives balances by aggregating succeeded rows.
/// Never mutates state and takes no locks; a transaction committing mid-read
/// may or may not be included, but a single row is never partially counted.
#[derive(Clone)]
pub struct BalanceService {
    pool: PgPool,
}

impl BalanceService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Spendable balance: succeeded incoming (net of fee) minus succeeded
    /// outgoing, restricted to one currency. Pending and failed rows never
    /// affect the result.
    pub async fn calculate_balance(
        &self,
        user_id: Uuid,
        currency: LedgerCurrency,
    ) -> Result<BigDecimal, LedgerError> {
        Ok(queries::sum_balance(&self.pool, user_id, currency).await?)
    }

    pub async fn count_pending_payouts(&self, user_id: Uuid) -> Result<i64, LedgerError> {
        Ok(queries::count_pending_payouts(&self.pool, user_id).await?)
    }

    /// Net income credited to a target entity (article, circle price) over
    /// a time window.
    pub async fn income_in_range(
        &self,
        target_id: Uuid,
        target_type: &str,
        currency: LedgerCurrency,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<BigDecimal, LedgerError> {
        Ok(queries::sum_income_in_range(&self.pool, target_id, target_type, currency, from, to)
            .await?)
    }
}
