use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Result};
use uuid::Uuid;

use crate::db::models::{
    LedgerCurrency, PaymentProvider, PayoutAccount, Transaction, TransactionState,
};

// --- Transaction queries ---

pub async fn insert_transaction(pool: &PgPool, tx: &Transaction) -> Result<Transaction> {
    sqlx::query_as::<_, Transaction>(
        r#"
        INSERT INTO transactions (
            id, sender_id, recipient_id, purpose, provider, provider_tx_id,
            currency, amount, fee, state, target_id, target_type, remark,
            created_at, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        RETURNING *
        "#,
    )
    .bind(tx.id)
    .bind(tx.sender_id)
    .bind(tx.recipient_id)
    .bind(tx.purpose)
    .bind(tx.provider)
    .bind(&tx.provider_tx_id)
    .bind(tx.currency)
    .bind(&tx.amount)
    .bind(&tx.fee)
    .bind(tx.state)
    .bind(tx.target_id)
    .bind(&tx.target_type)
    .bind(&tx.remark)
    .bind(tx.created_at)
    .bind(tx.updated_at)
    .fetch_one(pool)
    .await
}

pub async fn get_transaction(pool: &PgPool, id: Uuid) -> Result<Option<Transaction>> {
    sqlx::query_as::<_, Transaction>("SELECT * FROM transactions WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn find_by_provider_tx_id(
    pool: &PgPool,
    provider: PaymentProvider,
    provider_tx_id: &str,
) -> Result<Option<Transaction>> {
    sqlx::query_as::<_, Transaction>(
        "SELECT * FROM transactions WHERE provider = $1 AND provider_tx_id = $2",
    )
    .bind(provider)
    .bind(provider_tx_id)
    .fetch_optional(pool)
    .await
}

/// Conditional terminal write. Only a pending row is mutated; a concurrent
/// duplicate reconciliation attempt observes zero rows updated and no-ops.
pub async fn apply_terminal_state(
    pool: &PgPool,
    id: Uuid,
    state: TransactionState,
) -> Result<Option<Transaction>> {
    sqlx::query_as::<_, Transaction>(
        r#"
        UPDATE transactions
        SET state = $2, updated_at = NOW()
        WHERE id = $1 AND state = 'pending'
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(state)
    .fetch_optional(pool)
    .await
}

pub async fn set_provider_tx_id(
    pool: &PgPool,
    id: Uuid,
    provider_tx_id: &str,
) -> Result<Transaction> {
    sqlx::query_as::<_, Transaction>(
        "UPDATE transactions SET provider_tx_id = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .bind(provider_tx_id)
    .fetch_one(pool)
    .await
}

pub async fn set_remark(pool: &PgPool, id: Uuid, remark: &str) -> Result<Transaction> {
    sqlx::query_as::<_, Transaction>(
        "UPDATE transactions SET remark = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .bind(remark)
    .fetch_one(pool)
    .await
}

pub async fn list_user_transactions(
    pool: &PgPool,
    user_id: Uuid,
    limit: i64,
    offset: i64,
) -> Result<Vec<Transaction>> {
    sqlx::query_as::<_, Transaction>(
        r#"
        SELECT * FROM transactions
        WHERE sender_id = $1 OR recipient_id = $1
        ORDER BY created_at DESC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(user_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}

// --- Balance aggregates ---

/// Spendable balance from succeeded rows only. A row where the user is both
/// sender and recipient contributes both legs, so nothing is double counted.
pub async fn sum_balance(
    pool: &PgPool,
    user_id: Uuid,
    currency: LedgerCurrency,
) -> Result<BigDecimal> {
    sqlx::query_scalar::<_, BigDecimal>(
        r#"
        SELECT COALESCE(SUM(
            CASE WHEN recipient_id = $1 THEN amount - fee ELSE 0 END
            - CASE WHEN sender_id = $1 THEN amount ELSE 0 END
        ), 0)
        FROM transactions
        WHERE state = 'succeeded'
          AND currency = $2
          AND (recipient_id = $1 OR sender_id = $1)
        "#,
    )
    .bind(user_id)
    .bind(currency)
    .fetch_one(pool)
    .await
}

pub async fn count_pending_payouts(pool: &PgPool, user_id: Uuid) -> Result<i64> {
    sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*) FROM transactions
        WHERE sender_id = $1 AND purpose = 'payout' AND state = 'pending'
        "#,
    )
    .bind(user_id)
    .fetch_one(pool)
    .await
}

pub async fn sum_income_in_range(
    pool: &PgPool,
    target_id: Uuid,
    target_type: &str,
    currency: LedgerCurrency,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<BigDecimal> {
    sqlx::query_scalar::<_, BigDecimal>(
        r#"
        SELECT COALESCE(SUM(amount - fee), 0)
        FROM transactions
        WHERE state = 'succeeded'
          AND target_id = $1
          AND target_type = $2
          AND currency = $3
          AND created_at >= $4
          AND created_at < $5
        "#,
    )
    .bind(target_id)
    .bind(target_type)
    .bind(currency)
    .bind(from)
    .bind(to)
    .fetch_one(pool)
    .await
}

pub async fn stale_pending_payouts(
    pool: &PgPool,
    older_than: DateTime<Utc>,
) -> Result<Vec<Transaction>> {
    sqlx::query_as::<_, Transaction>(
        r#"
        SELECT * FROM transactions
        WHERE purpose = 'payout' AND state = 'pending' AND created_at < $1
        ORDER BY created_at ASC
        "#,
    )
    .bind(older_than)
    .fetch_all(pool)
    .await
}

// --- Payout account queries ---

pub async fn find_active_payout_account(
    pool: &PgPool,
    user_id: Uuid,
    provider: PaymentProvider,
) -> Result<Option<PayoutAccount>> {
    sqlx::query_as::<_, PayoutAccount>(
        "SELECT * FROM payout_accounts WHERE user_id = $1 AND provider = $2 AND archived = FALSE",
    )
    .bind(user_id)
    .bind(provider)
    .fetch_optional(pool)
    .await
}

/// Archives any live account for the user/provider and inserts the
/// replacement in one database transaction, so the partial unique index on
/// non-archived rows never sees two live accounts.
pub async fn archive_and_replace_payout_account(
    pool: &PgPool,
    account: &PayoutAccount,
) -> Result<PayoutAccount> {
    let mut db_tx = pool.begin().await?;

    sqlx::query(
        r#"
        UPDATE payout_accounts
        SET archived = TRUE, updated_at = NOW()
        WHERE user_id = $1 AND provider = $2 AND archived = FALSE
        "#,
    )
    .bind(account.user_id)
    .bind(account.provider)
    .execute(&mut *db_tx)
    .await?;

    let inserted = sqlx::query_as::<_, PayoutAccount>(
        r#"
        INSERT INTO payout_accounts (
            id, user_id, account_id, provider, country, currency,
            account_type, capabilities_transfers, archived, created_at, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, FALSE, $9, $10)
        RETURNING *
        "#,
    )
    .bind(account.id)
    .bind(account.user_id)
    .bind(&account.account_id)
    .bind(account.provider)
    .bind(&account.country)
    .bind(account.currency)
    .bind(&account.account_type)
    .bind(account.capabilities_transfers)
    .bind(account.created_at)
    .bind(account.updated_at)
    .fetch_one(&mut *db_tx)
    .await?;

    db_tx.commit().await?;
    Ok(inserted)
}

pub async fn mark_account_capable(
    pool: &PgPool,
    account_id: &str,
) -> Result<Option<PayoutAccount>> {
    sqlx::query_as::<_, PayoutAccount>(
        r#"
        UPDATE payout_accounts
        SET capabilities_transfers = TRUE, updated_at = NOW()
        WHERE account_id = $1 AND archived = FALSE
        RETURNING *
        "#,
    )
    .bind(account_id)
    .fetch_optional(pool)
    .await
}

// --- Chain sync savepoints ---

pub async fn get_savepoint(pool: &PgPool, chain: &str) -> Result<Option<i64>> {
    sqlx::query_scalar::<_, i64>(
        "SELECT last_processed_block FROM chain_sync_savepoints WHERE chain = $1",
    )
    .bind(chain)
    .fetch_optional(pool)
    .await
}

/// GREATEST keeps the cursor monotonic even if a lagging writer shows up.
pub async fn advance_savepoint(pool: &PgPool, chain: &str, block: i64) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO chain_sync_savepoints (chain, last_processed_block, updated_at)
        VALUES ($1, $2, NOW())
        ON CONFLICT (chain) DO UPDATE
        SET last_processed_block = GREATEST(chain_sync_savepoints.last_processed_block, EXCLUDED.last_processed_block),
            updated_at = NOW()
        "#,
    )
    .bind(chain)
    .bind(block)
    .execute(pool)
    .await?;
    Ok(())
}

// --- Badge queries ---

/// Grants the badge to every sender at or above the threshold in one
/// conflict-ignoring statement. Returns only newly granted user ids.
pub async fn grant_threshold_badges(
    pool: &PgPool,
    threshold: i64,
    badge_type: &str,
) -> Result<Vec<Uuid>> {
    sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO badges (user_id, badge_type)
        SELECT sender_id, $2 FROM transactions
        WHERE purpose = 'donation' AND state = 'succeeded' AND sender_id IS NOT NULL
        GROUP BY sender_id
        HAVING COUNT(*) >= $1
        ON CONFLICT (user_id, badge_type) DO NOTHING
        RETURNING user_id
        "#,
    )
    .bind(threshold)
    .bind(badge_type)
    .fetch_all(pool)
    .await
}
