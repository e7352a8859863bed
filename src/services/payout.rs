use bigdecimal::BigDecimal;
use chrono::{Duration, Utc};
use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::clients::alerts::{AlertClient, AlertSeverity};
use crate::clients::notifier::{NotificationEvent, Notifier};
use crate::clients::users::UserDirectory;
use crate::db::models::{
    LedgerCurrency, PaymentProvider, PayoutAccount, Transaction, TransactionDraft,
    TransactionPurpose, TransactionState,
};
use crate::db::queries;
use crate::error::LedgerError;
use crate::providers::{AdapterRegistry, ProcessorClient, ProviderError};
use crate::services::balance::BalanceService;
use crate::services::ledger::LedgerService;

#[derive(Debug, Serialize)]
pub struct ConnectedAccount {
    pub account: PayoutAccount,
    pub onboarding_url: String,
}

/// Lifecycle of payout destinations plus the money-moving operations that
/// leave the platform: card-processor payouts and curation-vault
/// withdrawals.
#[derive(Clone)]
pub struct PayoutService {
    pool: PgPool,
    ledger: LedgerService,
    balance: BalanceService,
    processor: ProcessorClient,
    adapters: AdapterRegistry,
    users: Arc<dyn UserDirectory>,
    notifier: Arc<dyn Notifier>,
    alerts: AlertClient,
    payout_minimum: BigDecimal,
    payout_fee: BigDecimal,
}

impl PayoutService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: PgPool,
        ledger: LedgerService,
        balance: BalanceService,
        processor: ProcessorClient,
        adapters: AdapterRegistry,
        users: Arc<dyn UserDirectory>,
        notifier: Arc<dyn Notifier>,
        alerts: AlertClient,
        payout_minimum: BigDecimal,
        payout_fee: BigDecimal,
    ) -> Self {
        Self {
            pool,
            ledger,
            balance,
            processor,
            adapters,
            users,
            notifier,
            alerts,
            payout_minimum,
            payout_fee,
        }
    }

    /// Onboards a payout destination with the processor. The new row starts
    /// without transfer capability; a provider webhook flips it once
    /// onboarding completes.
    pub async fn connect_account(
        &self,
        user_id: Uuid,
        country: &str,
    ) -> Result<ConnectedAccount, LedgerError> {
        let user = self
            .users
            .get_user(user_id)
            .await
            .map_err(|e| LedgerError::Internal(e.to_string()))?
            .ok_or_else(|| LedgerError::NotFound(format!("user {}", user_id)))?;
        if user.is_archived() {
            return Err(LedgerError::Validation(format!(
                "user {} is archived",
                user_id
            )));
        }

        if let Some(existing) =
            queries::find_active_payout_account(&self.pool, user_id, PaymentProvider::Processor)
                .await?
        {
            if existing.capabilities_transfers {
                return Err(LedgerError::PayoutAccountExists(user_id));
            }
        }

        let balance = self
            .balance
            .calculate_balance(user_id, LedgerCurrency::Fiat)
            .await?;
        if balance < self.payout_minimum {
            return Err(LedgerError::BalanceInsufficient(format!(
                "balance {} is below the payout minimum {}",
                balance, self.payout_minimum
            )));
        }

        let destination = self
            .processor
            .create_payout_destination(user_id, country)
            .await?;

        let now = Utc::now();
        let account = PayoutAccount {
            id: Uuid::new_v4(),
            user_id,
            account_id: destination.account_id,
            provider: PaymentProvider::Processor,
            country: country.to_string(),
            currency: LedgerCurrency::Fiat,
            account_type: "express".to_string(),
            capabilities_transfers: false,
            archived: false,
            created_at: now,
            updated_at: now,
        };
        let account = queries::archive_and_replace_payout_account(&self.pool, &account).await?;

        tracing::info!(%user_id, account_id = %account.account_id, "payout account connected");
        Ok(ConnectedAccount {
            account,
            onboarding_url: destination.onboarding_url,
        })
    }

    /// Idempotent: flipping capability on an already-capable account is a
    /// no-op. Unknown account ids are dropped quietly (the event may be for
    /// an account this ledger archived since).
    pub async fn mark_capable(&self, account_id: &str) -> Result<(), LedgerError> {
        match queries::mark_account_capable(&self.pool, account_id).await? {
            Some(account) => {
                tracing::info!(account_id, user_id = %account.user_id, "payout account transfer-capable");
            }
            None => {
                tracing::warn!(account_id, "capability event for unknown or archived account");
            }
        }
        Ok(())
    }

    pub async fn archive_and_replace(
        &self,
        account: &PayoutAccount,
    ) -> Result<PayoutAccount, LedgerError> {
        Ok(queries::archive_and_replace_payout_account(&self.pool, account).await?)
    }

    /// Creates the pending payout row and dispatches it to the processor.
    /// The single-pending-payout invariant is enforced by the store; two
    /// concurrent initiations race on the partial unique index and the
    /// loser sees `PayoutInFlight`.
    pub async fn initiate_payout(
        &self,
        user_id: Uuid,
        amount: BigDecimal,
    ) -> Result<Transaction, LedgerError> {
        let account =
            queries::find_active_payout_account(&self.pool, user_id, PaymentProvider::Processor)
                .await?
                .filter(|a| a.capabilities_transfers)
                .ok_or_else(|| {
                    LedgerError::Validation(format!(
                        "user {} has no transfer-capable payout account",
                        user_id
                    ))
                })?;

        if amount < self.payout_minimum {
            return Err(LedgerError::Validation(format!(
                "payout amount {} is below the minimum {}",
                amount, self.payout_minimum
            )));
        }

        if self.balance.count_pending_payouts(user_id).await? > 0 {
            return Err(LedgerError::PayoutInFlight(user_id));
        }

        // Re-check immediately before committing to the payout; the window
        // left open here is bounded by the one-pending-payout invariant.
        let balance = self
            .balance
            .calculate_balance(user_id, LedgerCurrency::Fiat)
            .await?;
        if balance < amount {
            return Err(LedgerError::BalanceInsufficient(format!(
                "balance {} cannot cover payout {}",
                balance, amount
            )));
        }

        let tx = self
            .ledger
            .create_transaction(TransactionDraft {
                sender_id: Some(user_id),
                recipient_id: None,
                purpose: TransactionPurpose::Payout,
                provider: PaymentProvider::Processor,
                provider_tx_id: None,
                currency: LedgerCurrency::Fiat,
                amount,
                fee: self.payout_fee.clone(),
                state: TransactionState::Pending,
                target_id: None,
                target_type: None,
                remark: None,
            })
            .await?;
        tracing::info!(tx_id = %tx.id, %user_id, account_id = %account.account_id, "payout initiated");

        let adapter = self.adapters.get(PaymentProvider::Processor)?;
        match adapter.initiate(&tx).await {
            Ok(provider_ref) => Ok(self.ledger.attach_provider_ref(tx.id, &provider_ref).await?),
            Err(e) => self.handle_dispatch_failure(tx, e, "payout").await,
        }
    }

    /// Withdraws accumulated curation funds from the on-chain vault to the
    /// user's wallet. The operator confirms the transaction before
    /// answering, so a success settles synchronously.
    pub async fn withdraw_from_vault(
        &self,
        user_id: Uuid,
        amount: BigDecimal,
    ) -> Result<Transaction, LedgerError> {
        let tx = self
            .ledger
            .create_transaction(TransactionDraft {
                sender_id: None,
                recipient_id: Some(user_id),
                purpose: TransactionPurpose::CurationVaultWithdrawal,
                provider: PaymentProvider::Blockchain,
                provider_tx_id: None,
                currency: LedgerCurrency::Token,
                amount,
                fee: BigDecimal::from(0),
                state: TransactionState::Pending,
                target_id: None,
                target_type: None,
                remark: None,
            })
            .await?;

        let adapter = self.adapters.get(PaymentProvider::Blockchain)?;
        match adapter.initiate(&tx).await {
            Ok(tx_hash) => {
                let tx = self.ledger.attach_provider_ref(tx.id, &tx_hash).await?;
                let outcome = self
                    .ledger
                    .mark_transaction_state(tx.id, TransactionState::Succeeded)
                    .await?;
                self.notifier
                    .notify(
                        NotificationEvent::VaultWithdrawalCompleted,
                        user_id,
                        serde_json::json!({ "tx_id": tx.id, "tx_hash": tx_hash }),
                    )
                    .await;
                Ok(outcome.transaction().clone())
            }
            Err(e) => self.handle_dispatch_failure(tx, e, "vault withdrawal").await,
        }
    }

    /// Shared failure policy for outbound dispatches: a permanent rejection
    /// fails the row with the reason attached; a transient failure leaves
    /// it pending for reconciliation; an unclassified failure leaves it
    /// pending and pages an operator.
    async fn handle_dispatch_failure(
        &self,
        tx: Transaction,
        err: ProviderError,
        operation: &str,
    ) -> Result<Transaction, LedgerError> {
        match err {
            ProviderError::Rejected(reason) => {
                self.ledger
                    .mark_transaction_state(tx.id, TransactionState::Failed)
                    .await?;
                let failed = queries::set_remark(&self.pool, tx.id, &reason).await?;
                if let Some(user_id) = failed.sender_id.or(failed.recipient_id) {
                    self.notifier
                        .notify(
                            NotificationEvent::PayoutFailed,
                            user_id,
                            serde_json::json!({ "tx_id": failed.id, "reason": reason }),
                        )
                        .await;
                }
                Err(LedgerError::Provider(ProviderError::Rejected(
                    failed.remark.clone().unwrap_or_default(),
                )))
            }
            ProviderError::Transient(reason) => {
                tracing::warn!(tx_id = %tx.id, operation, "transient dispatch failure, leaving pending: {}", reason);
                Ok(tx)
            }
            ProviderError::Unknown(reason) => {
                tracing::error!(tx_id = %tx.id, operation, "unclassified dispatch failure: {}", reason);
                self.alerts
                    .send_alert(
                        &format!("{} dispatch needs manual review", operation),
                        &format!("transaction {}: {}", tx.id, reason),
                        AlertSeverity::Critical,
                    )
                    .await;
                Ok(tx)
            }
        }
    }

    /// Surfaces payouts stuck pending past the configured age so an
    /// operator can reconcile them against the processor dashboard.
    pub async fn sweep_stale_payouts(
        &self,
        stale_after_hours: i64,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let cutoff = Utc::now() - Duration::hours(stale_after_hours);
        let stale = queries::stale_pending_payouts(&self.pool, cutoff).await?;
        if !stale.is_empty() {
            let ids: Vec<String> = stale.iter().map(|t| t.id.to_string()).collect();
            self.alerts
                .send_alert(
                    "payouts pending past the reconciliation window",
                    &format!("{} payout(s) need manual review: {}", stale.len(), ids.join(", ")),
                    AlertSeverity::Warning,
                )
                .await;
        }
        Ok(stale)
    }
}
