use bigdecimal::BigDecimal;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::clients::alerts::{AlertClient, AlertSeverity};
use crate::clients::notifier::{NotificationEvent, Notifier};
use crate::db::models::{
    LedgerCurrency, PaymentProvider, Transaction, TransactionDraft, TransactionPurpose,
    TransactionState,
};
use crate::db::queries;
use crate::error::LedgerError;
use crate::providers::{AdapterRegistry, ProviderError};
use crate::services::ledger::LedgerService;

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentRequest {
    pub sender_id: Option<Uuid>,
    pub recipient_id: Option<Uuid>,
    pub purpose: TransactionPurpose,
    pub provider: PaymentProvider,
    pub currency: LedgerCurrency,
    pub amount: BigDecimal,
    #[serde(default)]
    pub fee: Option<BigDecimal>,
    pub target_id: Option<Uuid>,
    pub target_type: Option<String>,
    pub remark: Option<String>,
}

/// Client-facing money movement into or inside the platform: donations,
/// credit purchases, subscription splits. Creates the pending row first,
/// then dispatches the rail's adapter; terminal state lands synchronously
/// for rails that settle inline, or through the reconciler for the rest.
#[derive(Clone)]
pub struct PaymentService {
    ledger: LedgerService,
    adapters: AdapterRegistry,
    notifier: Arc<dyn Notifier>,
    alerts: AlertClient,
}

impl PaymentService {
    pub fn new(
        ledger: LedgerService,
        adapters: AdapterRegistry,
        notifier: Arc<dyn Notifier>,
        alerts: AlertClient,
    ) -> Self {
        Self {
            ledger,
            adapters,
            notifier,
            alerts,
        }
    }

    pub async fn pay(&self, request: PaymentRequest) -> Result<Transaction, LedgerError> {
        match request.purpose {
            TransactionPurpose::Donation
            | TransactionPurpose::AddCredit
            | TransactionPurpose::SubscriptionSplit
            | TransactionPurpose::SystemSubsidy => {}
            other => {
                return Err(LedgerError::Validation(format!(
                    "purpose {} is not a payment; use the payout operations",
                    other
                )))
            }
        }

        // The internal rail settles inside the ledger itself, so the row is
        // terminal from the start and there is nothing to dispatch.
        let initial_state = if request.provider == PaymentProvider::Internal {
            TransactionState::Succeeded
        } else {
            TransactionState::Pending
        };

        let tx = self
            .ledger
            .create_transaction(TransactionDraft {
                sender_id: request.sender_id,
                recipient_id: request.recipient_id,
                purpose: request.purpose,
                provider: request.provider,
                provider_tx_id: None,
                currency: request.currency,
                amount: request.amount,
                fee: request.fee.unwrap_or_else(|| BigDecimal::from(0)),
                state: initial_state,
                target_id: request.target_id,
                target_type: request.target_type,
                remark: request.remark,
            })
            .await?;

        if request.provider == PaymentProvider::Internal {
            self.notify_settled(&tx).await;
            return Ok(tx);
        }

        let adapter = self.adapters.get(request.provider)?;
        match adapter.initiate(&tx).await {
            Ok(provider_ref) => {
                let tx = self.ledger.attach_provider_ref(tx.id, &provider_ref).await?;
                // The micro-donation network settles its transfers inline;
                // the card processor confirms through webhooks.
                if request.provider == PaymentProvider::DonationNetwork {
                    let outcome = self
                        .ledger
                        .mark_transaction_state(tx.id, TransactionState::Succeeded)
                        .await?;
                    let settled = outcome.transaction().clone();
                    self.notify_settled(&settled).await;
                    return Ok(settled);
                }
                Ok(tx)
            }
            Err(ProviderError::Rejected(reason)) => {
                self.ledger
                    .mark_transaction_state(tx.id, TransactionState::Failed)
                    .await?;
                let failed = queries::set_remark(self.ledger.pool(), tx.id, &reason).await?;
                Err(LedgerError::Provider(ProviderError::Rejected(
                    failed.remark.unwrap_or(reason),
                )))
            }
            Err(ProviderError::Transient(reason)) => {
                tracing::warn!(tx_id = %tx.id, "transient payment dispatch failure, leaving pending: {}", reason);
                Ok(tx)
            }
            Err(ProviderError::Unknown(reason)) => {
                tracing::error!(tx_id = %tx.id, "unclassified payment dispatch failure: {}", reason);
                self.alerts
                    .send_alert(
                        "payment dispatch needs manual review",
                        &format!("transaction {}: {}", tx.id, reason),
                        AlertSeverity::Critical,
                    )
                    .await;
                Ok(tx)
            }
        }
    }

    async fn notify_settled(&self, tx: &Transaction) {
        let event = match tx.purpose {
            TransactionPurpose::Donation => NotificationEvent::DonationReceived,
            TransactionPurpose::AddCredit => NotificationEvent::CreditAdded,
            _ => return,
        };
        if let Some(recipient) = tx.recipient_id {
            self.notifier
                .notify(
                    event,
                    recipient,
                    serde_json::json!({
                        "tx_id": tx.id,
                        "amount": tx.amount.to_string(),
                        "currency": tx.currency,
                    }),
                )
                .await;
        }
    }
}
