use async_trait::async_trait;

use crate::db::models::{PaymentProvider, Transaction};
use crate::providers::{PaymentAdapter, ProviderError};

/// The platform's own transfer mechanism. Nothing leaves the ledger, so
/// there is no external call: the ledger row itself is the settlement and
/// internal transactions are created in a terminal state.
pub struct InternalAdapter;

impl InternalAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for InternalAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentAdapter for InternalAdapter {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Internal
    }

    async fn initiate(&self, tx: &Transaction) -> Result<String, ProviderError> {
        if tx.provider != PaymentProvider::Internal {
            return Err(ProviderError::Rejected(format!(
                "internal adapter received a {} transaction",
                tx.provider
            )));
        }
        tracing::debug!(tx_id = %tx.id, "internal transfer settled");
        Ok(format!("internal-{}", tx.id))
    }

    async fn cancel(&self, provider_ref: &str) -> Result<(), ProviderError> {
        Err(ProviderError::Rejected(format!(
            "internal transfer {} settles instantly and cannot be canceled",
            provider_ref
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{
        LedgerCurrency, TransactionDraft, TransactionPurpose, TransactionState,
    };
    use bigdecimal::BigDecimal;
    use uuid::Uuid;

    fn internal_tx() -> Transaction {
        TransactionDraft {
            sender_id: Some(Uuid::new_v4()),
            recipient_id: Some(Uuid::new_v4()),
            purpose: TransactionPurpose::Donation,
            provider: PaymentProvider::Internal,
            provider_tx_id: None,
            currency: LedgerCurrency::Credit,
            amount: BigDecimal::from(10),
            fee: BigDecimal::from(0),
            state: TransactionState::Succeeded,
            target_id: None,
            target_type: None,
            remark: None,
        }
        .into_transaction()
    }

    #[tokio::test]
    async fn test_initiate_returns_deterministic_ref() {
        let adapter = InternalAdapter::new();
        let tx = internal_tx();
        let provider_ref = adapter.initiate(&tx).await.unwrap();
        assert_eq!(provider_ref, format!("internal-{}", tx.id));
    }

    #[tokio::test]
    async fn test_rejects_foreign_provider() {
        let adapter = InternalAdapter::new();
        let mut tx = internal_tx();
        tx.provider = PaymentProvider::Processor;
        assert!(matches!(
            adapter.initiate(&tx).await,
            Err(ProviderError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_unsupported() {
        let adapter = InternalAdapter::new();
        assert!(matches!(
            adapter.cancel("internal-x").await,
            Err(ProviderError::Rejected(_))
        ));
    }
}
