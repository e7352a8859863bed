use bigdecimal::BigDecimal;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::clients::users::UserDirectory;
use crate::db::models::{
    PaymentProvider, Transaction, TransactionDraft, TransactionPurpose, TransactionState,
};
use crate::db::queries;
use crate::error::LedgerError;

/// Result of a terminal-state write. `Applied` means this call performed the
/// transition; callers gate side effects (notifications) on it so duplicate
/// reconciliation events stay silent.
#[derive(Debug)]
pub enum MarkOutcome {
    Applied(Transaction),
    AlreadyTerminal(Transaction),
}

impl MarkOutcome {
    pub fn transaction(&self) -> &Transaction {
        match self {
            MarkOutcome::Applied(tx) | MarkOutcome::AlreadyTerminal(tx) => tx,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PartyRule {
    Required,
    Forbidden,
    Optional,
}

/// Which side of the movement may be null, by purpose. Platform-originated
/// flows (subsidies, vault withdrawals, credit purchases) have no sender;
/// payouts leave the platform and have no recipient. A refund reverses its
/// original transaction, so either side may be null, never both.
fn party_rules(purpose: TransactionPurpose) -> (PartyRule, PartyRule) {
    match purpose {
        TransactionPurpose::Donation | TransactionPurpose::SubscriptionSplit => {
            (PartyRule::Required, PartyRule::Required)
        }
        TransactionPurpose::AddCredit
        | TransactionPurpose::SystemSubsidy
        | TransactionPurpose::CurationVaultWithdrawal => {
            (PartyRule::Forbidden, PartyRule::Required)
        }
        TransactionPurpose::Payout => (PartyRule::Required, PartyRule::Forbidden),
        TransactionPurpose::Refund => (PartyRule::Optional, PartyRule::Optional),
    }
}

fn check_party(
    side: &str,
    rule: PartyRule,
    value: Option<Uuid>,
) -> Result<(), LedgerError> {
    match (rule, value) {
        (PartyRule::Required, None) => Err(LedgerError::Validation(format!(
            "{} is required for this purpose",
            side
        ))),
        (PartyRule::Forbidden, Some(_)) => Err(LedgerError::Validation(format!(
            "{} must be empty for this purpose",
            side
        ))),
        _ => Ok(()),
    }
}

pub fn validate_draft(draft: &TransactionDraft) -> Result<(), LedgerError> {
    if draft.amount <= BigDecimal::from(0) {
        return Err(LedgerError::Validation(
            "amount must be positive".to_string(),
        ));
    }
    if draft.fee < BigDecimal::from(0) || draft.fee > draft.amount {
        return Err(LedgerError::Validation(
            "fee must be between zero and the amount".to_string(),
        ));
    }

    let (sender_rule, recipient_rule) = party_rules(draft.purpose);
    check_party("sender", sender_rule, draft.sender_id)?;
    check_party("recipient", recipient_rule, draft.recipient_id)?;
    if draft.sender_id.is_none() && draft.recipient_id.is_none() {
        return Err(LedgerError::Validation(
            "a transaction needs at least one party".to_string(),
        ));
    }
    Ok(())
}

/// The ledger core: sole owner of the transactions table.
#[derive(Clone)]
pub struct LedgerService {
    pool: PgPool,
    users: Arc<dyn UserDirectory>,
}

impl LedgerService {
    pub fn new(pool: PgPool, users: Arc<dyn UserDirectory>) -> Self {
        Self { pool, users }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn check_party_exists(&self, side: &str, id: Uuid) -> Result<(), LedgerError> {
        let user = self
            .users
            .get_user(id)
            .await
            .map_err(|e| LedgerError::Internal(e.to_string()))?
            .ok_or_else(|| LedgerError::Validation(format!("{} {} does not exist", side, id)))?;
        if user.is_archived() {
            return Err(LedgerError::Validation(format!(
                "{} {} is archived",
                side, id
            )));
        }
        Ok(())
    }

    /// Validates and persists a transaction. Defaults to pending; callers
    /// that settle synchronously (internal transfers, confirmed chain
    /// events) pass a terminal state in the draft. A duplicate
    /// `(provider, provider_tx_id)` returns the existing row unchanged.
    pub async fn create_transaction(
        &self,
        draft: TransactionDraft,
    ) -> Result<Transaction, LedgerError> {
        validate_draft(&draft)?;

        if let Some(provider_tx_id) = &draft.provider_tx_id {
            if let Some(existing) =
                queries::find_by_provider_tx_id(&self.pool, draft.provider, provider_tx_id).await?
            {
                tracing::debug!(
                    provider = %draft.provider,
                    provider_tx_id,
                    tx_id = %existing.id,
                    "transaction already ingested, returning existing row"
                );
                return Ok(existing);
            }
        }

        if let Some(sender) = draft.sender_id {
            self.check_party_exists("sender", sender).await?;
        }
        if let Some(recipient) = draft.recipient_id {
            self.check_party_exists("recipient", recipient).await?;
        }

        let tx = draft.into_transaction();
        match queries::insert_transaction(&self.pool, &tx).await {
            Ok(inserted) => Ok(inserted),
            Err(e) => match constraint_name(&e) {
                // Lost the idempotency race to a concurrent writer: the row
                // exists now, which is the outcome we wanted.
                Some("uq_transactions_provider_tx_id") => {
                    let provider_tx_id = tx.provider_tx_id.as_deref().unwrap_or_default();
                    queries::find_by_provider_tx_id(&self.pool, tx.provider, provider_tx_id)
                        .await?
                        .ok_or(LedgerError::Database(e))
                }
                Some("uq_transactions_one_pending_payout") => Err(LedgerError::PayoutInFlight(
                    tx.sender_id.unwrap_or_default(),
                )),
                _ => Err(LedgerError::Database(e)),
            },
        }
    }

    /// Enforces the pending -> terminal state machine. Re-applying the same
    /// terminal state is an idempotent no-op; a conflicting terminal state
    /// is a `TerminalStateViolation` and the row is left untouched.
    pub async fn mark_transaction_state(
        &self,
        id: Uuid,
        new_state: TransactionState,
    ) -> Result<MarkOutcome, LedgerError> {
        if !new_state.is_terminal() {
            return Err(LedgerError::Validation(format!(
                "cannot mark a transaction {}",
                new_state
            )));
        }

        if let Some(updated) = queries::apply_terminal_state(&self.pool, id, new_state).await? {
            tracing::info!(tx_id = %id, state = %new_state, "transaction settled");
            return Ok(MarkOutcome::Applied(updated));
        }

        let current = queries::get_transaction(&self.pool, id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("transaction {}", id)))?;

        if current.state == new_state {
            return Ok(MarkOutcome::AlreadyTerminal(current));
        }

        Err(LedgerError::TerminalStateViolation {
            id,
            current: current.state,
            requested: new_state,
        })
    }

    pub async fn get_transaction(&self, id: Uuid) -> Result<Transaction, LedgerError> {
        queries::get_transaction(&self.pool, id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("transaction {}", id)))
    }

    pub async fn find_by_provider_tx_id(
        &self,
        provider: PaymentProvider,
        provider_tx_id: &str,
    ) -> Result<Option<Transaction>, LedgerError> {
        Ok(queries::find_by_provider_tx_id(&self.pool, provider, provider_tx_id).await?)
    }

    pub async fn attach_provider_ref(
        &self,
        id: Uuid,
        provider_tx_id: &str,
    ) -> Result<Transaction, LedgerError> {
        Ok(queries::set_provider_tx_id(&self.pool, id, provider_tx_id).await?)
    }
}

fn constraint_name(e: &sqlx::Error) -> Option<&str> {
    match e {
        sqlx::Error::Database(db) => db.constraint(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::LedgerCurrency;

    fn draft(purpose: TransactionPurpose) -> TransactionDraft {
        let (sender_rule, recipient_rule) = party_rules(purpose);
        TransactionDraft {
            sender_id: matches!(sender_rule, PartyRule::Required).then(Uuid::new_v4),
            recipient_id: matches!(recipient_rule, PartyRule::Required).then(Uuid::new_v4),
            purpose,
            provider: PaymentProvider::Internal,
            provider_tx_id: None,
            currency: LedgerCurrency::Credit,
            amount: BigDecimal::from(100),
            fee: BigDecimal::from(0),
            state: TransactionState::Pending,
            target_id: None,
            target_type: None,
            remark: None,
        }
    }

    #[test]
    fn test_valid_donation_draft() {
        assert!(validate_draft(&draft(TransactionPurpose::Donation)).is_ok());
    }

    #[test]
    fn test_zero_amount_rejected() {
        let mut d = draft(TransactionPurpose::Donation);
        d.amount = BigDecimal::from(0);
        assert!(matches!(
            validate_draft(&d),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn test_fee_above_amount_rejected() {
        let mut d = draft(TransactionPurpose::Donation);
        d.fee = BigDecimal::from(101);
        assert!(matches!(
            validate_draft(&d),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn test_donation_requires_both_parties() {
        let mut d = draft(TransactionPurpose::Donation);
        d.sender_id = None;
        assert!(validate_draft(&d).is_err());

        let mut d = draft(TransactionPurpose::Donation);
        d.recipient_id = None;
        assert!(validate_draft(&d).is_err());
    }

    #[test]
    fn test_payout_forbids_recipient() {
        let mut d = draft(TransactionPurpose::Payout);
        d.recipient_id = Some(Uuid::new_v4());
        assert!(validate_draft(&d).is_err());
        assert!(validate_draft(&draft(TransactionPurpose::Payout)).is_ok());
    }

    #[test]
    fn test_platform_originated_purposes_forbid_sender() {
        for purpose in [
            TransactionPurpose::AddCredit,
            TransactionPurpose::SystemSubsidy,
            TransactionPurpose::CurationVaultWithdrawal,
        ] {
            let mut d = draft(purpose);
            d.sender_id = Some(Uuid::new_v4());
            assert!(validate_draft(&d).is_err(), "purpose {}", purpose);
            assert!(validate_draft(&draft(purpose)).is_ok(), "purpose {}", purpose);
        }
    }

    #[test]
    fn test_refund_allows_either_side_but_not_both_null() {
        let mut d = draft(TransactionPurpose::Refund);
        d.sender_id = Some(Uuid::new_v4());
        d.recipient_id = None;
        assert!(validate_draft(&d).is_ok());

        d.sender_id = None;
        d.recipient_id = Some(Uuid::new_v4());
        assert!(validate_draft(&d).is_ok());

        d.recipient_id = None;
        assert!(validate_draft(&d).is_err());
    }
}
