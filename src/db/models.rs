use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "transaction_state", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Pending,
    Succeeded,
    Failed,
    Canceled,
}

impl TransactionState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionState::Pending)
    }

    /// The only legal transitions are pending -> terminal. Re-applying the
    /// same terminal state is treated as a no-op by the caller, not here.
    pub fn can_transition_to(&self, next: TransactionState) -> bool {
        matches!(self, TransactionState::Pending) && next.is_terminal()
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionState::Pending => "pending",
            TransactionState::Succeeded => "succeeded",
            TransactionState::Failed => "failed",
            TransactionState::Canceled => "canceled",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "transaction_purpose", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionPurpose {
    Donation,
    AddCredit,
    Refund,
    Payout,
    SubscriptionSplit,
    CurationVaultWithdrawal,
    SystemSubsidy,
}

impl fmt::Display for TransactionPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionPurpose::Donation => "donation",
            TransactionPurpose::AddCredit => "add_credit",
            TransactionPurpose::Refund => "refund",
            TransactionPurpose::Payout => "payout",
            TransactionPurpose::SubscriptionSplit => "subscription_split",
            TransactionPurpose::CurationVaultWithdrawal => "curation_vault_withdrawal",
            TransactionPurpose::SystemSubsidy => "system_subsidy",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_provider", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentProvider {
    Internal,
    Processor,
    DonationNetwork,
    Blockchain,
}

impl fmt::Display for PaymentProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PaymentProvider::Internal => "internal",
            PaymentProvider::Processor => "processor",
            PaymentProvider::DonationNetwork => "donation_network",
            PaymentProvider::Blockchain => "blockchain",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "ledger_currency", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LedgerCurrency {
    Fiat,
    Credit,
    Token,
}

impl fmt::Display for LedgerCurrency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LedgerCurrency::Fiat => "fiat",
            LedgerCurrency::Credit => "credit",
            LedgerCurrency::Token => "token",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub sender_id: Option<Uuid>,
    pub recipient_id: Option<Uuid>,
    pub purpose: TransactionPurpose,
    pub provider: PaymentProvider,
    pub provider_tx_id: Option<String>,
    pub currency: LedgerCurrency,
    pub amount: BigDecimal,
    pub fee: BigDecimal,
    pub state: TransactionState,
    pub target_id: Option<Uuid>,
    pub target_type: Option<String>,
    pub remark: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PayoutAccount {
    pub id: Uuid,
    pub user_id: Uuid,
    pub account_id: String,
    pub provider: PaymentProvider,
    pub country: String,
    pub currency: LedgerCurrency,
    pub account_type: String,
    pub capabilities_transfers: bool,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ChainSyncSavepoint {
    pub chain: String,
    pub last_processed_block: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Badge {
    pub user_id: Uuid,
    pub badge_type: String,
    pub level: Option<i32>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

/// Inputs for creating a transaction. The ledger service validates the draft
/// and fills in identity and timestamps on insert.
#[derive(Debug, Clone)]
pub struct TransactionDraft {
    pub sender_id: Option<Uuid>,
    pub recipient_id: Option<Uuid>,
    pub purpose: TransactionPurpose,
    pub provider: PaymentProvider,
    pub provider_tx_id: Option<String>,
    pub currency: LedgerCurrency,
    pub amount: BigDecimal,
    pub fee: BigDecimal,
    pub state: TransactionState,
    pub target_id: Option<Uuid>,
    pub target_type: Option<String>,
    pub remark: Option<String>,
}

impl TransactionDraft {
    pub fn into_transaction(self) -> Transaction {
        let now = Utc::now();
        Transaction {
            id: Uuid::new_v4(),
            sender_id: self.sender_id,
            recipient_id: self.recipient_id,
            purpose: self.purpose,
            provider: self.provider,
            provider_tx_id: self.provider_tx_id,
            currency: self.currency,
            amount: self.amount,
            fee: self.fee,
            state: self.state,
            target_id: self.target_id,
            target_type: self.target_type,
            remark: self.remark,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_is_not_terminal() {
        assert!(!TransactionState::Pending.is_terminal());
    }

    #[test]
    fn test_terminal_states() {
        assert!(TransactionState::Succeeded.is_terminal());
        assert!(TransactionState::Failed.is_terminal());
        assert!(TransactionState::Canceled.is_terminal());
    }

    #[test]
    fn test_pending_can_reach_every_terminal_state() {
        assert!(TransactionState::Pending.can_transition_to(TransactionState::Succeeded));
        assert!(TransactionState::Pending.can_transition_to(TransactionState::Failed));
        assert!(TransactionState::Pending.can_transition_to(TransactionState::Canceled));
    }

    #[test]
    fn test_terminal_states_admit_no_transition() {
        for current in [
            TransactionState::Succeeded,
            TransactionState::Failed,
            TransactionState::Canceled,
        ] {
            for next in [
                TransactionState::Pending,
                TransactionState::Succeeded,
                TransactionState::Failed,
                TransactionState::Canceled,
            ] {
                assert!(!current.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_pending_to_pending_is_not_a_transition() {
        assert!(!TransactionState::Pending.can_transition_to(TransactionState::Pending));
    }
}
