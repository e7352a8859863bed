use bigdecimal::BigDecimal;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::clients::alerts::{AlertClient, AlertSeverity};
use crate::clients::notifier::{NotificationEvent, Notifier};
use crate::db::models::{
    PaymentProvider, Transaction, TransactionDraft, TransactionPurpose, TransactionState,
};
use crate::error::LedgerError;
use crate::services::ledger::{LedgerService, MarkOutcome};

/// A verified event from the card processor. Transport and signature
/// checking live in the webhook handler; by the time an event reaches the
/// reconciler it is authenticated.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorEvent {
    /// Provider-unique event id; doubles as the idempotency key for
    /// compensating transactions.
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// The provider's reference for the payout/charge the event concerns.
    pub object_id: String,
    pub amount: Option<BigDecimal>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    Terminal(TransactionState),
    StillProcessing,
    Refund,
}

/// Maps a processor event kind ("payout.succeeded", "charge.refunded", ...)
/// onto the ledger's state machine. Unrecognized kinds map to None and are
/// dropped upstream.
pub fn map_event_kind(kind: &str) -> Option<EventAction> {
    match kind.rsplit('.').next()? {
        "succeeded" => Some(EventAction::Terminal(TransactionState::Succeeded)),
        "failed" => Some(EventAction::Terminal(TransactionState::Failed)),
        "canceled" => Some(EventAction::Terminal(TransactionState::Canceled)),
        "processing" => Some(EventAction::StillProcessing),
        "refunded" => Some(EventAction::Refund),
        _ => None,
    }
}

/// Settled history is immutable: a refund never mutates the original row,
/// it reverses it with a new transaction whose parties are swapped.
pub fn compensating_draft(
    original: &Transaction,
    refund_ref: &str,
    amount: Option<BigDecimal>,
) -> TransactionDraft {
    TransactionDraft {
        sender_id: original.recipient_id,
        recipient_id: original.sender_id,
        purpose: TransactionPurpose::Refund,
        provider: original.provider,
        provider_tx_id: Some(refund_ref.to_string()),
        currency: original.currency,
        amount: amount.unwrap_or_else(|| original.amount.clone()),
        fee: BigDecimal::from(0),
        state: TransactionState::Succeeded,
        target_id: original.target_id,
        target_type: original.target_type.clone(),
        remark: Some(format!("refund of {}", original.id)),
    }
}

#[derive(Debug)]
pub enum ReconcileOutcome {
    /// This delivery performed the transition.
    Applied(Transaction),
    /// Duplicate delivery of a state already recorded; ignored.
    AlreadyTerminal(Transaction),
    /// Compensating refund transaction created (or found, on re-delivery).
    Refunded(Transaction),
    /// Event for a reference this ledger never created.
    UnknownRef,
    /// Event kind outside the mapped set.
    UnknownKind,
    /// `processing` keep-alive; the row is already pending.
    StillProcessing,
    /// Conflicting terminal state; rejected and escalated, never applied.
    TerminalConflict,
}

/// Consumes authenticated processor events and transitions pending
/// transactions exactly once. Safe against at-least-once delivery and
/// reordering: terminal states are never overwritten.
#[derive(Clone)]
pub struct WebhookReconciler {
    ledger: LedgerService,
    notifier: Arc<dyn Notifier>,
    alerts: AlertClient,
    alert_on_unknown_ref: bool,
}

impl WebhookReconciler {
    pub fn new(
        ledger: LedgerService,
        notifier: Arc<dyn Notifier>,
        alerts: AlertClient,
        alert_on_unknown_ref: bool,
    ) -> Self {
        Self {
            ledger,
            notifier,
            alerts,
            alert_on_unknown_ref,
        }
    }

    pub async fn apply(&self, event: &ProcessorEvent) -> Result<ReconcileOutcome, LedgerError> {
        let Some(action) = map_event_kind(&event.kind) else {
            tracing::info!(event_id = %event.id, kind = %event.kind, "unmapped event kind, dropping");
            return Ok(ReconcileOutcome::UnknownKind);
        };

        let Some(tx) = self
            .ledger
            .find_by_provider_tx_id(PaymentProvider::Processor, &event.object_id)
            .await?
        else {
            tracing::warn!(
                event_id = %event.id,
                object_id = %event.object_id,
                "event references a transaction this ledger never created"
            );
            if self.alert_on_unknown_ref {
                self.alerts
                    .send_alert(
                        "webhook event with unknown reference",
                        &format!("event {} references {}", event.id, event.object_id),
                        AlertSeverity::Warning,
                    )
                    .await;
            }
            return Ok(ReconcileOutcome::UnknownRef);
        };

        match action {
            EventAction::StillProcessing => Ok(ReconcileOutcome::StillProcessing),
            EventAction::Terminal(state) => self.apply_terminal(&tx, state, event).await,
            EventAction::Refund => self.apply_refund(&tx, event).await,
        }
    }

    async fn apply_terminal(
        &self,
        tx: &Transaction,
        state: TransactionState,
        event: &ProcessorEvent,
    ) -> Result<ReconcileOutcome, LedgerError> {
        match self.ledger.mark_transaction_state(tx.id, state).await {
            Ok(MarkOutcome::Applied(updated)) => {
                self.notify_settled(&updated, event.reason.as_deref()).await;
                Ok(ReconcileOutcome::Applied(updated))
            }
            Ok(MarkOutcome::AlreadyTerminal(existing)) => {
                tracing::debug!(tx_id = %existing.id, "duplicate delivery for settled transaction");
                Ok(ReconcileOutcome::AlreadyTerminal(existing))
            }
            Err(LedgerError::TerminalStateViolation {
                id,
                current,
                requested,
            }) => {
                // A settled row must never flip. Reject, page an operator,
                // and keep the batch alive for the remaining events.
                tracing::error!(
                    tx_id = %id,
                    %current,
                    %requested,
                    event_id = %event.id,
                    "conflicting terminal state from provider"
                );
                self.alerts
                    .send_alert(
                        "terminal state conflict",
                        &format!(
                            "event {} wants {} -> {} on transaction {}",
                            event.id, current, requested, id
                        ),
                        AlertSeverity::Critical,
                    )
                    .await;
                Ok(ReconcileOutcome::TerminalConflict)
            }
            Err(e) => Err(e),
        }
    }

    async fn apply_refund(
        &self,
        original: &Transaction,
        event: &ProcessorEvent,
    ) -> Result<ReconcileOutcome, LedgerError> {
        let draft = compensating_draft(original, &event.id, event.amount.clone());
        let refund = self.ledger.create_transaction(draft).await?;
        if let Some(recipient) = refund.recipient_id {
            self.notifier
                .notify(
                    NotificationEvent::RefundIssued,
                    recipient,
                    serde_json::json!({ "tx_id": refund.id, "original_tx_id": original.id }),
                )
                .await;
        }
        Ok(ReconcileOutcome::Refunded(refund))
    }

    /// Downstream notifications fire only on the delivery that performed
    /// the transition, so duplicates stay silent.
    async fn notify_settled(&self, tx: &Transaction, reason: Option<&str>) {
        let dispatch: Option<(NotificationEvent, Uuid)> = match (tx.purpose, tx.state) {
            (TransactionPurpose::Payout, TransactionState::Succeeded) => tx
                .sender_id
                .map(|user| (NotificationEvent::PayoutSucceeded, user)),
            (TransactionPurpose::Payout, TransactionState::Failed) => tx
                .sender_id
                .map(|user| (NotificationEvent::PayoutFailed, user)),
            (TransactionPurpose::Donation, TransactionState::Succeeded) => tx
                .recipient_id
                .map(|user| (NotificationEvent::DonationReceived, user)),
            (TransactionPurpose::AddCredit, TransactionState::Succeeded) => tx
                .recipient_id
                .map(|user| (NotificationEvent::CreditAdded, user)),
            _ => None,
        };

        if let Some((event, user)) = dispatch {
            self.notifier
                .notify(
                    event,
                    user,
                    serde_json::json!({
                        "tx_id": tx.id,
                        "amount": tx.amount.to_string(),
                        "currency": tx.currency,
                        "reason": reason,
                    }),
                )
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::LedgerCurrency;
    use chrono::Utc;

    #[test]
    fn test_event_kind_mapping() {
        assert_eq!(
            map_event_kind("payout.succeeded"),
            Some(EventAction::Terminal(TransactionState::Succeeded))
        );
        assert_eq!(
            map_event_kind("charge.failed"),
            Some(EventAction::Terminal(TransactionState::Failed))
        );
        assert_eq!(
            map_event_kind("payout.canceled"),
            Some(EventAction::Terminal(TransactionState::Canceled))
        );
        assert_eq!(
            map_event_kind("payout.processing"),
            Some(EventAction::StillProcessing)
        );
        assert_eq!(map_event_kind("charge.refunded"), Some(EventAction::Refund));
        assert_eq!(map_event_kind("account.updated"), None);
    }

    fn settled_donation() -> Transaction {
        let now = Utc::now();
        Transaction {
            id: Uuid::new_v4(),
            sender_id: Some(Uuid::new_v4()),
            recipient_id: Some(Uuid::new_v4()),
            purpose: TransactionPurpose::Donation,
            provider: PaymentProvider::Processor,
            provider_tx_id: Some("ch_1".to_string()),
            currency: LedgerCurrency::Fiat,
            amount: BigDecimal::from(100),
            fee: BigDecimal::from(5),
            state: TransactionState::Succeeded,
            target_id: None,
            target_type: None,
            remark: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_compensating_draft_swaps_parties() {
        let original = settled_donation();
        let draft = compensating_draft(&original, "evt_9", None);

        assert_eq!(draft.sender_id, original.recipient_id);
        assert_eq!(draft.recipient_id, original.sender_id);
        assert_eq!(draft.purpose, TransactionPurpose::Refund);
        assert_eq!(draft.state, TransactionState::Succeeded);
        assert_eq!(draft.provider_tx_id.as_deref(), Some("evt_9"));
        assert_eq!(draft.amount, original.amount);
    }

    #[test]
    fn test_compensating_draft_partial_amount() {
        let original = settled_donation();
        let draft = compensating_draft(&original, "evt_9", Some(BigDecimal::from(40)));
        assert_eq!(draft.amount, BigDecimal::from(40));
    }

    #[test]
    fn test_compensating_draft_for_payout_reverses_into_platform() {
        let mut original = settled_donation();
        original.purpose = TransactionPurpose::Payout;
        original.recipient_id = None;

        let draft = compensating_draft(&original, "evt_10", None);
        // Money returns from outside the platform back to the user.
        assert_eq!(draft.sender_id, None);
        assert_eq!(draft.recipient_id, original.sender_id);
    }
}
