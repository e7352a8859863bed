use sqlx::PgPool;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

use crate::clients::alerts::{AlertClient, AlertSeverity};
use crate::clients::users::UserDirectory;
use crate::db::models::{
    LedgerCurrency, PaymentProvider, TransactionDraft, TransactionPurpose, TransactionState,
};
use crate::db::queries;
use crate::error::LedgerError;
use crate::providers::vault::{CurationEvent, VaultClient};
use crate::services::ledger::LedgerService;

/// Alert after this many consecutive failed sync rounds.
const ALERT_AFTER_FAILURES: u32 = 3;

#[derive(Debug, Default)]
pub struct SyncReport {
    pub from_block: u64,
    pub to_block: u64,
    pub ingested: usize,
    pub skipped_existing: usize,
    pub skipped_unmapped: usize,
}

/// Polls the curation-vault contract and materializes confirmed events into
/// succeeded transactions. Crash-safe: the savepoint advances only after the
/// whole range is durably persisted, and re-processing a range is harmless
/// because every event carries a deterministic idempotency key.
///
/// Must run as a single active instance per chain; the scheduler, not this
/// type, guarantees that.
#[derive(Clone)]
pub struct ChainSynchronizer {
    pool: PgPool,
    ledger: LedgerService,
    vault: VaultClient,
    users: Arc<dyn UserDirectory>,
    alerts: AlertClient,
    chain: String,
    confirmations: u64,
    max_blocks: u64,
}

impl ChainSynchronizer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: PgPool,
        ledger: LedgerService,
        vault: VaultClient,
        users: Arc<dyn UserDirectory>,
        alerts: AlertClient,
        chain: String,
        confirmations: u64,
        max_blocks: u64,
    ) -> Self {
        Self {
            pool,
            ledger,
            vault,
            users,
            alerts,
            chain,
            confirmations,
            max_blocks,
        }
    }

    pub async fn sync_once(&self) -> Result<SyncReport, LedgerError> {
        let head = self.vault.block_number().await?;
        // Stay behind the head so a chain reorganization cannot invalidate
        // events we already turned into transactions.
        let safe_head = head.saturating_sub(self.confirmations);

        let last = queries::get_savepoint(&self.pool, &self.chain)
            .await?
            .unwrap_or(0)
            .max(0) as u64;
        let from = last + 1;
        if safe_head < from {
            return Ok(SyncReport {
                from_block: from,
                to_block: last,
                ..Default::default()
            });
        }
        let to = safe_head.min(from + self.max_blocks - 1);

        let events = self.vault.curation_events(from, to).await?;
        tracing::info!(
            chain = %self.chain,
            from, to,
            events = events.len(),
            "syncing curation events"
        );

        let mut report = SyncReport {
            from_block: from,
            to_block: to,
            ..Default::default()
        };
        for event in &events {
            self.ingest(event, &mut report).await?;
        }

        // Everything in the range is durable; only now may the cursor move.
        queries::advance_savepoint(&self.pool, &self.chain, to as i64).await?;
        Ok(report)
    }

    async fn ingest(
        &self,
        event: &CurationEvent,
        report: &mut SyncReport,
    ) -> Result<(), LedgerError> {
        let provider_tx_id = event.provider_tx_id();

        if self
            .ledger
            .find_by_provider_tx_id(PaymentProvider::Blockchain, &provider_tx_id)
            .await?
            .is_some()
        {
            report.skipped_existing += 1;
            return Ok(());
        }

        // Addresses with no platform mapping belong to outside wallets;
        // skipping them is expected, not a failure.
        let curator = self
            .users
            .find_by_wallet(&event.curator_address)
            .await
            .map_err(|e| LedgerError::Internal(e.to_string()))?;
        let Some(curator) = curator else {
            tracing::warn!(address = %event.curator_address, %provider_tx_id, "curator wallet has no platform user, skipping");
            report.skipped_unmapped += 1;
            return Ok(());
        };
        let creator = self
            .users
            .find_by_wallet(&event.creator_address)
            .await
            .map_err(|e| LedgerError::Internal(e.to_string()))?;
        let Some(creator) = creator else {
            tracing::warn!(address = %event.creator_address, %provider_tx_id, "creator wallet has no platform user, skipping");
            report.skipped_unmapped += 1;
            return Ok(());
        };

        // Confirmed on-chain events are final; there is no pending phase.
        self.ledger
            .create_transaction(TransactionDraft {
                sender_id: Some(curator.id),
                recipient_id: Some(creator.id),
                purpose: TransactionPurpose::Donation,
                provider: PaymentProvider::Blockchain,
                provider_tx_id: Some(provider_tx_id),
                currency: LedgerCurrency::Token,
                amount: event.amount.clone(),
                fee: bigdecimal::BigDecimal::from(0),
                state: TransactionState::Succeeded,
                target_id: None,
                target_type: None,
                remark: Some(format!("curation by {}", event.curator_address)),
            })
            .await?;
        report.ingested += 1;
        Ok(())
    }

    /// Scheduler loop. Failures leave the savepoint untouched, so the next
    /// round re-fetches the same range and idempotency fills the gaps.
    pub async fn run(self, poll_interval_secs: u64) {
        tracing::info!(chain = %self.chain, "chain synchronizer started");
        let mut consecutive_failures: u32 = 0;

        loop {
            match self.sync_once().await {
                Ok(report) => {
                    consecutive_failures = 0;
                    if report.ingested > 0 || report.skipped_unmapped > 0 {
                        tracing::info!(
                            chain = %self.chain,
                            ingested = report.ingested,
                            skipped_existing = report.skipped_existing,
                            skipped_unmapped = report.skipped_unmapped,
                            to_block = report.to_block,
                            "sync round complete"
                        );
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    tracing::error!(chain = %self.chain, failures = consecutive_failures, "sync round failed: {}", e);
                    if consecutive_failures == ALERT_AFTER_FAILURES {
                        self.alerts
                            .send_alert(
                                "blockchain sync failing",
                                &format!(
                                    "{} consecutive failures on chain {}: {}",
                                    consecutive_failures, self.chain, e
                                ),
                                AlertSeverity::Critical,
                            )
                            .await;
                    }
                }
            }

            sleep(Duration::from_secs(poll_interval_secs)).await;
        }
    }
}
