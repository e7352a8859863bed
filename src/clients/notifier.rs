use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEvent {
    DonationReceived,
    PayoutSucceeded,
    PayoutFailed,
    CreditAdded,
    RefundIssued,
    VaultWithdrawalCompleted,
}

/// Fire-and-forget notification dispatch. A failure here is logged and
/// swallowed; it must never roll back a ledger write.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: NotificationEvent, recipient_id: Uuid, payload: serde_json::Value);
}

#[derive(Clone)]
pub struct HttpNotifier {
    client: Client,
    base_url: String,
}

impl HttpNotifier {
    pub fn new(base_url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self { client, base_url }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(
        &self,
        event: NotificationEvent,
        recipient_id: Uuid,
        payload: serde_json::Value,
    ) {
        let url = format!("{}/notifications", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "event": event,
            "recipient_id": recipient_id,
            "payload": payload,
        });
        match self.client.post(&url).json(&body).send().await {
            Ok(response) if !response.status().is_success() => {
                tracing::warn!(
                    ?event,
                    %recipient_id,
                    status = %response.status(),
                    "notification service rejected event"
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(?event, %recipient_id, "notification dispatch failed: {}", e);
            }
        }
    }
}

/// Used where no notification endpoint is configured, and in tests.
#[derive(Clone, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(
        &self,
        event: NotificationEvent,
        recipient_id: Uuid,
        _payload: serde_json::Value,
    ) {
        tracing::debug!(?event, %recipient_id, "notification suppressed (no notifier configured)");
    }
}
