use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::clients::users::UserDirectory;
use crate::db::models::{PaymentProvider, Transaction};
use crate::providers::{PaymentAdapter, ProviderError};

#[derive(Debug, Serialize)]
struct TransferRequest<'a> {
    from: &'a str,
    to: &'a str,
    amount: String,
    remark: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
pub struct TransferResponse {
    pub tx_id: String,
    pub status: String,
}

/// Client for the third-party micro-donation network. Parties are addressed
/// by their network handle, resolved through the user directory at dispatch.
#[derive(Clone)]
pub struct DonationNetworkClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl DonationNetworkClient {
    pub fn new(base_url: String, api_key: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url,
            api_key,
        }
    }

    pub async fn transfer(
        &self,
        from: &str,
        to: &str,
        amount: &bigdecimal::BigDecimal,
        remark: Option<&str>,
    ) -> Result<TransferResponse, ProviderError> {
        let url = format!("{}/v2/transfers", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&TransferRequest {
                from,
                to,
                amount: amount.to_string(),
                remark,
            })
            .send()
            .await
            .map_err(ProviderError::from_request_error)?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let detail = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, detail));
        }
        response
            .json::<TransferResponse>()
            .await
            .map_err(|e| ProviderError::Unknown(e.to_string()))
    }
}

pub struct DonationNetworkAdapter {
    client: DonationNetworkClient,
    users: Arc<dyn UserDirectory>,
}

impl DonationNetworkAdapter {
    pub fn new(client: DonationNetworkClient, users: Arc<dyn UserDirectory>) -> Self {
        Self { client, users }
    }

    async fn network_handle(&self, user_id: uuid::Uuid) -> Result<String, ProviderError> {
        let user = self
            .users
            .get_user(user_id)
            .await
            .map_err(|e| ProviderError::Transient(e.to_string()))?
            .ok_or_else(|| ProviderError::Rejected(format!("unknown user {}", user_id)))?;
        user.liker_id.ok_or_else(|| {
            ProviderError::Rejected(format!(
                "user {} has no micro-donation network handle",
                user_id
            ))
        })
    }
}

#[async_trait]
impl PaymentAdapter for DonationNetworkAdapter {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::DonationNetwork
    }

    async fn initiate(&self, tx: &Transaction) -> Result<String, ProviderError> {
        let sender = tx
            .sender_id
            .ok_or_else(|| ProviderError::Rejected("transfer without a sender".to_string()))?;
        let recipient = tx
            .recipient_id
            .ok_or_else(|| ProviderError::Rejected("transfer without a recipient".to_string()))?;

        let from = self.network_handle(sender).await?;
        let to = self.network_handle(recipient).await?;

        let transfer = self
            .client
            .transfer(&from, &to, &tx.amount, tx.remark.as_deref())
            .await?;
        Ok(transfer.tx_id)
    }

    async fn cancel(&self, provider_ref: &str) -> Result<(), ProviderError> {
        Err(ProviderError::Rejected(format!(
            "the micro-donation network cannot cancel transfer {}",
            provider_ref
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;

    #[tokio::test]
    async fn test_transfer_success() {
        let mut server = mockito::Server::new_async().await;

        let _mock = server
            .mock("POST", "/v2/transfers")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"tx_id":"dn_42","status":"ok"}"#)
            .create_async()
            .await;

        let client = DonationNetworkClient::new(server.url(), "key".to_string());
        let transfer = client
            .transfer("alice", "bob", &BigDecimal::from(3), None)
            .await
            .unwrap();

        assert_eq!(transfer.tx_id, "dn_42");
    }

    #[tokio::test]
    async fn test_rate_limited_transfer_is_transient() {
        let mut server = mockito::Server::new_async().await;

        let _mock = server
            .mock("POST", "/v2/transfers")
            .with_status(429)
            .create_async()
            .await;

        let client = DonationNetworkClient::new(server.url(), "key".to_string());
        let result = client
            .transfer("alice", "bob", &BigDecimal::from(3), None)
            .await;

        assert!(matches!(result, Err(ProviderError::Transient(_))));
    }
}
