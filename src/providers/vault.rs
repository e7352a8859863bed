use async_trait::async_trait;
use bigdecimal::num_bigint::BigInt;
use bigdecimal::BigDecimal;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::clients::users::UserDirectory;
use crate::db::models::{PaymentProvider, Transaction, TransactionPurpose};
use crate::providers::{PaymentAdapter, ProviderError};

/// keccak256("Curation(address,address,address,string,uint256)")
const CURATION_TOPIC: &str = "0xc2e41b3d49bbccbac6ceb142bad6119608adf4f1ee1ca5cc6fc332e0ca2fc602";

/// Token units on the curation chain carry 18 decimals.
const TOKEN_DECIMALS: i64 = 18;

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RawLog {
    #[serde(rename = "transactionHash")]
    transaction_hash: String,
    #[serde(rename = "logIndex")]
    log_index: String,
    topics: Vec<String>,
    data: String,
}

/// A curation event decoded from the vault contract's logs.
#[derive(Debug, Clone)]
pub struct CurationEvent {
    pub tx_hash: String,
    pub log_index: u64,
    pub curator_address: String,
    pub creator_address: String,
    pub amount: BigDecimal,
}

impl CurationEvent {
    /// Deterministic idempotency key: one ledger row per on-chain log.
    pub fn provider_tx_id(&self) -> String {
        format!("{}:{}", self.tx_hash, self.log_index)
    }
}

pub fn parse_hex_u64(value: &str) -> Result<u64, ProviderError> {
    let trimmed = value.trim_start_matches("0x");
    u64::from_str_radix(trimmed, 16)
        .map_err(|e| ProviderError::Unknown(format!("bad hex quantity {}: {}", value, e)))
}

/// An indexed address topic is a 32-byte word; the address is the low 20 bytes.
pub fn topic_to_address(topic: &str) -> Result<String, ProviderError> {
    let trimmed = topic.trim_start_matches("0x");
    if trimmed.len() != 64 {
        return Err(ProviderError::Unknown(format!(
            "topic {} is not a 32-byte word",
            topic
        )));
    }
    Ok(format!("0x{}", trimmed[24..].to_lowercase()))
}

pub fn data_to_amount(data: &str) -> Result<BigDecimal, ProviderError> {
    let trimmed = data.trim_start_matches("0x");
    let units = BigInt::parse_bytes(trimmed.as_bytes(), 16)
        .ok_or_else(|| ProviderError::Unknown(format!("bad amount word {}", data)))?;
    Ok(BigDecimal::new(units, TOKEN_DECIMALS))
}

/// Read side talks JSON-RPC to a chain node; the write side (withdrawals)
/// goes through the custodial vault operator, which signs and waits for
/// confirmation before answering.
#[derive(Clone)]
pub struct VaultClient {
    client: Client,
    rpc_url: String,
    operator_url: String,
    contract_address: String,
}

impl VaultClient {
    pub fn new(rpc_url: String, operator_url: String, contract_address: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            client,
            rpc_url,
            operator_url,
            contract_address,
        }
    }

    async fn rpc<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, ProviderError> {
        let response = self
            .client
            .post(&self.rpc_url)
            .json(&json!({ "jsonrpc": "2.0", "id": 1, "method": method, "params": params }))
            .send()
            .await
            .map_err(ProviderError::from_request_error)?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let detail = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, detail));
        }

        let body: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| ProviderError::Unknown(e.to_string()))?;

        if let Some(err) = body.error {
            return Err(ProviderError::Unknown(format!(
                "rpc error {}: {}",
                err.code, err.message
            )));
        }
        body.result
            .ok_or_else(|| ProviderError::Unknown(format!("{} returned no result", method)))
    }

    pub async fn block_number(&self) -> Result<u64, ProviderError> {
        let head: String = self.rpc("eth_blockNumber", json!([])).await?;
        parse_hex_u64(&head)
    }

    pub async fn curation_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<CurationEvent>, ProviderError> {
        let logs: Vec<RawLog> = self
            .rpc(
                "eth_getLogs",
                json!([{
                    "address": self.contract_address,
                    "fromBlock": format!("0x{:x}", from_block),
                    "toBlock": format!("0x{:x}", to_block),
                    "topics": [CURATION_TOPIC],
                }]),
            )
            .await?;

        let mut events = Vec::with_capacity(logs.len());
        for log in logs {
            if log.topics.len() < 3 {
                tracing::warn!(tx_hash = %log.transaction_hash, "curation log missing indexed topics, skipping");
                continue;
            }
            events.push(CurationEvent {
                log_index: parse_hex_u64(&log.log_index)?,
                curator_address: topic_to_address(&log.topics[1])?,
                creator_address: topic_to_address(&log.topics[2])?,
                amount: data_to_amount(&log.data)?,
                tx_hash: log.transaction_hash,
            });
        }
        Ok(events)
    }

    pub async fn withdraw(
        &self,
        to_address: &str,
        amount: &BigDecimal,
    ) -> Result<String, ProviderError> {
        let url = format!("{}/withdrawals", self.operator_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&json!({ "to": to_address, "amount": amount.to_string() }))
            .send()
            .await
            .map_err(ProviderError::from_request_error)?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let detail = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, detail));
        }

        #[derive(Deserialize)]
        struct WithdrawResponse {
            tx_hash: String,
        }
        let body: WithdrawResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Unknown(e.to_string()))?;
        Ok(body.tx_hash)
    }
}

pub struct VaultAdapter {
    client: VaultClient,
    users: Arc<dyn UserDirectory>,
}

impl VaultAdapter {
    pub fn new(client: VaultClient, users: Arc<dyn UserDirectory>) -> Self {
        Self { client, users }
    }
}

#[async_trait]
impl PaymentAdapter for VaultAdapter {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Blockchain
    }

    async fn initiate(&self, tx: &Transaction) -> Result<String, ProviderError> {
        if tx.purpose != TransactionPurpose::CurationVaultWithdrawal {
            return Err(ProviderError::Rejected(format!(
                "purpose {} is not routed through the vault",
                tx.purpose
            )));
        }
        let recipient = tx
            .recipient_id
            .ok_or_else(|| ProviderError::Rejected("withdrawal without a recipient".to_string()))?;
        let user = self
            .users
            .get_user(recipient)
            .await
            .map_err(|e| ProviderError::Transient(e.to_string()))?
            .ok_or_else(|| ProviderError::Rejected(format!("unknown user {}", recipient)))?;
        let address = user.wallet_address.ok_or_else(|| {
            ProviderError::Rejected(format!("user {} has no wallet address", recipient))
        })?;

        self.client.withdraw(&address, &tx.amount).await
    }

    async fn cancel(&self, provider_ref: &str) -> Result<(), ProviderError> {
        Err(ProviderError::Rejected(format!(
            "on-chain withdrawal {} cannot be canceled",
            provider_ref
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_quantity() {
        assert_eq!(parse_hex_u64("0x1a").unwrap(), 26);
        assert_eq!(parse_hex_u64("0x0").unwrap(), 0);
        assert!(parse_hex_u64("0xzz").is_err());
    }

    #[test]
    fn test_topic_to_address_strips_padding() {
        let topic = "0x000000000000000000000000AbCdEf0123456789abcdef0123456789ABCDEF01";
        let address = topic_to_address(topic).unwrap();
        assert_eq!(address, "0xabcdef0123456789abcdef0123456789abcdef01");
    }

    #[test]
    fn test_topic_wrong_width_rejected() {
        assert!(topic_to_address("0x1234").is_err());
    }

    #[test]
    fn test_data_to_amount_scales_token_decimals() {
        // 1.5 tokens = 1_500_000_000_000_000_000 units
        let data = "0x00000000000000000000000000000000000000000000000014d1120d7b160000";
        let amount = data_to_amount(data).unwrap();
        assert_eq!(amount, "1.5".parse::<BigDecimal>().unwrap());
    }

    #[test]
    fn test_event_provider_tx_id_is_deterministic() {
        let event = CurationEvent {
            tx_hash: "0xdeadbeef".to_string(),
            log_index: 7,
            curator_address: "0x1".to_string(),
            creator_address: "0x2".to_string(),
            amount: BigDecimal::from(1),
        };
        assert_eq!(event.provider_tx_id(), "0xdeadbeef:7");
    }

    #[tokio::test]
    async fn test_block_number_over_rpc() {
        let mut server = mockito::Server::new_async().await;

        let _mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":"0x64"}"#)
            .create_async()
            .await;

        let client = VaultClient::new(
            server.url(),
            "http://operator.test".to_string(),
            "0xcontract".to_string(),
        );
        assert_eq!(client.block_number().await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_rpc_error_surfaces_as_unknown() {
        let mut server = mockito::Server::new_async().await;

        let _mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"header not found"}}"#)
            .create_async()
            .await;

        let client = VaultClient::new(
            server.url(),
            "http://operator.test".to_string(),
            "0xcontract".to_string(),
        );
        assert!(matches!(
            client.block_number().await,
            Err(ProviderError::Unknown(_))
        ));
    }
}
