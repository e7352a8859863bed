use anyhow::Context;
use bigdecimal::BigDecimal;
use dotenvy::dotenv;
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,

    pub processor_api_url: String,
    pub processor_api_key: String,
    pub processor_webhook_secret: String,

    pub donation_api_url: String,
    pub donation_api_key: String,

    pub vault_rpc_url: String,
    pub vault_operator_url: String,
    pub vault_contract_address: String,
    pub vault_chain: String,
    pub vault_confirmations: u64,
    pub vault_poll_interval_secs: u64,
    pub vault_max_blocks_per_sync: u64,

    pub user_service_url: String,
    pub notifier_url: Option<String>,
    pub alert_webhook_url: Option<String>,

    pub payout_minimum: BigDecimal,
    pub payout_fee: BigDecimal,
    pub payout_stale_after_hours: i64,
    pub badge_donation_threshold: i64,
    pub webhook_unknown_ref_alert: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present

        Ok(Config {
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?,
            database_url: env::var("DATABASE_URL").context("DATABASE_URL is required")?,

            processor_api_url: env::var("PROCESSOR_API_URL")
                .context("PROCESSOR_API_URL is required")?,
            processor_api_key: env::var("PROCESSOR_API_KEY")
                .context("PROCESSOR_API_KEY is required")?,
            processor_webhook_secret: env::var("PROCESSOR_WEBHOOK_SECRET")
                .context("PROCESSOR_WEBHOOK_SECRET is required")?,

            donation_api_url: env::var("DONATION_API_URL")
                .context("DONATION_API_URL is required")?,
            donation_api_key: env::var("DONATION_API_KEY").unwrap_or_default(),

            vault_rpc_url: env::var("VAULT_RPC_URL").context("VAULT_RPC_URL is required")?,
            vault_operator_url: env::var("VAULT_OPERATOR_URL")
                .context("VAULT_OPERATOR_URL is required")?,
            vault_contract_address: env::var("VAULT_CONTRACT_ADDRESS")
                .context("VAULT_CONTRACT_ADDRESS is required")?,
            vault_chain: env::var("VAULT_CHAIN").unwrap_or_else(|_| "polygon".to_string()),
            vault_confirmations: env::var("VAULT_CONFIRMATIONS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()?,
            vault_poll_interval_secs: env::var("VAULT_POLL_INTERVAL_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()?,
            vault_max_blocks_per_sync: env::var("VAULT_MAX_BLOCKS_PER_SYNC")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()?,

            user_service_url: env::var("USER_SERVICE_URL")
                .context("USER_SERVICE_URL is required")?,
            notifier_url: env::var("NOTIFIER_URL").ok(),
            alert_webhook_url: env::var("ALERT_WEBHOOK_URL").ok(),

            payout_minimum: env::var("PAYOUT_MINIMUM")
                .unwrap_or_else(|_| "500".to_string())
                .parse()
                .map_err(|e| anyhow::anyhow!("PAYOUT_MINIMUM must be a decimal: {}", e))?,
            payout_fee: env::var("PAYOUT_FEE")
                .unwrap_or_else(|_| "0".to_string())
                .parse()
                .map_err(|e| anyhow::anyhow!("PAYOUT_FEE must be a decimal: {}", e))?,
            payout_stale_after_hours: env::var("PAYOUT_STALE_AFTER_HOURS")
                .unwrap_or_else(|_| "24".to_string())
                .parse()?,
            badge_donation_threshold: env::var("BADGE_DONATION_THRESHOLD")
                .unwrap_or_else(|_| "100".to_string())
                .parse()?,
            webhook_unknown_ref_alert: env::var("WEBHOOK_UNKNOWN_REF_ALERT")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        })
    }
}
