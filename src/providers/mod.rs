use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::db::models::{PaymentProvider, Transaction};

pub mod donation;
pub mod internal;
pub mod processor;
pub mod vault;

pub use donation::DonationNetworkAdapter;
pub use internal::InternalAdapter;
pub use processor::ProcessorClient;
pub use vault::VaultClient;

/// Provider failures normalized into the three shapes the ledger reacts to.
/// Transient leaves the transaction pending for reconciliation; Rejected is
/// permanent and fails the transaction; Unknown is logged and escalated for
/// manual review.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("transient provider failure: {0}")]
    Transient(String),
    #[error("provider rejected the operation: {0}")]
    Rejected(String),
    #[error("unclassified provider failure: {0}")]
    Unknown(String),
}

impl ProviderError {
    /// A timeout or connection failure is never assumed to have failed on
    /// the provider side; the caller leaves the transaction pending.
    pub fn from_request_error(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            ProviderError::Transient(err.to_string())
        } else {
            ProviderError::Unknown(err.to_string())
        }
    }

    pub fn from_status(status: u16, detail: String) -> Self {
        match status {
            408 | 429 | 500..=599 => ProviderError::Transient(format!("{}: {}", status, detail)),
            400 | 402 | 403 | 404 | 409 | 422 => {
                ProviderError::Rejected(format!("{}: {}", status, detail))
            }
            _ => ProviderError::Unknown(format!("{}: {}", status, detail)),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

/// One adapter per payment rail. Adding a rail means adding a variant to
/// `PaymentProvider` and registering an implementation here; the ledger
/// never inspects provider types at runtime.
#[async_trait]
pub trait PaymentAdapter: Send + Sync {
    fn provider(&self) -> PaymentProvider;

    /// Dispatch the money movement the transaction describes. Returns the
    /// provider-side reference used for reconciliation.
    async fn initiate(&self, tx: &Transaction) -> Result<String, ProviderError>;

    /// Best-effort cancellation. Rails that cannot cancel return Rejected.
    async fn cancel(&self, provider_ref: &str) -> Result<(), ProviderError>;
}

#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<PaymentProvider, Arc<dyn PaymentAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, adapter: Arc<dyn PaymentAdapter>) -> Self {
        self.adapters.insert(adapter.provider(), adapter);
        self
    }

    pub fn get(&self, provider: PaymentProvider) -> Result<&Arc<dyn PaymentAdapter>, ProviderError> {
        self.adapters.get(&provider).ok_or_else(|| {
            ProviderError::Unknown(format!("no adapter registered for provider {}", provider))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_is_transient() {
        let err = ProviderError::from_status(429, "slow down".to_string());
        assert!(err.is_transient());
    }

    #[test]
    fn test_server_errors_are_transient() {
        for status in [500, 502, 503] {
            assert!(ProviderError::from_status(status, String::new()).is_transient());
        }
    }

    #[test]
    fn test_client_errors_are_rejected() {
        for status in [400, 402, 403, 422] {
            let err = ProviderError::from_status(status, "invalid destination".to_string());
            assert!(matches!(err, ProviderError::Rejected(_)));
        }
    }

    #[test]
    fn test_odd_status_is_unknown() {
        let err = ProviderError::from_status(301, "moved".to_string());
        assert!(matches!(err, ProviderError::Unknown(_)));
    }

    #[test]
    fn test_empty_registry_yields_unknown() {
        let registry = AdapterRegistry::new();
        assert!(registry.get(PaymentProvider::Processor).is_err());
    }
}
