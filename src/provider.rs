//! The external fetch capability and the synthetic provider used in demo mode.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("provider {provider} rejected the request: {reason}")]
    Provider { provider: String, reason: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Other(String),
}

/// Retrieves raw account data from a provider.
///
/// Implementations must not touch pipeline state; any error ends the current
/// attempt and the account is marked FAILED.
#[async_trait]
pub trait AccountDataProvider: Send + Sync {
    async fn fetch(
        &self,
        provider: &str,
        external_account_id: &str,
        since: OffsetDateTime,
    ) -> Result<Vec<u8>, FetchError>;
}

/// Returns two fresh card transactions per call after a fixed delay.
pub struct MockBankProvider {
    latency: Duration,
}

impl MockBankProvider {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

impl Default for MockBankProvider {
    fn default() -> Self {
        Self::new(Duration::from_millis(200))
    }
}

#[async_trait]
impl AccountDataProvider for MockBankProvider {
    async fn fetch(
        &self,
        provider: &str,
        external_account_id: &str,
        since: OffsetDateTime,
    ) -> Result<Vec<u8>, FetchError> {
        tokio::time::sleep(self.latency).await;

        let now = OffsetDateTime::now_utc();
        let stamp = now.unix_timestamp_nanos();
        let date = now
            .format(&Rfc3339)
            .map_err(|e| FetchError::Other(e.to_string()))?;
        tracing::trace!(provider, external_account_id, since = %since, "Mock bank serving records");

        let records = json!([
            {
                "id": format!("tx-{}", stamp),
                "amount": -150.00,
                "merchant": format!("Mock Purchase {}", provider),
                "date": date,
                "currency": "ILS",
                "status": "SETTLED",
            },
            {
                "id": format!("tx-{}-2", stamp),
                "amount": -45.00,
                "merchant": "Coffee Shop",
                "date": date,
                "currency": "ILS",
                "status": "PENDING",
            },
        ]);
        serde_json::to_vec(&records).map_err(|e| FetchError::Other(e.to_string()))
    }
}
