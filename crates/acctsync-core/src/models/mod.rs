use rust_decimal::Decimal;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::status::SyncStatus;

pub mod job;
pub mod write;

pub use job::{SnapshotHandle, SyncJob};
pub use write::NewAccount;

/// Priority an account drops back to once a sync cycle has been served.
pub const DEFAULT_PRIORITY: i32 = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub id: String,
    pub user_id: String,
    pub provider: String,
    pub external_account_id: String,
    pub balance: Decimal,
    pub currency: String,

    pub sync_status: SyncStatus,
    pub priority: i32,
    /// Exclusive upper bound of data already ingested.
    pub last_synced_cursor: Option<OffsetDateTime>,
    pub last_sync_attempt: Option<OffsetDateTime>,
    /// Last successful normalization.
    pub last_updated_at: Option<OffsetDateTime>,
    pub last_error: Option<String>,

    pub created_at: OffsetDateTime,
    pub deleted_at: Option<OffsetDateTime>,
}

impl Account {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// A normalized provider transaction. Never mutated after insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub id: Uuid,
    pub account_id: String,
    pub provider_transaction_id: String,
    /// Negative for debits.
    pub amount: Decimal,
    pub currency: String,
    pub description: Option<String>,
    pub merchant_name: Option<String>,
    pub category: Option<String>,
    pub status: Option<String>,
    /// Business time reported by the provider.
    pub transaction_date: OffsetDateTime,
    pub system_inserted_at: OffsetDateTime,
}

impl Transaction {
    /// Deduplication key.
    pub fn natural_key(&self) -> (&str, &str) {
        (&self.account_id, &self.provider_transaction_id)
    }
}
