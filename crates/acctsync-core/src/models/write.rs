use rust_decimal::Decimal;
use time::OffsetDateTime;

use crate::{
    models::{job::is_safe_identifier, DEFAULT_PRIORITY},
    status::SyncStatus,
    storage::StorageError,
};

/// Provisioning/seeding command for a new account.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAccount {
    pub id: String,
    pub user_id: String,
    pub provider: String,
    pub external_account_id: String,
    pub balance: Decimal,
    pub currency: String,
    pub sync_status: SyncStatus,
    pub priority: i32,
    pub created_at: OffsetDateTime,
}

impl NewAccount {
    pub fn new(id: &str, user_id: &str, provider: &str, external_account_id: &str) -> Self {
        Self {
            id: id.to_string(),
            user_id: user_id.to_string(),
            provider: provider.to_string(),
            external_account_id: external_account_id.to_string(),
            balance: Decimal::ZERO,
            currency: String::new(),
            sync_status: SyncStatus::Idle,
            priority: DEFAULT_PRIORITY,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// Checks shared by every backend before the row is written. The id
    /// doubles as the snapshot directory name, so it must be a safe path
    /// segment.
    pub fn validate(&self) -> Result<(), StorageError> {
        if !is_safe_identifier(&self.id) {
            return Err(StorageError::InvalidAccountId(self.id.clone()));
        }
        if !self.sync_status.is_initial() {
            return Err(StorageError::InvalidInitialStatus(self.sync_status));
        }
        Ok(())
    }

    pub fn with_status(mut self, status: SyncStatus) -> Self {
        self.sync_status = status;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_currency(mut self, currency: &str) -> Self {
        self.currency = currency.to_string();
        self
    }

    pub fn with_balance(mut self, balance: Decimal) -> Self {
        self.balance = balance;
        self
    }
}
