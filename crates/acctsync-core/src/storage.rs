use time::OffsetDateTime;

use crate::{
    claim::ClaimCriteria,
    models::{Account, NewAccount, SnapshotHandle, Transaction},
    status::SyncStatus,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
    #[error("account not found: {0}")]
    AccountNotFound(String),
    #[error("account already exists: {0}")]
    AccountAlreadyExists(String),
    #[error("illegal sync status transition for {account_id}: {from} -> {to}")]
    IllegalTransition {
        account_id: String,
        from: SyncStatus,
        to: SyncStatus,
    },
    #[error("account id must be non-empty ASCII letters, digits, '-' or '_': {0:?}")]
    InvalidAccountId(String),
    #[error("accounts cannot be created in state {0}")]
    InvalidInitialStatus(SyncStatus),
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error("storage lock poisoned")]
    LockPoisoned,
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
    #[error("snapshot not found: {0}")]
    NotFound(String),
    #[error("snapshot already exists: {0}")]
    AlreadyExists(String),
    #[error("account id is not usable as a snapshot key: {0}")]
    InvalidAccountId(String),
    #[error("invalid snapshot handle: {0}")]
    InvalidHandle(String),
}

/// Transactional store of accounts and their normalized transactions.
///
/// Every status write is validated against [`SyncStatus::sources`]; an
/// illegal transition returns [`StorageError::IllegalTransition`] and leaves
/// the row untouched.
pub trait AccountStore: Send + Sync {
    // Provisioning
    fn insert_account(&self, account: &NewAccount) -> Result<Account, StorageError>;
    fn get_account(&self, id: &str) -> Result<Account, StorageError>;
    fn list_accounts(&self) -> Result<Vec<Account>, StorageError>;
    fn request_sync(&self, id: &str, priority: i32) -> Result<(), StorageError>;
    fn soft_delete_account(&self, id: &str, now: OffsetDateTime) -> Result<(), StorageError>;

    // Sync cycle

    /// Atomically moves up to `criteria.batch_size` eligible accounts to
    /// SYNCING, stamps `last_sync_attempt = criteria.now`, and returns the
    /// updated rows highest priority first. Concurrent callers never receive
    /// the same account.
    fn claim_eligible(&self, criteria: &ClaimCriteria) -> Result<Vec<Account>, StorageError>;
    fn mark_fetched(&self, id: &str, priority_reset: i32) -> Result<(), StorageError>;
    fn mark_failed(&self, id: &str, reason: &str) -> Result<(), StorageError>;
    fn finalize(&self, id: &str, new_cursor: OffsetDateTime, now: OffsetDateTime, priority_reset: i32) -> Result<(), StorageError>;

    // Transactions

    /// Insert-or-ignore on (account_id, provider_transaction_id). Returns the
    /// number of rows actually inserted.
    fn upsert_transactions(&self, batch: &[Transaction]) -> Result<usize, StorageError>;
    fn list_transactions(&self, account_id: &str) -> Result<Vec<Transaction>, StorageError>;
    fn count_transactions(&self, account_id: &str) -> Result<usize, StorageError>;
}

/// Write-once staging area for raw provider payloads.
pub trait SnapshotStore: Send + Sync {
    fn put(&self, account_id: &str, attempted_at: OffsetDateTime, bytes: &[u8]) -> Result<SnapshotHandle, SnapshotError>;
    fn get(&self, handle: &SnapshotHandle) -> Result<Vec<u8>, SnapshotError>;
}
