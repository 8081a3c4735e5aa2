//! In-memory storage backend for acctsync.
//!
//! Suitable for tests and demo runs. A single write lock over the account map
//! makes every claim atomic with respect to other claims in the process.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use time::OffsetDateTime;

use acctsync_core::{
    Account, AccountStore, ClaimCriteria, NewAccount, SnapshotError, SnapshotHandle,
    SnapshotStore, StorageError, SyncStatus, Transaction,
};

type NaturalKey = (String, String);

pub struct InMemoryAccountStore {
    accounts: RwLock<BTreeMap<String, Account>>,
    transactions: RwLock<BTreeMap<NaturalKey, Transaction>>,
}

impl Default for InMemoryAccountStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self {
            accounts: RwLock::new(BTreeMap::new()),
            transactions: RwLock::new(BTreeMap::new()),
        }
    }

    fn read_accounts(&self) -> Result<RwLockReadGuard<'_, BTreeMap<String, Account>>, StorageError> {
        self.accounts.read().map_err(|_| StorageError::LockPoisoned)
    }

    fn write_accounts(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<String, Account>>, StorageError> {
        self.accounts.write().map_err(|_| StorageError::LockPoisoned)
    }

    fn update_status<F>(&self, id: &str, to: SyncStatus, apply: F) -> Result<(), StorageError>
    where
        F: FnOnce(&mut Account),
    {
        let mut accounts = self.write_accounts()?;
        let account = accounts
            .get_mut(id)
            .ok_or_else(|| StorageError::AccountNotFound(id.to_string()))?;
        account.sync_status = account.sync_status.transition(id, to)?;
        apply(account);
        Ok(())
    }
}

impl AccountStore for InMemoryAccountStore {
    fn insert_account(&self, account: &NewAccount) -> Result<Account, StorageError> {
        account.validate()?;
        let mut accounts = self.write_accounts()?;
        let duplicate = accounts.contains_key(&account.id)
            || accounts.values().any(|a| {
                a.provider == account.provider && a.external_account_id == account.external_account_id
            });
        if duplicate {
            return Err(StorageError::AccountAlreadyExists(account.id.clone()));
        }

        let row = Account {
            id: account.id.clone(),
            user_id: account.user_id.clone(),
            provider: account.provider.clone(),
            external_account_id: account.external_account_id.clone(),
            balance: account.balance,
            currency: account.currency.clone(),
            sync_status: account.sync_status,
            priority: account.priority,
            last_synced_cursor: None,
            last_sync_attempt: None,
            last_updated_at: None,
            last_error: None,
            created_at: account.created_at,
            deleted_at: None,
        };
        accounts.insert(row.id.clone(), row.clone());
        Ok(row)
    }

    fn get_account(&self, id: &str) -> Result<Account, StorageError> {
        self.read_accounts()?
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::AccountNotFound(id.to_string()))
    }

    fn list_accounts(&self) -> Result<Vec<Account>, StorageError> {
        Ok(self.read_accounts()?.values().cloned().collect())
    }

    fn request_sync(&self, id: &str, priority: i32) -> Result<(), StorageError> {
        self.update_status(id, SyncStatus::PendingSync, |a| a.priority = priority)
    }

    fn soft_delete_account(&self, id: &str, now: OffsetDateTime) -> Result<(), StorageError> {
        let mut accounts = self.write_accounts()?;
        let account = accounts
            .get_mut(id)
            .ok_or_else(|| StorageError::AccountNotFound(id.to_string()))?;
        account.deleted_at.get_or_insert(now);
        Ok(())
    }

    fn claim_eligible(&self, criteria: &ClaimCriteria) -> Result<Vec<Account>, StorageError> {
        let mut accounts = self.write_accounts()?;
        let ids: Vec<String> = criteria
            .select(accounts.values())
            .into_iter()
            .map(|a| a.id.clone())
            .collect();

        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(account) = accounts.get_mut(&id) {
                account.sync_status = account.sync_status.transition(&id, SyncStatus::Syncing)?;
                account.last_sync_attempt = Some(criteria.now);
                account.last_error = None;
                claimed.push(account.clone());
            }
        }
        tracing::debug!(claimed = claimed.len(), "Accounts claimed");
        Ok(claimed)
    }

    fn mark_fetched(&self, id: &str, priority_reset: i32) -> Result<(), StorageError> {
        self.update_status(id, SyncStatus::Fetched, |a| a.priority = priority_reset)
    }

    fn mark_failed(&self, id: &str, reason: &str) -> Result<(), StorageError> {
        self.update_status(id, SyncStatus::Failed, |a| a.last_error = Some(reason.to_string()))
    }

    fn finalize(&self, id: &str, new_cursor: OffsetDateTime, now: OffsetDateTime, priority_reset: i32) -> Result<(), StorageError> {
        self.update_status(id, SyncStatus::Idle, |a| {
            a.last_synced_cursor = Some(new_cursor);
            a.last_updated_at = Some(now);
            a.priority = priority_reset;
        })
    }

    fn upsert_transactions(&self, batch: &[Transaction]) -> Result<usize, StorageError> {
        let accounts = self.read_accounts()?;
        if let Some(missing) = batch.iter().find(|t| !accounts.contains_key(&t.account_id)) {
            return Err(StorageError::AccountNotFound(missing.account_id.clone()));
        }

        let mut transactions = self.transactions.write().map_err(|_| StorageError::LockPoisoned)?;
        let mut inserted = 0;
        for txn in batch {
            let key = (txn.account_id.clone(), txn.provider_transaction_id.clone());
            if !transactions.contains_key(&key) {
                transactions.insert(key, txn.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    fn list_transactions(&self, account_id: &str) -> Result<Vec<Transaction>, StorageError> {
        let transactions = self.transactions.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut result: Vec<Transaction> = transactions
            .values()
            .filter(|t| t.account_id == account_id)
            .cloned()
            .collect();
        result.sort_by(|a, b| {
            a.transaction_date
                .cmp(&b.transaction_date)
                .then_with(|| a.provider_transaction_id.cmp(&b.provider_transaction_id))
        });
        Ok(result)
    }

    fn count_transactions(&self, account_id: &str) -> Result<usize, StorageError> {
        let transactions = self.transactions.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(transactions.keys().filter(|(a, _)| a == account_id).count())
    }
}

#[derive(Default)]
pub struct InMemorySnapshotStore {
    blobs: RwLock<HashMap<SnapshotHandle, Vec<u8>>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().map(|b| b.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn put(&self, account_id: &str, attempted_at: OffsetDateTime, bytes: &[u8]) -> Result<SnapshotHandle, SnapshotError> {
        let handle = SnapshotHandle::for_attempt(account_id, attempted_at)?;
        let mut blobs = self
            .blobs
            .write()
            .map_err(|_| SnapshotError::Other("snapshot lock poisoned".to_string()))?;
        if blobs.contains_key(&handle) {
            return Err(SnapshotError::AlreadyExists(handle.to_string()));
        }
        blobs.insert(handle.clone(), bytes.to_vec());
        Ok(handle)
    }

    fn get(&self, handle: &SnapshotHandle) -> Result<Vec<u8>, SnapshotError> {
        self.blobs
            .read()
            .map_err(|_| SnapshotError::Other("snapshot lock poisoned".to_string()))?
            .get(handle)
            .cloned()
            .ok_or_else(|| SnapshotError::NotFound(handle.to_string()))
    }
}
