use std::{
    str::FromStr,
    sync::{Mutex, MutexGuard},
};

use postgres::{error::SqlState, Client, NoTls, Row};
use rust_decimal::Decimal;
use time::OffsetDateTime;
use uuid::Uuid;

use acctsync_core::{
    Account, AccountStore, ClaimCriteria, NewAccount, StorageError, SyncStatus, Transaction,
};

const ACCOUNT_COLUMNS: &str = "id, user_id, provider, external_account_id, balance, currency, \
    sync_status, priority, last_synced_cursor, last_sync_attempt, last_updated_at, last_error, \
    created_at, deleted_at";

const TRANSACTION_COLUMNS: &str = "id, account_id, provider_transaction_id, amount, currency, \
    description, merchant_name, category, status, transaction_date, system_inserted_at";

pub struct PostgresAccountStore {
    // Only `None` while dropping.
    client: Option<Mutex<Client>>,
}

impl PostgresAccountStore {
    /// Connects with the blocking client. Call from a blocking context, not
    /// from inside an async task.
    pub fn new(connection_string: &str) -> Result<Self, StorageError> {
        let client = Client::connect(connection_string, NoTls)
            .map_err(|e| StorageError::Other(format!("PostgreSQL connection failed: {}", e)))?;

        let storage = Self {
            client: Some(Mutex::new(client)),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    fn client(&self) -> Result<MutexGuard<'_, Client>, StorageError> {
        self.client
            .as_ref()
            .ok_or_else(|| StorageError::Other("PostgreSQL connection closed".to_string()))?
            .lock()
            .map_err(|_| StorageError::LockPoisoned)
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        let mut client = self.client()?;
        client
            .batch_execute(
                "
            CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                provider TEXT NOT NULL,
                external_account_id TEXT NOT NULL,
                balance TEXT NOT NULL,
                currency TEXT NOT NULL,
                sync_status TEXT NOT NULL,
                priority INTEGER NOT NULL,
                last_synced_cursor TIMESTAMPTZ,
                last_sync_attempt TIMESTAMPTZ,
                last_updated_at TIMESTAMPTZ,
                last_error TEXT,
                created_at TIMESTAMPTZ NOT NULL,
                deleted_at TIMESTAMPTZ,
                UNIQUE (provider, external_account_id)
            );

            CREATE INDEX IF NOT EXISTS idx_pg_accounts_user
                ON accounts(user_id);

            CREATE INDEX IF NOT EXISTS idx_pg_accounts_claim
                ON accounts(sync_status, priority DESC);

            CREATE TABLE IF NOT EXISTS transactions (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL REFERENCES accounts(id),
                provider_transaction_id TEXT NOT NULL,
                amount TEXT NOT NULL,
                currency TEXT NOT NULL,
                description TEXT,
                merchant_name TEXT,
                category TEXT,
                status TEXT,
                transaction_date TIMESTAMPTZ NOT NULL,
                system_inserted_at TIMESTAMPTZ NOT NULL,
                UNIQUE (account_id, provider_transaction_id)
            );

            CREATE INDEX IF NOT EXISTS idx_pg_transactions_account_date
                ON transactions(account_id, transaction_date);
            ",
            )
            .map_err(other)?;
        Ok(())
    }

    /// Validates and applies one status transition with the row locked.
    fn transition<F>(&self, id: &str, to: SyncStatus, apply: F) -> Result<(), StorageError>
    where
        F: FnOnce(&mut postgres::Transaction<'_>) -> Result<u64, postgres::Error>,
    {
        let mut client = self.client()?;
        let mut tx = client.transaction().map_err(other)?;

        let row = tx
            .query_opt("SELECT sync_status FROM accounts WHERE id = $1 FOR UPDATE", &[&id])
            .map_err(other)?
            .ok_or_else(|| StorageError::AccountNotFound(id.to_string()))?;
        let current: String = row.try_get(0).map_err(other)?;
        SyncStatus::from_str(&current)?.transition(id, to)?;

        apply(&mut tx).map_err(other)?;
        tx.commit().map_err(other)?;
        tracing::debug!(account_id = id, from = %current, to = %to, "PostgreSQL account transitioned");
        Ok(())
    }
}

/// The blocking client closes its connection by driving its own runtime,
/// which panics on a thread that is already inside one. The last handle to
/// the store is usually released by an async task, so the client is always
/// closed on a thread of its own.
impl Drop for PostgresAccountStore {
    fn drop(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };
        let closed = std::thread::Builder::new()
            .name("acctsync-pg-close".to_string())
            .spawn(move || drop(client))
            .map(|handle| handle.join().is_ok());
        match closed {
            Ok(true) => tracing::debug!("PostgreSQL connection closed"),
            Ok(false) => tracing::warn!("PostgreSQL connection did not close cleanly"),
            Err(e) => tracing::warn!(error = %e, "Could not start PostgreSQL close thread"),
        }
    }
}

fn other(e: postgres::Error) -> StorageError {
    StorageError::Other(e.to_string())
}

fn row_to_account(row: &Row) -> Result<Account, StorageError> {
    let id: String = row.try_get("id").map_err(other)?;
    let balance: String = row.try_get("balance").map_err(other)?;
    let status: String = row.try_get("sync_status").map_err(other)?;
    Ok(Account {
        balance: Decimal::from_str(&balance)
            .map_err(|e| StorageError::Corrupt(format!("invalid balance for {}: {}", id, e)))?,
        sync_status: SyncStatus::from_str(&status)?,
        user_id: row.try_get("user_id").map_err(other)?,
        provider: row.try_get("provider").map_err(other)?,
        external_account_id: row.try_get("external_account_id").map_err(other)?,
        currency: row.try_get("currency").map_err(other)?,
        priority: row.try_get("priority").map_err(other)?,
        last_synced_cursor: row.try_get("last_synced_cursor").map_err(other)?,
        last_sync_attempt: row.try_get("last_sync_attempt").map_err(other)?,
        last_updated_at: row.try_get("last_updated_at").map_err(other)?,
        last_error: row.try_get("last_error").map_err(other)?,
        created_at: row.try_get("created_at").map_err(other)?,
        deleted_at: row.try_get("deleted_at").map_err(other)?,
        id,
    })
}

fn row_to_transaction(row: &Row) -> Result<Transaction, StorageError> {
    let id: String = row.try_get("id").map_err(other)?;
    let amount: String = row.try_get("amount").map_err(other)?;
    Ok(Transaction {
        id: Uuid::parse_str(&id)
            .map_err(|e| StorageError::Corrupt(format!("invalid transaction id {}: {}", id, e)))?,
        amount: Decimal::from_str(&amount)
            .map_err(|e| StorageError::Corrupt(format!("invalid amount for {}: {}", id, e)))?,
        account_id: row.try_get("account_id").map_err(other)?,
        provider_transaction_id: row.try_get("provider_transaction_id").map_err(other)?,
        currency: row.try_get("currency").map_err(other)?,
        description: row.try_get("description").map_err(other)?,
        merchant_name: row.try_get("merchant_name").map_err(other)?,
        category: row.try_get("category").map_err(other)?,
        status: row.try_get("status").map_err(other)?,
        transaction_date: row.try_get("transaction_date").map_err(other)?,
        system_inserted_at: row.try_get("system_inserted_at").map_err(other)?,
    })
}

impl AccountStore for PostgresAccountStore {
    fn insert_account(&self, account: &NewAccount) -> Result<Account, StorageError> {
        account.validate()?;
        let mut client = self.client()?;
        let row = client
            .query_one(
                &format!(
                    "INSERT INTO accounts (id, user_id, provider, external_account_id, balance, currency, sync_status, priority, created_at)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                     RETURNING {}",
                    ACCOUNT_COLUMNS
                ),
                &[
                    &account.id,
                    &account.user_id,
                    &account.provider,
                    &account.external_account_id,
                    &account.balance.to_string(),
                    &account.currency,
                    &account.sync_status.as_str(),
                    &account.priority,
                    &account.created_at,
                ],
            )
            .map_err(|e| {
                if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
                    StorageError::AccountAlreadyExists(account.id.clone())
                } else {
                    other(e)
                }
            })?;
        row_to_account(&row)
    }

    fn get_account(&self, id: &str) -> Result<Account, StorageError> {
        let mut client = self.client()?;
        let row = client
            .query_opt(&format!("SELECT {} FROM accounts WHERE id = $1", ACCOUNT_COLUMNS), &[&id])
            .map_err(other)?
            .ok_or_else(|| StorageError::AccountNotFound(id.to_string()))?;
        row_to_account(&row)
    }

    fn list_accounts(&self) -> Result<Vec<Account>, StorageError> {
        let mut client = self.client()?;
        let rows = client
            .query(&format!("SELECT {} FROM accounts ORDER BY id", ACCOUNT_COLUMNS), &[])
            .map_err(other)?;
        rows.iter().map(row_to_account).collect()
    }

    fn request_sync(&self, id: &str, priority: i32) -> Result<(), StorageError> {
        self.transition(id, SyncStatus::PendingSync, |tx| {
            tx.execute(
                "UPDATE accounts SET sync_status = $1, priority = $2 WHERE id = $3",
                &[&SyncStatus::PendingSync.as_str(), &priority, &id],
            )
        })
    }

    fn soft_delete_account(&self, id: &str, now: OffsetDateTime) -> Result<(), StorageError> {
        let mut client = self.client()?;
        let updated = client
            .execute(
                "UPDATE accounts SET deleted_at = COALESCE(deleted_at, $1) WHERE id = $2",
                &[&now, &id],
            )
            .map_err(other)?;
        if updated == 0 {
            return Err(StorageError::AccountNotFound(id.to_string()));
        }
        Ok(())
    }

    fn claim_eligible(&self, criteria: &ClaimCriteria) -> Result<Vec<Account>, StorageError> {
        if criteria.batch_size == 0 {
            return Ok(Vec::new());
        }
        let limit = i64::try_from(criteria.batch_size).unwrap_or(i64::MAX);
        let mut client = self.client()?;

        // One statement: SKIP LOCKED lets concurrent claimers pass over rows
        // another claimer is already moving to SYNCING.
        let rows = client
            .query(
                &format!(
                    "UPDATE accounts
                     SET sync_status = 'SYNCING', last_sync_attempt = $1, last_error = NULL
                     WHERE id IN (
                         SELECT id FROM accounts
                         WHERE deleted_at IS NULL AND (
                                sync_status = 'PENDING_SYNC'
                             OR (sync_status = 'IDLE' AND (last_updated_at IS NULL OR last_updated_at < $2))
                             OR (sync_status = 'SYNCING' AND (last_sync_attempt IS NULL OR last_sync_attempt < $3))
                             OR (sync_status = 'FAILED' AND $4::timestamptz IS NOT NULL
                                 AND (last_sync_attempt IS NULL OR last_sync_attempt < $4::timestamptz))
                             OR (sync_status = 'FETCHED' AND $5::timestamptz IS NOT NULL
                                 AND (last_sync_attempt IS NULL OR last_sync_attempt < $5::timestamptz))
                         )
                         ORDER BY priority DESC, id ASC
                         LIMIT $6
                         FOR UPDATE SKIP LOCKED
                     )
                     RETURNING {}",
                    ACCOUNT_COLUMNS
                ),
                &[
                    &criteria.now,
                    &criteria.idle_before,
                    &criteria.zombie_before,
                    &criteria.failed_before,
                    &criteria.fetched_before,
                    &limit,
                ],
            )
            .map_err(other)?;

        let mut claimed = rows.iter().map(row_to_account).collect::<Result<Vec<_>, _>>()?;
        // RETURNING carries no ordering guarantee.
        claimed.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
        tracing::debug!(claimed = claimed.len(), "PostgreSQL accounts claimed");
        Ok(claimed)
    }

    fn mark_fetched(&self, id: &str, priority_reset: i32) -> Result<(), StorageError> {
        self.transition(id, SyncStatus::Fetched, |tx| {
            tx.execute(
                "UPDATE accounts SET sync_status = $1, priority = $2 WHERE id = $3",
                &[&SyncStatus::Fetched.as_str(), &priority_reset, &id],
            )
        })
    }

    fn mark_failed(&self, id: &str, reason: &str) -> Result<(), StorageError> {
        self.transition(id, SyncStatus::Failed, |tx| {
            tx.execute(
                "UPDATE accounts SET sync_status = $1, last_error = $2 WHERE id = $3",
                &[&SyncStatus::Failed.as_str(), &reason, &id],
            )
        })
    }

    fn finalize(&self, id: &str, new_cursor: OffsetDateTime, now: OffsetDateTime, priority_reset: i32) -> Result<(), StorageError> {
        self.transition(id, SyncStatus::Idle, |tx| {
            tx.execute(
                "UPDATE accounts
                 SET sync_status = $1, last_synced_cursor = $2, last_updated_at = $3, priority = $4
                 WHERE id = $5",
                &[&SyncStatus::Idle.as_str(), &new_cursor, &now, &priority_reset, &id],
            )
        })
    }

    fn upsert_transactions(&self, batch: &[Transaction]) -> Result<usize, StorageError> {
        if batch.is_empty() {
            return Ok(0);
        }
        let mut client = self.client()?;
        let mut tx = client.transaction().map_err(other)?;

        let mut account_ids: Vec<&str> = batch.iter().map(|t| t.account_id.as_str()).collect();
        account_ids.sort_unstable();
        account_ids.dedup();
        for account_id in account_ids {
            if tx
                .query_opt("SELECT 1 FROM accounts WHERE id = $1", &[&account_id])
                .map_err(other)?
                .is_none()
            {
                return Err(StorageError::AccountNotFound(account_id.to_string()));
            }
        }

        let stmt = tx
            .prepare(&format!(
                "INSERT INTO transactions ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                 ON CONFLICT (account_id, provider_transaction_id) DO NOTHING",
                TRANSACTION_COLUMNS
            ))
            .map_err(other)?;

        let mut inserted = 0;
        for txn in batch {
            inserted += tx
                .execute(
                    &stmt,
                    &[
                        &txn.id.to_string(),
                        &txn.account_id,
                        &txn.provider_transaction_id,
                        &txn.amount.to_string(),
                        &txn.currency,
                        &txn.description,
                        &txn.merchant_name,
                        &txn.category,
                        &txn.status,
                        &txn.transaction_date,
                        &txn.system_inserted_at,
                    ],
                )
                .map_err(other)? as usize;
        }
        tx.commit().map_err(other)?;

        tracing::debug!(received = batch.len(), inserted, "PostgreSQL transactions upserted");
        Ok(inserted)
    }

    fn list_transactions(&self, account_id: &str) -> Result<Vec<Transaction>, StorageError> {
        let mut client = self.client()?;
        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM transactions WHERE account_id = $1 ORDER BY transaction_date, provider_transaction_id",
                    TRANSACTION_COLUMNS
                ),
                &[&account_id],
            )
            .map_err(other)?;
        rows.iter().map(row_to_transaction).collect()
    }

    fn count_transactions(&self, account_id: &str) -> Result<usize, StorageError> {
        let mut client = self.client()?;
        let row = client
            .query_one("SELECT COUNT(*) FROM transactions WHERE account_id = $1", &[&account_id])
            .map_err(other)?;
        let count: i64 = row.try_get(0).map_err(other)?;
        Ok(count as usize)
    }
}
