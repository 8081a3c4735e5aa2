use std::{
    collections::BTreeSet,
    str::FromStr,
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use rust_decimal::Decimal;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use time::OffsetDateTime;
use uuid::Uuid;

use acctsync_core::{
    timestamp::{from_unix_nanos, opt_from_unix_nanos, opt_to_unix_nanos, to_unix_nanos},
    Account, AccountStore, ClaimCriteria, NewAccount, StorageError, SyncStatus, Transaction,
};

const ACCOUNT_COLUMNS: &str = "id, user_id, provider, external_account_id, balance, currency, \
    sync_status, priority, last_synced_cursor, last_sync_attempt, last_updated_at, last_error, \
    created_at, deleted_at";

const TRANSACTION_COLUMNS: &str = "id, account_id, provider_transaction_id, amount, currency, \
    description, merchant_name, category, status, transaction_date, system_inserted_at";

// ?1 idle_before, ?2 zombie_before, ?3 failed_before, ?4 fetched_before, ?5 limit
const CLAIM_SELECT: &str = "
    SELECT id FROM accounts
    WHERE deleted_at IS NULL AND (
           sync_status = 'PENDING_SYNC'
        OR (sync_status = 'IDLE' AND (last_updated_at IS NULL OR last_updated_at < ?1))
        OR (sync_status = 'SYNCING' AND (last_sync_attempt IS NULL OR last_sync_attempt < ?2))
        OR (sync_status = 'FAILED' AND ?3 IS NOT NULL AND (last_sync_attempt IS NULL OR last_sync_attempt < ?3))
        OR (sync_status = 'FETCHED' AND ?4 IS NOT NULL AND (last_sync_attempt IS NULL OR last_sync_attempt < ?4))
    )
    ORDER BY priority DESC, id ASC
    LIMIT ?5";

pub struct SqliteAccountStore {
    conn: Mutex<Connection>,
}

impl SqliteAccountStore {
    pub fn new(path: &str) -> Result<Self, StorageError> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(path)
        }
        .map_err(other)?;

        conn.busy_timeout(Duration::from_secs(5)).map_err(other)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(other)?;

        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.init_schema()?;
        tracing::debug!(path, "SQLite account store opened");
        Ok(storage)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.conn()?;
        conn.execute_batch(
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
                last_synced_cursor INTEGER,
                last_sync_attempt INTEGER,
                last_updated_at INTEGER,
                last_error TEXT,
                created_at INTEGER NOT NULL,
                deleted_at INTEGER,
                UNIQUE (provider, external_account_id)
            );

            CREATE INDEX IF NOT EXISTS idx_accounts_user
                ON accounts(user_id);

            CREATE INDEX IF NOT EXISTS idx_accounts_claim
                ON accounts(sync_status, priority);

            CREATE TABLE IF NOT EXISTS transactions (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                provider_transaction_id TEXT NOT NULL,
                amount TEXT NOT NULL,
                currency TEXT NOT NULL,
                description TEXT,
                merchant_name TEXT,
                category TEXT,
                status TEXT,
                transaction_date INTEGER NOT NULL,
                system_inserted_at INTEGER NOT NULL,
                UNIQUE (account_id, provider_transaction_id),
                FOREIGN KEY (account_id) REFERENCES accounts(id)
            );

            CREATE INDEX IF NOT EXISTS idx_transactions_account_date
                ON transactions(account_id, transaction_date);
            ",
        )
        .map_err(other)?;
        Ok(())
    }

    /// Validates and applies one status transition inside an immediate transaction.
    fn transition<F>(&self, id: &str, to: SyncStatus, apply: F) -> Result<(), StorageError>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<usize>,
    {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(other)?;

        let current: String = tx
            .query_row("SELECT sync_status FROM accounts WHERE id = ?1", params![id], |row| row.get(0))
            .map_err(|e| not_found_or(e, id))?;
        SyncStatus::from_str(&current)?.transition(id, to)?;

        apply(&tx).map_err(other)?;
        tx.commit().map_err(other)?;
        tracing::debug!(account_id = id, from = %current, to = %to, "SQLite account transitioned");
        Ok(())
    }
}

fn other(e: rusqlite::Error) -> StorageError {
    StorageError::Other(e.to_string())
}

fn not_found_or(e: rusqlite::Error, id: &str) -> StorageError {
    match e {
        rusqlite::Error::QueryReturnedNoRows => StorageError::AccountNotFound(id.to_string()),
        e => other(e),
    }
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation)
}

struct AccountRow {
    id: String,
    user_id: String,
    provider: String,
    external_account_id: String,
    balance: String,
    currency: String,
    sync_status: String,
    priority: i32,
    last_synced_cursor: Option<i64>,
    last_sync_attempt: Option<i64>,
    last_updated_at: Option<i64>,
    last_error: Option<String>,
    created_at: i64,
    deleted_at: Option<i64>,
}

impl AccountRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            provider: row.get(2)?,
            external_account_id: row.get(3)?,
            balance: row.get(4)?,
            currency: row.get(5)?,
            sync_status: row.get(6)?,
            priority: row.get(7)?,
            last_synced_cursor: row.get(8)?,
            last_sync_attempt: row.get(9)?,
            last_updated_at: row.get(10)?,
            last_error: row.get(11)?,
            created_at: row.get(12)?,
            deleted_at: row.get(13)?,
        })
    }

    fn into_account(self) -> Result<Account, StorageError> {
        Ok(Account {
            balance: Decimal::from_str(&self.balance)
                .map_err(|e| StorageError::Corrupt(format!("invalid balance for {}: {}", self.id, e)))?,
            sync_status: SyncStatus::from_str(&self.sync_status)?,
            last_synced_cursor: opt_from_unix_nanos(self.last_synced_cursor)?,
            last_sync_attempt: opt_from_unix_nanos(self.last_sync_attempt)?,
            last_updated_at: opt_from_unix_nanos(self.last_updated_at)?,
            created_at: from_unix_nanos(self.created_at)?,
            deleted_at: opt_from_unix_nanos(self.deleted_at)?,
            id: self.id,
            user_id: self.user_id,
            provider: self.provider,
            external_account_id: self.external_account_id,
            currency: self.currency,
            priority: self.priority,
            last_error: self.last_error,
        })
    }
}

struct TransactionRow {
    id: String,
    account_id: String,
    provider_transaction_id: String,
    amount: String,
    currency: String,
    description: Option<String>,
    merchant_name: Option<String>,
    category: Option<String>,
    status: Option<String>,
    transaction_date: i64,
    system_inserted_at: i64,
}

impl TransactionRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            account_id: row.get(1)?,
            provider_transaction_id: row.get(2)?,
            amount: row.get(3)?,
            currency: row.get(4)?,
            description: row.get(5)?,
            merchant_name: row.get(6)?,
            category: row.get(7)?,
            status: row.get(8)?,
            transaction_date: row.get(9)?,
            system_inserted_at: row.get(10)?,
        })
    }

    fn into_transaction(self) -> Result<Transaction, StorageError> {
        Ok(Transaction {
            id: Uuid::parse_str(&self.id)
                .map_err(|e| StorageError::Corrupt(format!("invalid transaction id {}: {}", self.id, e)))?,
            amount: Decimal::from_str(&self.amount)
                .map_err(|e| StorageError::Corrupt(format!("invalid amount for {}: {}", self.id, e)))?,
            transaction_date: from_unix_nanos(self.transaction_date)?,
            system_inserted_at: from_unix_nanos(self.system_inserted_at)?,
            account_id: self.account_id,
            provider_transaction_id: self.provider_transaction_id,
            currency: self.currency,
            description: self.description,
            merchant_name: self.merchant_name,
            category: self.category,
            status: self.status,
        })
    }
}

fn load_account(conn: &Connection, id: &str) -> Result<Account, StorageError> {
    conn.query_row(
        &format!("SELECT {} FROM accounts WHERE id = ?1", ACCOUNT_COLUMNS),
        params![id],
        AccountRow::from_row,
    )
    .map_err(|e| not_found_or(e, id))?
    .into_account()
}

impl AccountStore for SqliteAccountStore {
    fn insert_account(&self, account: &NewAccount) -> Result<Account, StorageError> {
        account.validate()?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO accounts (id, user_id, provider, external_account_id, balance, currency, sync_status, priority, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                account.id,
                account.user_id,
                account.provider,
                account.external_account_id,
                account.balance.to_string(),
                account.currency,
                account.sync_status.as_str(),
                account.priority,
                to_unix_nanos(account.created_at)?,
            ],
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                StorageError::AccountAlreadyExists(account.id.clone())
            } else {
                other(e)
            }
        })?;
        load_account(&conn, &account.id)
    }

    fn get_account(&self, id: &str) -> Result<Account, StorageError> {
        let conn = self.conn()?;
        load_account(&conn, id)
    }

    fn list_accounts(&self) -> Result<Vec<Account>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!("SELECT {} FROM accounts ORDER BY id", ACCOUNT_COLUMNS))
            .map_err(other)?;
        let rows = stmt.query_map([], AccountRow::from_row).map_err(other)?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row.map_err(other)?.into_account()?);
        }
        Ok(result)
    }

    fn request_sync(&self, id: &str, priority: i32) -> Result<(), StorageError> {
        self.transition(id, SyncStatus::PendingSync, |conn| {
            conn.execute(
                "UPDATE accounts SET sync_status = ?1, priority = ?2 WHERE id = ?3",
                params![SyncStatus::PendingSync.as_str(), priority, id],
            )
        })
    }

    fn soft_delete_account(&self, id: &str, now: OffsetDateTime) -> Result<(), StorageError> {
        let conn = self.conn()?;
        let updated = conn
            .execute(
                "UPDATE accounts SET deleted_at = COALESCE(deleted_at, ?1) WHERE id = ?2",
                params![to_unix_nanos(now)?, id],
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
        let now = to_unix_nanos(criteria.now)?;
        let idle_before = to_unix_nanos(criteria.idle_before)?;
        let zombie_before = to_unix_nanos(criteria.zombie_before)?;
        let failed_before = opt_to_unix_nanos(criteria.failed_before)?;
        let fetched_before = opt_to_unix_nanos(criteria.fetched_before)?;
        let limit = i64::try_from(criteria.batch_size).unwrap_or(i64::MAX);

        let mut conn = self.conn()?;
        // IMMEDIATE takes the write lock up front, so a second process claiming
        // against the same file waits instead of reading the same candidates.
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(other)?;

        let ids: Vec<String> = {
            let mut stmt = tx.prepare(CLAIM_SELECT).map_err(other)?;
            let rows = stmt
                .query_map(
                    params![idle_before, zombie_before, failed_before, fetched_before, limit],
                    |row| row.get(0),
                )
                .map_err(other)?;
            rows.collect::<Result<_, _>>().map_err(other)?
        };

        for id in &ids {
            tx.execute(
                "UPDATE accounts SET sync_status = ?1, last_sync_attempt = ?2, last_error = NULL WHERE id = ?3",
                params![SyncStatus::Syncing.as_str(), now, id],
            )
            .map_err(other)?;
        }

        let mut claimed = Vec::with_capacity(ids.len());
        for id in &ids {
            claimed.push(load_account(&tx, id)?);
        }
        tx.commit().map_err(other)?;

        tracing::debug!(claimed = claimed.len(), "SQLite accounts claimed");
        Ok(claimed)
    }

    fn mark_fetched(&self, id: &str, priority_reset: i32) -> Result<(), StorageError> {
        self.transition(id, SyncStatus::Fetched, |conn| {
            conn.execute(
                "UPDATE accounts SET sync_status = ?1, priority = ?2 WHERE id = ?3",
                params![SyncStatus::Fetched.as_str(), priority_reset, id],
            )
        })
    }

    fn mark_failed(&self, id: &str, reason: &str) -> Result<(), StorageError> {
        self.transition(id, SyncStatus::Failed, |conn| {
            conn.execute(
                "UPDATE accounts SET sync_status = ?1, last_error = ?2 WHERE id = ?3",
                params![SyncStatus::Failed.as_str(), reason, id],
            )
        })
    }

    fn finalize(&self, id: &str, new_cursor: OffsetDateTime, now: OffsetDateTime, priority_reset: i32) -> Result<(), StorageError> {
        let cursor = to_unix_nanos(new_cursor)?;
        let now = to_unix_nanos(now)?;
        self.transition(id, SyncStatus::Idle, |conn| {
            conn.execute(
                "UPDATE accounts
                 SET sync_status = ?1, last_synced_cursor = ?2, last_updated_at = ?3, priority = ?4
                 WHERE id = ?5",
                params![SyncStatus::Idle.as_str(), cursor, now, priority_reset, id],
            )
        })
    }

    fn upsert_transactions(&self, batch: &[Transaction]) -> Result<usize, StorageError> {
        if batch.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(other)?;

        let account_ids: BTreeSet<&str> = batch.iter().map(|t| t.account_id.as_str()).collect();
        for account_id in account_ids {
            let exists = tx
                .query_row("SELECT 1 FROM accounts WHERE id = ?1", params![account_id], |_| Ok(()))
                .optional()
                .map_err(other)?;
            if exists.is_none() {
                return Err(StorageError::AccountNotFound(account_id.to_string()));
            }
        }

        let mut inserted = 0;
        {
            let mut stmt = tx
                .prepare(&format!(
                    "INSERT OR IGNORE INTO transactions ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    TRANSACTION_COLUMNS
                ))
                .map_err(other)?;
            for txn in batch {
                inserted += stmt
                    .execute(params![
                        txn.id.to_string(),
                        txn.account_id,
                        txn.provider_transaction_id,
                        txn.amount.to_string(),
                        txn.currency,
                        txn.description,
                        txn.merchant_name,
                        txn.category,
                        txn.status,
                        to_unix_nanos(txn.transaction_date)?,
                        to_unix_nanos(txn.system_inserted_at)?,
                    ])
                    .map_err(other)?;
            }
        }
        tx.commit().map_err(other)?;

        tracing::debug!(received = batch.len(), inserted, "SQLite transactions upserted");
        Ok(inserted)
    }

    fn list_transactions(&self, account_id: &str) -> Result<Vec<Transaction>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM transactions WHERE account_id = ?1 ORDER BY transaction_date, provider_transaction_id",
                TRANSACTION_COLUMNS
            ))
            .map_err(other)?;
        let rows = stmt
            .query_map(params![account_id], TransactionRow::from_row)
            .map_err(other)?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row.map_err(other)?.into_transaction()?);
        }
        Ok(result)
    }

    fn count_transactions(&self, account_id: &str) -> Result<usize, StorageError> {
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM transactions WHERE account_id = ?1",
                params![account_id],
                |row| row.get(0),
            )
            .map_err(other)?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};

    use acctsync_core::EligibilityPolicy;
    use time::Duration as TimeDuration;

    fn now() -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_760_000_000).unwrap()
    }

    fn pending(id: &str, priority: i32) -> NewAccount {
        NewAccount::new(id, "user-1", "bank_leumi", &format!("ext-{}", id))
            .with_status(SyncStatus::PendingSync)
            .with_priority(priority)
            .with_currency("ILS")
    }

    fn txn(account_id: &str, provider_id: &str) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            account_id: account_id.to_string(),
            provider_transaction_id: provider_id.to_string(),
            amount: Decimal::new(-4550, 2),
            currency: "ILS".to_string(),
            description: Some("Coffee".to_string()),
            merchant_name: Some("Coffee Shop".to_string()),
            category: Some("Food".to_string()),
            status: Some("PENDING".to_string()),
            transaction_date: now() - TimeDuration::days(1),
            system_inserted_at: now(),
        }
    }

    #[test]
    fn test_sqlite_account_round_trip() {
        let storage = SqliteAccountStore::new(":memory:").unwrap();
        let created = storage.insert_account(&pending("acc-1", 100).with_balance(Decimal::new(12345, 2))).unwrap();
        assert_eq!(created.sync_status, SyncStatus::PendingSync);
        assert_eq!(created.priority, 100);
        assert_eq!(created.balance, Decimal::new(12345, 2));
        assert_eq!(storage.get_account("acc-1").unwrap(), created);
        assert!(matches!(storage.get_account("nope"), Err(StorageError::AccountNotFound(_))));
    }

    #[test]
    fn test_sqlite_duplicate_external_id() {
        let storage = SqliteAccountStore::new(":memory:").unwrap();
        storage.insert_account(&pending("acc-1", 10)).unwrap();
        let dup = NewAccount::new("acc-2", "user-2", "bank_leumi", "ext-acc-1");
        assert!(matches!(storage.insert_account(&dup), Err(StorageError::AccountAlreadyExists(_))));
    }

    #[test]
    fn test_sqlite_claim_and_finalize() {
        let storage = SqliteAccountStore::new(":memory:").unwrap();
        storage.insert_account(&pending("acc-low", 10)).unwrap();
        storage.insert_account(&pending("acc-high", 100)).unwrap();

        let claimed = storage.claim_eligible(&EligibilityPolicy::default().criteria(now(), 1)).unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, "acc-high");
        assert_eq!(claimed[0].sync_status, SyncStatus::Syncing);
        assert_eq!(claimed[0].last_sync_attempt, Some(now()));

        storage.mark_fetched("acc-high", 10).unwrap();
        let cursor = now() + TimeDuration::seconds(3);
        storage.finalize("acc-high", cursor, now(), 10).unwrap();

        let account = storage.get_account("acc-high").unwrap();
        assert_eq!(account.sync_status, SyncStatus::Idle);
        assert_eq!(account.last_synced_cursor, Some(cursor));
        assert_eq!(account.last_updated_at, Some(now()));
        assert_eq!(account.priority, 10);
    }

    #[test]
    fn test_sqlite_illegal_transition_leaves_row() {
        let storage = SqliteAccountStore::new(":memory:").unwrap();
        storage.insert_account(&pending("acc-1", 10)).unwrap();

        let err = storage.mark_fetched("acc-1", 10).unwrap_err();
        assert!(matches!(
            err,
            StorageError::IllegalTransition { from: SyncStatus::PendingSync, to: SyncStatus::Fetched, .. }
        ));
        assert_eq!(storage.get_account("acc-1").unwrap().sync_status, SyncStatus::PendingSync);
    }

    #[test]
    fn test_sqlite_mark_failed_records_reason() {
        let storage = SqliteAccountStore::new(":memory:").unwrap();
        storage.insert_account(&pending("acc-1", 10)).unwrap();
        storage.claim_eligible(&EligibilityPolicy::default().criteria(now(), 10)).unwrap();
        storage.mark_failed("acc-1", "provider unavailable").unwrap();

        let account = storage.get_account("acc-1").unwrap();
        assert_eq!(account.sync_status, SyncStatus::Failed);
        assert_eq!(account.last_error.as_deref(), Some("provider unavailable"));

        // Retry once the failure is old enough, and the stale reason is cleared.
        let later = now() + TimeDuration::hours(2);
        let claimed = storage.claim_eligible(&EligibilityPolicy::default().criteria(later, 10)).unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].last_error, None);
    }

    #[test]
    fn test_sqlite_upsert_transactions() {
        let storage = SqliteAccountStore::new(":memory:").unwrap();
        storage.insert_account(&pending("acc-1", 10)).unwrap();

        let batch = vec![txn("acc-1", "tx-1"), txn("acc-1", "tx-2"), txn("acc-1", "tx-2")];
        assert_eq!(storage.upsert_transactions(&batch).unwrap(), 2);
        assert_eq!(storage.upsert_transactions(&batch).unwrap(), 0);

        let stored = storage.list_transactions("acc-1").unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].provider_transaction_id, "tx-1");
        assert_eq!(stored[0].amount, Decimal::new(-4550, 2));
        assert_eq!(stored[0].merchant_name.as_deref(), Some("Coffee Shop"));
        assert_eq!(storage.count_transactions("acc-1").unwrap(), 2);

        assert!(matches!(
            storage.upsert_transactions(&[txn("acc-missing", "tx-1")]),
            Err(StorageError::AccountNotFound(_))
        ));
    }

    #[test]
    fn test_sqlite_concurrent_claims_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.db");
        let path = path.to_str().unwrap().to_string();

        let seed = SqliteAccountStore::new(&path).unwrap();
        for i in 0..30 {
            seed.insert_account(&pending(&format!("acc-{:02}", i), 10)).unwrap();
        }
        drop(seed);

        let barrier = Arc::new(Barrier::new(3));
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let path = path.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    let storage = SqliteAccountStore::new(&path).unwrap();
                    barrier.wait();
                    let mut mine = Vec::new();
                    for _ in 0..10 {
                        let criteria = EligibilityPolicy::default().criteria(now(), 2);
                        mine.extend(storage.claim_eligible(&criteria).unwrap().into_iter().map(|a| a.id));
                    }
                    mine
                })
            })
            .collect();

        let mut all: Vec<String> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        let total = all.len();
        all.sort();
        all.dedup();
        assert_eq!(total, 30);
        assert_eq!(all.len(), 30);
    }
}
