use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use acctsync_core::{SnapshotHandle, SyncJob, Transaction};

use crate::{
    queue::JobReceiver,
    storage::{run_blocking, AccountStore, SnapshotError, SnapshotStore, StorageError},
    telemetry,
};

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("failed to load snapshot: {0}")]
    Load(#[from] SnapshotError),
    #[error("malformed snapshot: {0}")]
    Parse(String),
    #[error(transparent)]
    Store(#[from] StorageError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizeReport {
    pub parsed: usize,
    pub inserted: usize,
}

/// One record of the provider's JSON array.
#[derive(Debug, Deserialize)]
struct ProviderRecord {
    id: String,
    amount: Decimal,
    #[serde(with = "time::serde::rfc3339")]
    date: OffsetDateTime,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    merchant: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

/// Parses a raw snapshot into transactions for `account_id`.
///
/// All or nothing: one record with a missing id or unparsable date rejects
/// the whole snapshot.
pub fn parse_transactions(account_id: &str, raw: &[u8], inserted_at: OffsetDateTime) -> Result<Vec<Transaction>, NormalizeError> {
    let records: Vec<ProviderRecord> = serde_json::from_slice(raw).map_err(|e| NormalizeError::Parse(e.to_string()))?;

    records
        .into_iter()
        .enumerate()
        .map(|(i, record)| {
            if record.id.trim().is_empty() {
                return Err(NormalizeError::Parse(format!("record {} has an empty id", i)));
            }
            Ok(Transaction {
                id: Uuid::new_v4(),
                account_id: account_id.to_string(),
                provider_transaction_id: record.id,
                amount: record.amount,
                currency: record.currency.unwrap_or_default(),
                description: record.description,
                merchant_name: record.merchant,
                category: record.category,
                status: record.status,
                transaction_date: record.date,
                system_inserted_at: inserted_at,
            })
        })
        .collect()
}

#[derive(Clone)]
pub struct Normalizer {
    store: Arc<dyn AccountStore>,
    snapshots: Arc<dyn SnapshotStore>,
    default_priority: i32,
}

impl Normalizer {
    pub fn new(store: Arc<dyn AccountStore>, snapshots: Arc<dyn SnapshotStore>, default_priority: i32) -> Self {
        Self {
            store,
            snapshots,
            default_priority,
        }
    }

    /// Drains jobs until the queue is closed and empty. Failed jobs are
    /// logged and dropped; the account stays FETCHED.
    pub async fn run(self, jobs: JobReceiver, worker: usize) {
        tracing::info!(worker, "Normalizer started");
        while let Some(job) = jobs.pop().await {
            match self.process(&job).await {
                Ok(report) => {
                    tracing::info!(
                        worker,
                        account_id = %job.account_id,
                        parsed = report.parsed,
                        inserted = report.inserted,
                        "Account synced"
                    );
                }
                Err(e) => {
                    metrics::increment_counter!(telemetry::NORMALIZE_FAILURES);
                    tracing::error!(
                        worker,
                        account_id = %job.account_id,
                        snapshot = %job.snapshot,
                        error = %e,
                        "Normalization failed, job dropped"
                    );
                }
            }
        }
        tracing::info!(worker, "Normalizer stopped");
    }

    /// Load, parse, upsert, then finalize the account with
    /// `last_synced_cursor = job.fetched_at`.
    pub async fn process(&self, job: &SyncJob) -> Result<NormalizeReport, NormalizeError> {
        let report = self.ingest(&job.account_id, &job.snapshot).await?;

        let id = job.account_id.clone();
        let cursor = job.fetched_at;
        let priority = self.default_priority;
        run_blocking(&self.store, move |s| s.finalize(&id, cursor, OffsetDateTime::now_utc(), priority)).await?;
        Ok(report)
    }

    /// Re-ingests a retained snapshot without touching account state.
    /// Already-stored transactions are skipped.
    pub async fn replay_snapshot(&self, account_id: &str, handle: &SnapshotHandle) -> Result<NormalizeReport, NormalizeError> {
        if handle.account_id() != account_id {
            return Err(NormalizeError::Load(SnapshotError::InvalidHandle(format!(
                "{} does not belong to account {}",
                handle, account_id
            ))));
        }
        let report = self.ingest(account_id, handle).await?;
        tracing::info!(account_id, snapshot = %handle, inserted = report.inserted, "Snapshot replayed");
        Ok(report)
    }

    async fn ingest(&self, account_id: &str, handle: &SnapshotHandle) -> Result<NormalizeReport, NormalizeError> {
        let key = handle.clone();
        let raw = run_blocking(&self.snapshots, move |s| s.get(&key)).await?;

        let batch = parse_transactions(account_id, &raw, OffsetDateTime::now_utc())?;
        let parsed = batch.len();

        let inserted = run_blocking(&self.store, move |s| s.upsert_transactions(&batch)).await?;
        metrics::counter!(telemetry::TRANSACTIONS_INSERTED, inserted as u64);
        tracing::debug!(account_id, parsed, inserted, "Transactions upserted");

        Ok(NormalizeReport { parsed, inserted })
    }
}
