//! The periodic scheduler: claim eligible accounts, fetch, stage, enqueue.

use std::{sync::Arc, time::Instant};

use time::OffsetDateTime;
use tokio::{
    sync::watch,
    task::JoinSet,
    time::MissedTickBehavior,
};

use acctsync_core::{timestamp::truncate_to_micros, Account, EligibilityPolicy, SyncJob};

use crate::{
    config::IngestConfig,
    provider::{AccountDataProvider, FetchError},
    queue::JobSender,
    storage::{run_blocking, AccountStore, SnapshotStore, StorageError},
    telemetry,
};

#[derive(Debug, Clone)]
pub struct FetcherSettings {
    pub tick_interval: std::time::Duration,
    pub batch_size: usize,
    pub lookback: time::Duration,
    pub fetch_timeout: std::time::Duration,
    pub default_priority: i32,
    pub policy: EligibilityPolicy,
}

impl FetcherSettings {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            tick_interval: config.tick_interval(),
            batch_size: config.batch_size,
            lookback: config.lookback(),
            fetch_timeout: config.fetch_timeout(),
            default_priority: config.default_priority,
            policy: config.policy(),
        }
    }
}

impl Default for FetcherSettings {
    fn default() -> Self {
        Self::from_config(&IngestConfig::default())
    }
}

/// What happened to one claimed account during a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountOutcome {
    Queued,
    FetchFailed,
    /// Raw bytes could not be staged; the account stays SYNCING until zombie recovery.
    StageFailed,
    /// A store write or the queue push failed after the fetch succeeded.
    Abandoned,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub claimed: usize,
    pub queued: usize,
    pub failed: usize,
    pub stage_errors: usize,
    pub abandoned: usize,
}

impl TickReport {
    fn record(&mut self, outcome: AccountOutcome) {
        match outcome {
            AccountOutcome::Queued => self.queued += 1,
            AccountOutcome::FetchFailed => self.failed += 1,
            AccountOutcome::StageFailed => self.stage_errors += 1,
            AccountOutcome::Abandoned => self.abandoned += 1,
        }
    }
}

/// Lower bound of the next fetch: the stored cursor, or `now - lookback` on
/// the first sync.
pub fn fetch_window_start(account: &Account, now: OffsetDateTime, lookback: time::Duration) -> OffsetDateTime {
    account
        .last_synced_cursor
        .unwrap_or_else(|| now.checked_sub(lookback).unwrap_or(OffsetDateTime::UNIX_EPOCH))
}

#[derive(Clone)]
pub struct Fetcher {
    store: Arc<dyn AccountStore>,
    snapshots: Arc<dyn SnapshotStore>,
    provider: Arc<dyn AccountDataProvider>,
    queue: JobSender,
    settings: Arc<FetcherSettings>,
}

impl Fetcher {
    pub fn new(
        store: Arc<dyn AccountStore>,
        snapshots: Arc<dyn SnapshotStore>,
        provider: Arc<dyn AccountDataProvider>,
        queue: JobSender,
        settings: FetcherSettings,
    ) -> Self {
        Self {
            store,
            snapshots,
            provider,
            queue,
            settings: Arc::new(settings),
        }
    }

    /// Ticks until `shutdown` flips to true. Dropping the fetcher on return
    /// releases its queue sender so the normalizers can drain and exit.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.settings.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval = ?self.settings.tick_interval, batch_size = self.settings.batch_size, "Fetcher started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        tracing::error!(error = %e, "Claim failed, retrying on next tick");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Fetcher stopped");
    }

    pub async fn tick(&self) -> Result<TickReport, StorageError> {
        self.tick_at(OffsetDateTime::now_utc()).await
    }

    /// One scheduling round with an explicit clock. Per-account failures are
    /// absorbed into the report; only a failed claim is returned as an error.
    ///
    /// Every instant this writes is truncated to microseconds, so the cursor
    /// a backend reads back equals the `fetched_at` carried by the job.
    pub async fn tick_at(&self, now: OffsetDateTime) -> Result<TickReport, StorageError> {
        let now = truncate_to_micros(now);
        let criteria = self.settings.policy.criteria(now, self.settings.batch_size);
        let claimed = run_blocking(&self.store, move |s| s.claim_eligible(&criteria)).await?;

        let mut report = TickReport {
            claimed: claimed.len(),
            ..TickReport::default()
        };
        if claimed.is_empty() {
            tracing::trace!("No eligible accounts");
            return Ok(report);
        }

        metrics::counter!(telemetry::ACCOUNTS_CLAIMED, claimed.len() as u64);
        tracing::info!(claimed = claimed.len(), "Claimed accounts for sync");

        let mut tasks = JoinSet::new();
        for account in claimed {
            let fetcher = self.clone();
            tasks.spawn(async move { fetcher.process_account(account, now).await });
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => report.record(outcome),
                Err(e) => {
                    tracing::error!(error = %e, "Account task panicked");
                    report.record(AccountOutcome::Abandoned);
                }
            }
        }

        tracing::debug!(?report, "Tick complete");
        Ok(report)
    }

    async fn process_account(&self, account: Account, now: OffsetDateTime) -> AccountOutcome {
        let since = fetch_window_start(&account, now, self.settings.lookback);
        tracing::debug!(account_id = %account.id, provider = %account.provider, since = %since, "Fetching");

        let started = Instant::now();
        let fetched = tokio::time::timeout(
            self.settings.fetch_timeout,
            self.provider.fetch(&account.provider, &account.external_account_id, since),
        )
        .await;
        metrics::histogram!(telemetry::FETCH_DURATION, started.elapsed().as_secs_f64());

        let raw = match fetched {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => return self.fail(&account.id, e).await,
            Err(_) => return self.fail(&account.id, FetchError::Timeout(self.settings.fetch_timeout)).await,
        };
        let fetched_at = truncate_to_micros(OffsetDateTime::now_utc());

        let attempted_at = account.last_sync_attempt.unwrap_or(now);
        let id = account.id.clone();
        let snapshot = match run_blocking(&self.snapshots, move |s| s.put(&id, attempted_at, &raw)).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(account_id = %account.id, error = %e, "Failed to stage raw snapshot, account left SYNCING");
                return AccountOutcome::StageFailed;
            }
        };
        metrics::increment_counter!(telemetry::SNAPSHOTS_STAGED);

        // FETCHED before the push, so a normalizer never sees SYNCING.
        let id = account.id.clone();
        let priority = self.settings.default_priority;
        if let Err(e) = run_blocking(&self.store, move |s| s.mark_fetched(&id, priority)).await {
            tracing::error!(account_id = %account.id, error = %e, "Failed to mark account fetched");
            return AccountOutcome::Abandoned;
        }

        let job = SyncJob {
            account_id: account.id.clone(),
            cursor: since,
            snapshot,
            fetched_at,
        };
        match self.queue.push(job).await {
            Ok(()) => {
                tracing::debug!(account_id = %account.id, "Sync job queued");
                AccountOutcome::Queued
            }
            Err(e) => {
                tracing::warn!(error = %e, "Account left FETCHED");
                AccountOutcome::Abandoned
            }
        }
    }

    async fn fail(&self, account_id: &str, err: FetchError) -> AccountOutcome {
        metrics::increment_counter!(telemetry::FETCH_FAILURES);
        tracing::warn!(account_id, error = %err, "Fetch failed");

        let id = account_id.to_string();
        let reason = err.to_string();
        match run_blocking(&self.store, move |s| s.mark_failed(&id, &reason)).await {
            Ok(()) => AccountOutcome::FetchFailed,
            Err(e) => {
                tracing::error!(account_id, error = %e, "Failed to mark account failed");
                AccountOutcome::Abandoned
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;

    use acctsync_core::{NewAccount, SyncStatus};
    use acctsync_memory::{InMemoryAccountStore, InMemorySnapshotStore};

    use crate::queue::{sync_queue, JobReceiver};

    struct StaticProvider(&'static [u8]);

    #[async_trait]
    impl AccountDataProvider for StaticProvider {
        async fn fetch(&self, _: &str, _: &str, _: OffsetDateTime) -> Result<Vec<u8>, FetchError> {
            Ok(self.0.to_vec())
        }
    }

    struct HangingProvider;

    #[async_trait]
    impl AccountDataProvider for HangingProvider {
        async fn fetch(&self, _: &str, _: &str, _: OffsetDateTime) -> Result<Vec<u8>, FetchError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Vec::new())
        }
    }

    struct RejectingProvider;

    #[async_trait]
    impl AccountDataProvider for RejectingProvider {
        async fn fetch(&self, provider: &str, _: &str, _: OffsetDateTime) -> Result<Vec<u8>, FetchError> {
            Err(FetchError::Provider {
                provider: provider.to_string(),
                reason: "credentials expired".to_string(),
            })
        }
    }

    struct Harness {
        store: Arc<InMemoryAccountStore>,
        snapshots: Arc<InMemorySnapshotStore>,
        fetcher: Fetcher,
        jobs: JobReceiver,
    }

    fn harness(provider: Arc<dyn AccountDataProvider>, settings: FetcherSettings) -> Harness {
        let store = Arc::new(InMemoryAccountStore::new());
        let snapshots = Arc::new(InMemorySnapshotStore::new());
        let (tx, rx) = sync_queue(8);
        let fetcher = Fetcher::new(store.clone(), snapshots.clone(), provider, tx, settings);
        Harness {
            store,
            snapshots,
            fetcher,
            jobs: rx,
        }
    }

    fn pending(id: &str, priority: i32) -> NewAccount {
        NewAccount::new(id, "user-1", "bank_leumi", &format!("ext-{}", id))
            .with_status(SyncStatus::PendingSync)
            .with_priority(priority)
    }

    #[test]
    fn test_fetch_window_start() {
        let now = OffsetDateTime::now_utc();
        let lookback = time::Duration::days(90);
        let store = InMemoryAccountStore::new();
        let mut account = store.insert_account(&pending("acc-1", 10)).unwrap();

        assert_eq!(fetch_window_start(&account, now, lookback), now - lookback);

        let cursor = now - time::Duration::hours(3);
        account.last_synced_cursor = Some(cursor);
        assert_eq!(fetch_window_start(&account, now, lookback), cursor);
    }

    #[tokio::test]
    async fn test_tick_stages_marks_fetched_and_queues() {
        let h = harness(Arc::new(StaticProvider(b"[]")), FetcherSettings::default());
        h.store.insert_account(&pending("acc-1", 100)).unwrap();

        let now = truncate_to_micros(OffsetDateTime::now_utc());
        let report = h.fetcher.tick_at(now).await.unwrap();
        assert_eq!(report.claimed, 1);
        assert_eq!(report.queued, 1);

        let account = h.store.get_account("acc-1").unwrap();
        assert_eq!(account.sync_status, SyncStatus::Fetched);
        assert_eq!(account.priority, 10);
        assert_eq!(account.last_sync_attempt, Some(now));

        let job = h.jobs.pop().await.unwrap();
        assert_eq!(job.account_id, "acc-1");
        assert_eq!(job.cursor, now - time::Duration::days(90));
        assert!(job.fetched_at >= now);
        assert_eq!(h.snapshots.get(&job.snapshot).unwrap(), b"[]".to_vec());
    }

    #[tokio::test]
    async fn test_fetch_timeout_marks_failed() {
        let settings = FetcherSettings {
            fetch_timeout: Duration::from_millis(20),
            ..FetcherSettings::default()
        };
        let h = harness(Arc::new(HangingProvider), settings);
        h.store.insert_account(&pending("acc-1", 10)).unwrap();

        let report = h.fetcher.tick().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.queued, 0);

        let account = h.store.get_account("acc-1").unwrap();
        assert_eq!(account.sync_status, SyncStatus::Failed);
        assert!(account.last_error.unwrap().contains("timed out"));
        assert!(h.snapshots.is_empty());

        drop(h.fetcher);
        assert!(h.jobs.pop().await.is_none());
    }

    #[tokio::test]
    async fn test_provider_error_marks_failed_with_reason() {
        let h = harness(Arc::new(RejectingProvider), FetcherSettings::default());
        h.store.insert_account(&pending("acc-1", 10)).unwrap();

        let report = h.fetcher.tick().await.unwrap();
        assert_eq!(report.failed, 1);

        let account = h.store.get_account("acc-1").unwrap();
        assert_eq!(account.sync_status, SyncStatus::Failed);
        assert!(account.last_error.unwrap().contains("credentials expired"));
    }

    #[tokio::test]
    async fn test_batch_size_caps_claim() {
        let settings = FetcherSettings {
            batch_size: 1,
            ..FetcherSettings::default()
        };
        let h = harness(Arc::new(StaticProvider(b"[]")), settings);
        h.store.insert_account(&pending("acc-low", 10)).unwrap();
        h.store.insert_account(&pending("acc-high", 100)).unwrap();

        let report = h.fetcher.tick().await.unwrap();
        assert_eq!(report.claimed, 1);
        assert_eq!(h.jobs.pop().await.unwrap().account_id, "acc-high");
        assert_eq!(h.store.get_account("acc-low").unwrap().sync_status, SyncStatus::PendingSync);
    }

    #[tokio::test]
    async fn test_empty_tick() {
        let h = harness(Arc::new(StaticProvider(b"[]")), FetcherSettings::default());
        let report = h.fetcher.tick().await.unwrap();
        assert_eq!(report, TickReport::default());
    }

    #[tokio::test]
    async fn test_tick_writes_microsecond_instants() {
        let h = harness(Arc::new(StaticProvider(b"[]")), FetcherSettings::default());
        h.store.insert_account(&pending("acc-1", 100)).unwrap();

        let now = OffsetDateTime::from_unix_timestamp(1_760_000_000).unwrap() + time::Duration::nanoseconds(602_282_177);
        h.fetcher.tick_at(now).await.unwrap();

        let account = h.store.get_account("acc-1").unwrap();
        assert_eq!(account.last_sync_attempt, Some(truncate_to_micros(now)));
        let job = h.jobs.pop().await.unwrap();
        assert_eq!(job.fetched_at, truncate_to_micros(job.fetched_at));
        assert_eq!(job.cursor, truncate_to_micros(now) - time::Duration::days(90));
    }

    #[tokio::test]
    async fn test_unstageable_account_ids_never_reach_the_fetcher() {
        let h = harness(Arc::new(StaticProvider(b"[]")), FetcherSettings::default());
        assert!(matches!(
            h.store.insert_account(&pending("acc 1@bank", 100)),
            Err(StorageError::InvalidAccountId(_))
        ));

        assert_eq!(h.fetcher.tick().await.unwrap(), TickReport::default());
        assert!(h.store.list_accounts().unwrap().is_empty());

        // every id a store accepts can be staged
        h.store.insert_account(&pending("acc_1-bank", 100)).unwrap();
        let report = h.fetcher.tick().await.unwrap();
        assert_eq!(report.queued, 1);
        assert_eq!(report.stage_errors, 0);
    }
}
