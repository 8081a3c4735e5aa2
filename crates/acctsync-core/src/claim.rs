use time::{Duration, OffsetDateTime};

use crate::{models::Account, status::SyncStatus};

/// Thresholds that decide when an account is due for another sync cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct EligibilityPolicy {
    /// IDLE accounts are rescheduled once `last_updated_at` is older than this.
    pub staleness: Duration,
    /// SYNCING accounts are presumed abandoned once `last_sync_attempt` is older than this.
    pub zombie: Duration,
    /// FAILED accounts are retried after this long. `None` disables automatic retry.
    pub failed_retry_after: Option<Duration>,
    /// FETCHED accounts whose normalization never finished are re-fetched after this long.
    /// `None` leaves them stuck until an operator intervenes.
    pub fetched_retry_after: Option<Duration>,
}

impl Default for EligibilityPolicy {
    fn default() -> Self {
        Self {
            staleness: Duration::hours(6),
            zombie: Duration::hours(1),
            failed_retry_after: Some(Duration::hours(1)),
            fetched_retry_after: Some(Duration::hours(1)),
        }
    }
}

impl EligibilityPolicy {
    pub fn criteria(&self, now: OffsetDateTime, batch_size: usize) -> ClaimCriteria {
        ClaimCriteria {
            now,
            batch_size,
            idle_before: cutoff(now, self.staleness),
            zombie_before: cutoff(now, self.zombie),
            failed_before: self.failed_retry_after.map(|d| cutoff(now, d)),
            fetched_before: self.fetched_retry_after.map(|d| cutoff(now, d)),
        }
    }
}

fn cutoff(now: OffsetDateTime, age: Duration) -> OffsetDateTime {
    now.checked_sub(age).unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

/// Input of a single claim: the claim time, the batch cap, and absolute
/// cutoffs resolved from an [`EligibilityPolicy`].
///
/// Backends that can evaluate rows in memory use [`ClaimCriteria::select`];
/// SQL backends translate the same clauses into their WHERE/ORDER BY/LIMIT.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimCriteria {
    pub now: OffsetDateTime,
    pub batch_size: usize,
    pub idle_before: OffsetDateTime,
    pub zombie_before: OffsetDateTime,
    pub failed_before: Option<OffsetDateTime>,
    pub fetched_before: Option<OffsetDateTime>,
}

impl ClaimCriteria {
    pub fn is_eligible(&self, account: &Account) -> bool {
        if account.is_deleted() {
            return false;
        }
        match account.sync_status {
            SyncStatus::PendingSync => true,
            SyncStatus::Idle => older_than(account.last_updated_at, self.idle_before),
            SyncStatus::Syncing => older_than(account.last_sync_attempt, self.zombie_before),
            SyncStatus::Failed => self
                .failed_before
                .map_or(false, |before| older_than(account.last_sync_attempt, before)),
            SyncStatus::Fetched => self
                .fetched_before
                .map_or(false, |before| older_than(account.last_sync_attempt, before)),
        }
    }

    /// Eligible accounts, highest priority first (ties by id), capped at the batch size.
    pub fn select<'a, I>(&self, accounts: I) -> Vec<&'a Account>
    where
        I: IntoIterator<Item = &'a Account>,
    {
        let mut eligible: Vec<&Account> = accounts.into_iter().filter(|a| self.is_eligible(a)).collect();
        eligible.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
        eligible.truncate(self.batch_size);
        eligible
    }
}

/// A missing timestamp counts as older than any cutoff.
fn older_than(ts: Option<OffsetDateTime>, before: OffsetDateTime) -> bool {
    ts.map_or(true, |t| t < before)
}
