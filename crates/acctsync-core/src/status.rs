use std::{fmt::Display, str::FromStr};

use crate::storage::StorageError;

/// Persisted sync state of an account.
///
/// `Syncing` and `Fetched` double as the per-account mutual exclusion flag:
/// while an account sits in either state no other worker may claim it until
/// one of the recovery cutoffs in [`crate::ClaimCriteria`] has passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SyncStatus {
    Idle,
    PendingSync,
    Syncing,
    Fetched,
    Failed,
}

impl SyncStatus {
    pub const ALL: [SyncStatus; 5] = [
        SyncStatus::Idle,
        SyncStatus::PendingSync,
        SyncStatus::Syncing,
        SyncStatus::Fetched,
        SyncStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Idle => "IDLE",
            SyncStatus::PendingSync => "PENDING_SYNC",
            SyncStatus::Syncing => "SYNCING",
            SyncStatus::Fetched => "FETCHED",
            SyncStatus::Failed => "FAILED",
        }
    }

    /// States from which `target` may be entered.
    pub fn sources(target: SyncStatus) -> &'static [SyncStatus] {
        match target {
            // Claim. Staleness of SYNCING/FETCHED/FAILED is enforced by the claim cutoffs.
            SyncStatus::Syncing => &[
                SyncStatus::Idle,
                SyncStatus::PendingSync,
                SyncStatus::Syncing,
                SyncStatus::Fetched,
                SyncStatus::Failed,
            ],
            SyncStatus::Fetched => &[SyncStatus::Syncing],
            SyncStatus::Failed => &[SyncStatus::Syncing],
            SyncStatus::Idle => &[SyncStatus::Fetched],
            SyncStatus::PendingSync => &[
                SyncStatus::Idle,
                SyncStatus::Failed,
                SyncStatus::PendingSync,
            ],
        }
    }

    pub fn can_transition_to(self, next: SyncStatus) -> bool {
        Self::sources(next).contains(&self)
    }

    /// Validates `self -> next` for `account_id`, returning `next` on success.
    pub fn transition(self, account_id: &str, next: SyncStatus) -> Result<SyncStatus, StorageError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(StorageError::IllegalTransition {
                account_id: account_id.to_string(),
                from: self,
                to: next,
            })
        }
    }

    /// Whether a freshly provisioned account may start in this state.
    pub fn is_initial(self) -> bool {
        matches!(self, SyncStatus::Idle | SyncStatus::PendingSync)
    }
}

impl Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IDLE" => Ok(SyncStatus::Idle),
            "PENDING_SYNC" => Ok(SyncStatus::PendingSync),
            "SYNCING" => Ok(SyncStatus::Syncing),
            "FETCHED" => Ok(SyncStatus::Fetched),
            "FAILED" => Ok(SyncStatus::Failed),
            other => Err(StorageError::Corrupt(format!("unknown sync status: {}", other))),
        }
    }
}
