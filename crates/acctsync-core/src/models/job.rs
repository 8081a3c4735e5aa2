use std::fmt::Display;

use time::OffsetDateTime;

use crate::{storage::SnapshotError, timestamp};

/// Hand-off from the fetcher to the normalizer. Lives only in the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncJob {
    pub account_id: String,
    /// Lower bound the fetch was issued with.
    pub cursor: OffsetDateTime,
    pub snapshot: SnapshotHandle,
    pub fetched_at: OffsetDateTime,
}

/// Key of a raw snapshot: `<account_id>/<unix_nanos>.json`.
///
/// Both segments are validated on construction, so a handle can always be
/// joined onto a storage root without escaping it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SnapshotHandle(String);

impl SnapshotHandle {
    pub fn for_attempt(account_id: &str, attempted_at: OffsetDateTime) -> Result<Self, SnapshotError> {
        if !is_safe_identifier(account_id) {
            return Err(SnapshotError::InvalidAccountId(account_id.to_string()));
        }
        let nanos = timestamp::to_unix_nanos(attempted_at)
            .map_err(|e| SnapshotError::Other(e.to_string()))?;
        Ok(Self(format!("{}/{}.json", account_id, nanos)))
    }

    pub fn parse(key: &str) -> Result<Self, SnapshotError> {
        let invalid = || SnapshotError::InvalidHandle(key.to_string());
        let (account_id, file) = key.split_once('/').ok_or_else(invalid)?;
        let stem = file.strip_suffix(".json").ok_or_else(invalid)?;
        if !is_safe_identifier(account_id) || stem.is_empty() || !stem.chars().all(|c| c.is_ascii_digit() || c == '-') {
            return Err(invalid());
        }
        Ok(Self(key.to_string()))
    }

    pub fn account_id(&self) -> &str {
        self.0.split_once('/').map(|(a, _)| a).unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SnapshotHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub(crate) fn is_safe_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_layout() {
        let at = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let handle = SnapshotHandle::for_attempt("acc-test-001", at).unwrap();
        assert_eq!(handle.as_str(), "acc-test-001/1700000000000000000.json");
        assert_eq!(handle.account_id(), "acc-test-001");
        assert_eq!(SnapshotHandle::parse(handle.as_str()).unwrap(), handle);
    }

    #[test]
    fn test_rejects_path_escapes() {
        let at = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        assert!(matches!(
            SnapshotHandle::for_attempt("../etc", at),
            Err(SnapshotError::InvalidAccountId(_))
        ));
        assert!(SnapshotHandle::for_attempt("", at).is_err());
        assert!(SnapshotHandle::parse("../1.json").is_err());
        assert!(SnapshotHandle::parse("acc/../../1.json").is_err());
        assert!(SnapshotHandle::parse("acc/1.txt").is_err());
        assert!(SnapshotHandle::parse("acc").is_err());
    }
}
