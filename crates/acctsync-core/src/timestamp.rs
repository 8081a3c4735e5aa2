//! Integer encoding of timestamps for backends without a native timestamp type.
//!
//! Nanoseconds since the Unix epoch sort the same way as the instants they
//! encode, so range predicates in SQL work on the raw column.

use time::{Duration, OffsetDateTime};

use crate::storage::StorageError;

pub fn to_unix_nanos(t: OffsetDateTime) -> Result<i64, StorageError> {
    i64::try_from(t.unix_timestamp_nanos())
        .map_err(|_| StorageError::Other(format!("timestamp out of range: {}", t)))
}

pub fn from_unix_nanos(nanos: i64) -> Result<OffsetDateTime, StorageError> {
    OffsetDateTime::from_unix_timestamp_nanos(nanos as i128)
        .map_err(|e| StorageError::Corrupt(format!("invalid timestamp {}: {}", nanos, e)))
}

/// Drops sub-microsecond precision. Microseconds are the finest resolution
/// every backend stores, so instants truncated here read back unchanged.
pub fn truncate_to_micros(t: OffsetDateTime) -> OffsetDateTime {
    t - Duration::nanoseconds(i64::from(t.nanosecond() % 1_000))
}

pub fn opt_to_unix_nanos(t: Option<OffsetDateTime>) -> Result<Option<i64>, StorageError> {
    t.map(to_unix_nanos).transpose()
}

pub fn opt_from_unix_nanos(nanos: Option<i64>) -> Result<Option<OffsetDateTime>, StorageError> {
    nanos.map(from_unix_nanos).transpose()
}
