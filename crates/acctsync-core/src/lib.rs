//! Core types and traits for acctsync storage backends.
//!
//! This crate provides the `AccountStore` and `SnapshotStore` traits, the
//! account sync-status state machine and the claim eligibility rules, so
//! that storage implementations can live in separate crates.

pub mod claim;
pub mod models;
pub mod status;
pub mod storage;
pub mod timestamp;

// Re-export key types at crate root for convenience
pub use claim::{ClaimCriteria, EligibilityPolicy};
pub use models::{Account, NewAccount, SnapshotHandle, SyncJob, Transaction, DEFAULT_PRIORITY};
pub use status::SyncStatus;
pub use storage::{AccountStore, SnapshotError, SnapshotStore, StorageError};
