use std::sync::Arc;

use acctsync_memory::{InMemoryAccountStore, InMemorySnapshotStore};
use acctsync_postgres::PostgresAccountStore;
use acctsync_sqlite::SqliteAccountStore;

use crate::config::{StorageBackendKind, StorageConfig};
use crate::snapshot::FsSnapshotStore;

// Re-export core storage types so the pipeline can use crate::storage::*
pub use acctsync_core::storage::{AccountStore, SnapshotError, SnapshotStore, StorageError};

/// Opens the configured account store.
///
/// The SQLite and PostgreSQL clients are blocking; call this from
/// `spawn_blocking` when a runtime is active.
pub fn open_account_store(config: &StorageConfig) -> Result<Arc<dyn AccountStore>, StorageError> {
    let store: Arc<dyn AccountStore> = match config.backend {
        StorageBackendKind::Memory => Arc::new(InMemoryAccountStore::new()),
        StorageBackendKind::Sqlite => Arc::new(SqliteAccountStore::new(&config.sqlite_path)?),
        StorageBackendKind::Postgres => {
            let url = config.postgres_url.as_deref().ok_or_else(|| {
                StorageError::Other("storage.postgres_url is required for the postgres backend".to_string())
            })?;
            Arc::new(PostgresAccountStore::new(url)?)
        }
    };
    tracing::info!(backend = ?config.backend, "Account store opened");
    Ok(store)
}

/// The memory backend keeps snapshots in memory too; every other backend
/// stages them on disk under `storage.snapshot_dir`.
pub fn open_snapshot_store(config: &StorageConfig) -> Result<Arc<dyn SnapshotStore>, SnapshotError> {
    let snapshots: Arc<dyn SnapshotStore> = match config.backend {
        StorageBackendKind::Memory => Arc::new(InMemorySnapshotStore::new()),
        _ => Arc::new(FsSnapshotStore::new(&config.snapshot_dir)?),
    };
    Ok(snapshots)
}

/// Errors that can report a blocking task that never returned.
pub trait FromTaskFailure {
    fn from_task_failure(err: tokio::task::JoinError) -> Self;
}

impl FromTaskFailure for StorageError {
    fn from_task_failure(err: tokio::task::JoinError) -> Self {
        StorageError::Other(format!("storage task failed: {}", err))
    }
}

impl FromTaskFailure for SnapshotError {
    fn from_task_failure(err: tokio::task::JoinError) -> Self {
        SnapshotError::Other(format!("snapshot task failed: {}", err))
    }
}

/// Runs a synchronous store call on the blocking pool.
pub async fn run_blocking<S, T, E, F>(store: &Arc<S>, f: F) -> Result<T, E>
where
    S: ?Sized + Send + Sync + 'static,
    T: Send + 'static,
    E: FromTaskFailure + Send + 'static,
    F: FnOnce(&S) -> Result<T, E> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .map_err(E::from_task_failure)?
}
