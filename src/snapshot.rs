use std::{
    fs::{self, OpenOptions},
    io::{self, ErrorKind, Write},
    path::{Path, PathBuf},
};

use time::OffsetDateTime;

use acctsync_core::{SnapshotError, SnapshotHandle, SnapshotStore};

/// Raw snapshots on local disk under `<root>/<account_id>/<unix_nanos>.json`.
pub struct FsSnapshotStore {
    root: PathBuf,
}

impl FsSnapshotStore {
    pub fn new(root: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_of(&self, handle: &SnapshotHandle) -> PathBuf {
        self.root.join(handle.as_str())
    }
}

/// Runs `write` against the file just created at `path`. On failure the file
/// is removed, so a key never holds a partial payload.
fn write_or_remove(path: &Path, write: impl FnOnce() -> io::Result<()>) -> Result<(), SnapshotError> {
    let Err(e) = write() else {
        return Ok(());
    };
    if let Err(rm) = fs::remove_file(path) {
        tracing::warn!(path = %path.display(), error = %rm, "Failed to remove partial snapshot");
    }
    Err(SnapshotError::IOError(e))
}

impl SnapshotStore for FsSnapshotStore {
    fn put(&self, account_id: &str, attempted_at: OffsetDateTime, bytes: &[u8]) -> Result<SnapshotHandle, SnapshotError> {
        let handle = SnapshotHandle::for_attempt(account_id, attempted_at)?;
        let path = self.path_of(&handle);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => SnapshotError::AlreadyExists(handle.to_string()),
                _ => SnapshotError::IOError(e),
            })?;
        write_or_remove(&path, move || {
            let mut file = file;
            file.write_all(bytes)?;
            file.sync_all()
        })?;

        tracing::debug!(snapshot = %handle, bytes = bytes.len(), "Raw snapshot staged");
        Ok(handle)
    }

    fn get(&self, handle: &SnapshotHandle) -> Result<Vec<u8>, SnapshotError> {
        fs::read(self.path_of(handle)).map_err(|e| match e.kind() {
            ErrorKind::NotFound => SnapshotError::NotFound(handle.to_string()),
            _ => SnapshotError::IOError(e),
        })
    }
}
