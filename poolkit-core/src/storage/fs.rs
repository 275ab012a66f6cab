//! Filesystem blob store.
//!
//! Each blob is one file under `<root>/poolkit/blobs`. Writes go to a
//! uniquely named temp file, are synced, then renamed over the target, so a
//! crash leaves either the old or the new blob. Mutations hold the in-process
//! gate and the cross-process [`StorageLock`] for the whole read-compare-write.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use super::error::{map_io_err, StorageError, StorageResult};
use super::lock::{StorageLock, StorageLockGuard};
use super::paths::StoragePaths;
use super::traits::AtomicBlobStore;

const TEMP_PREFIX: char = '.';

/// Blob store persisting each blob as a file.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    inner: Arc<FsInner>,
}

#[derive(Debug)]
struct FsInner {
    paths: StoragePaths,
    lock: StorageLock,
    gate: Mutex<()>,
}

impl FsBlobStore {
    /// Opens (creating if needed) the store rooted at `paths`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directories or the lock file cannot be created.
    pub fn open(paths: StoragePaths) -> StorageResult<Self> {
        fs::create_dir_all(paths.blobs_dir()).map_err(|err| map_io_err(&err))?;
        let lock = StorageLock::open(&paths.lock_path())?;
        Ok(Self {
            inner: Arc::new(FsInner {
                paths,
                lock,
                gate: Mutex::new(()),
            }),
        })
    }

    /// Returns the paths used by this store.
    #[must_use]
    pub fn paths(&self) -> &StoragePaths {
        &self.inner.paths
    }

    async fn blocking<T, F>(&self, op: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&FsInner) -> StorageResult<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || op(&inner))
            .await
            .map_err(|err| StorageError::Unavailable(format!("blob task failed: {err}")))?
    }
}

impl FsInner {
    fn exclusive<T>(
        &self,
        op: impl FnOnce(&StorageLockGuard) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let _gate = self
            .gate
            .lock()
            .map_err(|_| StorageError::Unavailable("blob store gate poisoned".to_string()))?;
        let guard = self.lock.lock()?;
        op(&guard)
    }

    fn read_blob(&self, name: &str) -> StorageResult<Option<Vec<u8>>> {
        match fs::read(self.paths.blob_path(name)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(map_io_err(&err)),
        }
    }

    fn write_blob(&self, _guard: &StorageLockGuard, name: &str, bytes: &[u8]) -> StorageResult<()> {
        let dir = self.paths.blobs_dir();
        let temp = dir.join(format!("{TEMP_PREFIX}{name}.{}.tmp", Uuid::new_v4()));
        let written = write_synced(&temp, bytes)
            .and_then(|()| fs::rename(&temp, self.paths.blob_path(name)));
        if let Err(err) = written {
            let _ = fs::remove_file(&temp);
            return Err(map_io_err(&err));
        }
        Ok(())
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

fn validate_name(name: &str) -> StorageResult<()> {
    let valid = !name.is_empty()
        && !name.starts_with(TEMP_PREFIX)
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidInput(format!("invalid blob name {name:?}")))
    }
}

#[async_trait]
impl AtomicBlobStore for FsBlobStore {
    async fn read(&self, name: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_name(name)?;
        let name = name.to_string();
        self.blocking(move |inner| inner.read_blob(&name)).await
    }

    async fn write_atomic(&self, name: &str, bytes: &[u8]) -> StorageResult<()> {
        validate_name(name)?;
        let name = name.to_string();
        let bytes = bytes.to_vec();
        self.blocking(move |inner| {
            inner.exclusive(|guard| inner.write_blob(guard, &name, &bytes))
        })
        .await
    }

    async fn compare_and_swap(
        &self,
        name: &str,
        expected: Option<&[u8]>,
        bytes: &[u8],
    ) -> StorageResult<bool> {
        validate_name(name)?;
        let name = name.to_string();
        let expected = expected.map(<[u8]>::to_vec);
        let bytes = bytes.to_vec();
        self.blocking(move |inner| {
            inner.exclusive(|guard| {
                if inner.read_blob(&name)? != expected {
                    return Ok(false);
                }
                inner.write_blob(guard, &name, &bytes)?;
                Ok(true)
            })
        })
        .await
    }

    async fn delete(&self, name: &str) -> StorageResult<()> {
        validate_name(name)?;
        let name = name.to_string();
        self.blocking(move |inner| {
            inner.exclusive(|_guard| match fs::remove_file(inner.paths.blob_path(&name)) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
                Err(err) => Err(map_io_err(&err)),
            })
        })
        .await
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let prefix = prefix.to_string();
        self.blocking(move |inner| {
            let entries = match fs::read_dir(inner.paths.blobs_dir()) {
                Ok(entries) => entries,
                Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
                Err(err) => return Err(map_io_err(&err)),
            };
            let mut names = Vec::new();
            for entry in entries {
                let entry = entry.map_err(|err| map_io_err(&err))?;
                let Ok(name) = entry.file_name().into_string() else {
                    continue;
                };
                if !name.starts_with(TEMP_PREFIX) && name.starts_with(&prefix) {
                    names.push(name);
                }
            }
            names.sort();
            Ok(names)
        })
        .await
    }
}
